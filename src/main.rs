use std::env;
use std::sync::Arc;

use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use crawlet::common::model::Config;
use crawlet::crawlers::CRAWLERS;
use crawlet::downloader::RequestDownloader;
use crawlet::engine::{CrawlerManager, Node};
use crawlet::utils::device_info::get_hostname;
use crawlet::utils::logger::init_logger;

const DEFAULT_CONFIG_PATH: &str = "crawlet.toml";

fn load_config() -> Result<Config, String> {
    let path = env::args()
        .nth(1)
        .or_else(|| env::var("CRAWLET_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    if std::path::Path::new(&path).exists() {
        Config::load(&path)
    } else {
        let mut config = Config::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    init_logger(config.logger.clone())?;

    let hostname = get_hostname().unwrap_or_else(|e| {
        warn!("failed to read hostname: {e}");
        "localhost".to_string()
    });

    let manager = Arc::new(CrawlerManager::new(&hostname));
    let loaded = manager.load_factories(CRAWLERS);
    info!("loaded {loaded} of {} crawlers", CRAWLERS.len());

    let downloader = Arc::new(RequestDownloader::new(&config.downloader)?);
    let token = CancellationToken::new();
    let node = Node::new(config, manager, downloader, &token);

    let shutdown = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, initiating shutdown..."),
            Err(e) => error!("failed to listen for Ctrl+C: {e}"),
        }
        shutdown.cancel();
    });

    node.run(token).await;
    Ok(())
}
