use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use time::{UtcOffset, format_description::well_known::Rfc3339};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::Rotation;
use tracing_log::LogTracer;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::Registry;
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

// Keeps the non-blocking file writer thread alive for the process lifetime.
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

static LOGGER_INITIALIZED: AtomicBool = AtomicBool::new(false);

const DEFAULT_APP_LOG_LEVEL: &str = "info,crawlet=debug,hyper=warn,reqwest=warn,tungstenite=warn";

/// Logger configuration, also read from the `[logger]` section of the node config.
///
/// ```
/// use std::path::PathBuf;
/// use crawlet::utils::logger::LoggerConfig;
///
/// let config = LoggerConfig::new()
///     .with_level("debug")
///     .with_file_path(PathBuf::from("./logs/crawlet.log"))
///     .with_console(true);
/// assert_eq!(config.level, "debug");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Log level filter, `EnvFilter` syntax (`info,crawlet=debug`)
    pub level: String,
    /// Optional file path for daily rolling log output
    pub file_path: Option<PathBuf>,
    /// Whether to enable console output
    #[serde(rename = "console")]
    pub enable_console: bool,
    /// Whether to use JSON format for logs
    #[serde(rename = "json")]
    pub json_format: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_APP_LOG_LEVEL.to_string(),
            file_path: None,
            enable_console: true,
            json_format: false,
        }
    }
}

impl LoggerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: impl AsRef<str>) -> Self {
        self.level = level.as_ref().into();
        self
    }

    pub fn with_file_path(mut self, path: PathBuf) -> Self {
        self.file_path = Some(path);
        self
    }

    pub fn with_console(mut self, enable: bool) -> Self {
        self.enable_console = enable;
        self
    }

    pub fn with_json(mut self, enable: bool) -> Self {
        self.json_format = enable;
        self
    }

    pub fn init(self) -> Result<(), Box<dyn std::error::Error>> {
        init_logger(self)
    }
}

pub fn is_logging_disabled() -> bool {
    let value = env::var("DISABLE_LOGS")
        .or_else(|_| env::var("CRAWLET_DISABLE_LOGS"))
        .unwrap_or_default();
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

/// Installs the global subscriber. Repeated calls are no-ops.
pub fn init_logger(config: LoggerConfig) -> Result<(), Box<dyn std::error::Error>> {
    if is_logging_disabled() {
        let _ = LOGGER_INITIALIZED.swap(true, Ordering::SeqCst);
        return Ok(());
    }
    if LOGGER_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::warn!("Logger already initialized, skipping re-initialization");
        return Ok(());
    }

    // bridge log crate
    let _ = LogTracer::builder()
        .with_max_level(log::LevelFilter::Trace)
        .init();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let local_offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let timer = OffsetTime::new(local_offset, Rfc3339);

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.enable_console {
        if config.json_format {
            layers.push(fmt::layer().json().with_timer(timer.clone()).boxed());
        } else {
            layers.push(
                fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_thread_ids(true)
                    .with_timer(timer.clone())
                    .boxed(),
            );
        }
    }

    if let Some(file_path) = config.file_path {
        let dir = file_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| std::path::Path::new("."))
            .to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let prefix = file_path
            .file_stem()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "crawlet".to_string());
        let file_appender = tracing_appender::rolling::Builder::new()
            .rotation(Rotation::DAILY)
            .filename_prefix(prefix)
            .filename_suffix("log")
            .build(dir)?;

        let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
        let _ = FILE_GUARD.set(guard);

        let layer = if config.json_format {
            fmt::layer()
                .json()
                .with_writer(file_writer)
                .with_timer(timer.clone())
                .boxed()
        } else {
            fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer)
                .with_timer(timer)
                .boxed()
        };
        layers.push(layer);
    }

    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logger_config_builder() {
        let config = LoggerConfig::new()
            .with_level("debug")
            .with_file_path(PathBuf::from("./test.log"))
            .with_console(false);

        assert_eq!(config.level, "debug");
        assert_eq!(config.file_path, Some(PathBuf::from("./test.log")));
        assert!(!config.enable_console);
        assert!(!config.json_format);
    }

    #[test]
    fn test_logger_config_from_toml() {
        let config: LoggerConfig = toml::from_str(
            r#"
            level = "warn"
            json = true
            "#,
        )
        .unwrap();
        assert_eq!(config.level, "warn");
        assert!(config.json_format);
        assert!(config.enable_console);
        assert!(config.file_path.is_none());
    }

    #[test]
    fn test_init_twice_is_harmless() {
        let _ = init_logger(LoggerConfig::new().with_level("info").with_console(false));
        assert!(init_logger(LoggerConfig::new()).is_ok());
        log::info!("logger initialized");
    }
}
