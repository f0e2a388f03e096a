pub mod request_downloader;

use crate::common::interface::Reliability;
use crate::common::model::{Request, Response};
use crate::errors::Result;
use semver::Version;

pub use request_downloader::RequestDownloader;

/// Per-request switches forwarded from the command and the crawler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DownloadOptions {
    pub enable_proxy: bool,
    pub enable_headless: bool,
    pub enable_session_init: bool,
    pub reliability: Reliability,
}

/// HTTP execution backend.
#[async_trait::async_trait]
pub trait Downloader: Send + Sync + 'static {
    fn name(&self) -> String;

    fn version(&self) -> Version;

    /// Executes `request`. Cancellation is by dropping the future.
    async fn do_with_options(&self, request: Request, options: DownloadOptions) -> Result<Response>;

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
