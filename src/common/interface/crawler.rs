use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

use crate::common::model::{Cookies, Headers, Product, Request, Response, ShareContext};
use crate::errors::{Error, Result};

/// How hard the backend should try to get a response through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reliability {
    #[default]
    Default,
    Medium,
    High,
}

/// Fetch options a crawler declares for a url.
#[derive(Debug, Clone, Default)]
pub struct CrawlOptions {
    pub enable_headless: bool,
    pub enable_session_init: bool,
    /// Headers set on every request, overriding the command's.
    pub must_headers: Headers,
    /// Cookies set on every request, overriding the command's.
    pub must_cookies: Cookies,
    pub reliability: Reliability,
    /// Parse an empty response instead of fetching.
    pub skip_do_request: bool,
}

/// A value a crawler emits while parsing.
#[derive(Debug)]
pub enum Yielded {
    /// Follow-up request to crawl next.
    SubRequest(Request),
    Item(Product),
    /// A failure the crawler wants reported without aborting the parse.
    Error(Error),
}

impl From<Request> for Yielded {
    fn from(value: Request) -> Self {
        Yielded::SubRequest(value)
    }
}

impl From<Product> for Yielded {
    fn from(value: Product) -> Self {
        Yielded::Item(value)
    }
}

impl From<Error> for Yielded {
    fn from(value: Error) -> Self {
        Yielded::Error(value)
    }
}

/// Receiver of yielded values. Calls are processed in order; an error means
/// the value could not be forwarded.
#[async_trait]
pub trait YieldSink: Send + Sync {
    async fn emit(&self, ctx: &ShareContext, value: Yielded) -> Result<()>;
}

/// A site-specific crawler.
///
/// Implementations are registered once at startup and shared across jobs,
/// so they hold no per-request state; anything that must flow from one page
/// to the next travels in the [`ShareContext`].
#[async_trait]
pub trait Crawler: Send + Sync {
    fn id(&self) -> &str;

    fn version(&self) -> i32;

    /// Host globs this crawler handles, e.g. `*.asos.com`.
    fn allowed_domains(&self) -> Vec<String>;

    fn crawl_options(&self, _url: &Url) -> CrawlOptions {
        CrawlOptions::default()
    }

    /// Normalized form of `raw_url` used for deduplication upstream.
    fn canonical_url(&self, raw_url: &str) -> Result<String> {
        let mut url = Url::parse(raw_url)?;
        url.set_fragment(None);
        Ok(url.to_string())
    }

    async fn parse(&self, ctx: ShareContext, response: Response, sink: &dyn YieldSink) -> Result<()>;
}

/// Constructor listed in the compile-time crawler table.
pub type CrawlerFactory = fn() -> Result<Arc<dyn Crawler>>;
