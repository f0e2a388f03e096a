use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use log::{debug, error, info, warn};
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use url::Url;

use crate::common::interface::{YieldSink, Yielded};
use crate::common::model::{
    Command, CommandData, CommandError, CommandItem, CommandRequest, Request, Response,
    ShareContext,
};
use crate::downloader::{DownloadOptions, Downloader};
use crate::engine::manager::{CrawlerEntry, CrawlerManager};
use crate::engine::pool::{GPool, panic_message};
use crate::errors::{CrawlerError, Error, RequestError, Result};
use crate::queue::Channel;

/// Orchestrates inbound requests: resolves a crawler by host, schedules a
/// fetch-and-parse job on the pool, and forwards whatever the crawler yields
/// to the gateway as commands.
#[derive(Clone)]
pub struct CrawlerController {
    node_id: String,
    manager: Arc<CrawlerManager>,
    downloader: Arc<dyn Downloader>,
    pool: Arc<GPool>,
    channel: Channel,
    default_ttl: Duration,
}

impl CrawlerController {
    pub fn new(
        node_id: impl AsRef<str>,
        manager: Arc<CrawlerManager>,
        downloader: Arc<dyn Downloader>,
        pool: Arc<GPool>,
        channel: Channel,
        default_ttl: Duration,
    ) -> Self {
        CrawlerController {
            node_id: node_id.as_ref().to_string(),
            manager,
            downloader,
            pool,
            channel,
            default_ttl,
        }
    }

    pub fn pool(&self) -> Arc<GPool> {
        self.pool.clone()
    }

    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }

    pub fn manager(&self) -> Arc<CrawlerManager> {
        self.manager.clone()
    }

    /// Dispatch loop over the inbound request queue. Returns when `token` is
    /// cancelled or the queue closes.
    pub async fn run(&self, token: CancellationToken) {
        info!(
            "controller started with {} crawlers, downloader {} {}",
            self.manager.count(),
            self.downloader.name(),
            self.downloader.version()
        );
        let receiver = self.channel.request_receiver.clone();
        let mut receiver = receiver.lock().await;

        loop {
            let request = tokio::select! {
                _ = token.cancelled() => break,
                request = receiver.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            if let Err(e) = self.dispatch(request).await {
                if e.is_cancelled() {
                    break;
                }
                error!("dispatch failed: {e}");
            }
        }
        info!("controller loop ended");
    }

    /// Resolves a crawler for `request` and queues its job. Requests that
    /// cannot be served are answered with a `Command_Error` instead.
    pub async fn dispatch(&self, request: CommandRequest) -> Result<()> {
        let url = match Url::parse(request.url.trim()) {
            Ok(url) => url,
            Err(e) => {
                let err = Error::invalid_argument(format!("invalid url {:?}: {e}", request.url));
                self.report(&request, err.to_string()).await;
                return Ok(());
            }
        };

        let host = url.host_str().unwrap_or_default();
        let Some(entry) = self.manager.get_by_host(host).into_iter().next() else {
            self.report(&request, CrawlerError::NotFound.to_string()).await;
            return Ok(());
        };

        let ttl = match request.options.max_ttl_per_request {
            secs if secs > 0 => Duration::from_secs(secs as u64),
            _ => self.default_ttl,
        };
        let ctx = ShareContext::from_request(&request);
        debug!(
            "dispatching {} to {}@{} ttl={:?}",
            request.url, entry.id, entry.version, ttl
        );

        let controller = self.clone();
        self.pool
            .do_job(move || controller.execute(entry, request, ctx, ttl))
            .await
    }

    async fn execute(
        self,
        entry: Arc<CrawlerEntry>,
        request: CommandRequest,
        ctx: ShareContext,
        ttl: Duration,
    ) {
        let span = tracing::info_span!(
            "crawl_job",
            tracing_id = %ctx.tracing_id,
            job_id = %ctx.job_id,
            req_id = %ctx.req_id,
            crawler = %entry.id,
        );

        async move {
            let job = tokio::time::timeout(ttl, self.fetch_and_parse(&entry, &request, ctx));
            let failure = match AssertUnwindSafe(job).catch_unwind().await {
                Ok(Ok(Ok(()))) => None,
                Ok(Ok(Err(e))) => Some(("error", e)),
                Ok(Err(_)) => Some((
                    "timeout",
                    Error::from(RequestError::TtlExceeded(ttl.as_millis() as u64)),
                )),
                Err(panic) => Some((
                    "panic",
                    Error::from(CrawlerError::Panicked(panic_message(panic.as_ref()))),
                )),
            };

            match failure {
                None => {
                    counter!("crawlet_jobs_total", "outcome" => "ok").increment(1);
                }
                Some((outcome, err)) => {
                    counter!("crawlet_jobs_total", "outcome" => outcome).increment(1);
                    self.report(&request, err.to_string()).await;
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn fetch_and_parse(
        &self,
        entry: &CrawlerEntry,
        request: &CommandRequest,
        ctx: ShareContext,
    ) -> Result<()> {
        let mut http_request = Request::try_from(request)?;
        let options = entry.crawler.crawl_options(&http_request.url);
        http_request.apply_must(&options.must_headers, &options.must_cookies);

        let response = if options.skip_do_request {
            Response::empty_for(http_request)
        } else {
            let download_options = DownloadOptions {
                enable_proxy: !request.options.disable_proxy,
                enable_headless: options.enable_headless,
                enable_session_init: options.enable_session_init,
                reliability: options.reliability,
            };
            self.downloader
                .do_with_options(http_request, download_options)
                .await?
        };
        debug!("fetched {} status={}", response.url, response.status_code);

        let sink = JobSink {
            controller: self,
            origin: request,
        };
        entry.crawler.parse(ctx, response, &sink).await
    }

    /// Wraps `data` in a `Command` and queues it for the gateway.
    pub async fn send(&self, data: CommandData) -> Result<()> {
        self.channel
            .push_command(Command::new(&self.node_id, data))
            .await
    }

    /// Sends a `Command_Error` addressed to `request`.
    pub async fn send_error(&self, request: &CommandRequest, err_msg: impl Into<String>) -> Result<()> {
        self.send(CommandData::Error(CommandError::for_request(request, err_msg)))
            .await
    }

    async fn report(&self, request: &CommandRequest, err_msg: String) {
        warn!(
            "request tracing_id={} job_id={} req_id={} failed: {err_msg}",
            request.tracing_id, request.job_id, request.req_id
        );
        if let Err(e) = self.send_error(request, err_msg).await {
            error!("failed to report error upstream: {e}");
        }
    }
}

/// Yield target handed to a crawler for one job.
struct JobSink<'a> {
    controller: &'a CrawlerController,
    origin: &'a CommandRequest,
}

#[async_trait]
impl<'a> YieldSink for JobSink<'a> {
    async fn emit(&self, ctx: &ShareContext, value: Yielded) -> Result<()> {
        let data = match value {
            Yielded::SubRequest(request) => {
                CommandData::Request(self.origin.derive_sub_request(ctx, &request)?)
            }
            Yielded::Item(product) => CommandData::Item(CommandItem::new(ctx, product.to_any()?)),
            Yielded::Error(err) => {
                warn!("crawler reported: {err}");
                CommandData::Error(CommandError::for_request(self.origin, err.to_string()))
            }
        };
        self.controller.send(data).await
    }
}
