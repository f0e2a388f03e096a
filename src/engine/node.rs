use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::common::model::command::now_millis;
use crate::common::model::{Config, JoinPing, NodeInfo};
use crate::downloader::Downloader;
use crate::engine::connection::{ChannelHandler, Connection, HandlerOptions};
use crate::engine::controller::CrawlerController;
use crate::engine::manager::CrawlerManager;
use crate::engine::pool::{GPool, panic_message};
use crate::errors::Result;
use crate::queue::Channel;

/// A crawl node: the controller dispatch loop plus a gateway session that is
/// re-established after a fixed delay whenever it ends.
pub struct Node {
    node_id: String,
    hostname: String,
    config: Config,
    controller: CrawlerController,
}

impl Node {
    /// Must be called inside a tokio runtime. Cancelling `token` stops the
    /// pool along with the node.
    pub fn new(
        config: Config,
        manager: Arc<CrawlerManager>,
        downloader: Arc<dyn Downloader>,
        token: &CancellationToken,
    ) -> Self {
        let hostname = manager.hostname().to_string();
        let node_id = config
            .node
            .id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| hostname.clone());

        let channel = Channel::new(config.node.request_buffer, config.node.command_buffer);
        let pool = Arc::new(GPool::with_queue_depth(
            token.child_token(),
            config.node.max_concurrency,
            config.node.job_queue_depth,
        ));
        let controller = CrawlerController::new(
            &node_id,
            manager,
            downloader,
            pool,
            channel,
            config.controller.default_ttl(),
        );

        Node {
            node_id,
            hostname,
            config,
            controller,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn controller(&self) -> &CrawlerController {
        &self.controller
    }

    pub fn join_ping(&self) -> JoinPing {
        let pool = self.controller.pool();
        JoinPing {
            timestamp: now_millis(),
            node: NodeInfo {
                id: self.node_id.clone(),
                host: self.hostname.clone(),
                max_concurrency: pool.max_concurrency() as u32,
                idle_concurrency: pool.idle_concurrency() as u32,
            },
            crawlers: self.controller.manager().infos(),
        }
    }

    /// Runs until `token` is cancelled, dialing the configured gateway.
    pub async fn run(&self, token: CancellationToken) {
        let addr = self.config.gateway.addr.clone();
        self.run_with(token, move || {
            let addr = addr.clone();
            async move { Connection::dial(&addr).await }
        })
        .await
    }

    /// Runs until `token` is cancelled, opening each session with `connect`.
    pub async fn run_with<F, Fut>(&self, token: CancellationToken, connect: F)
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Connection>>,
    {
        info!(
            "node {} starting, gateway {}, max concurrency {}",
            self.node_id,
            self.config.gateway.addr,
            self.config.node.max_concurrency
        );

        let dispatch = async {
            while let Err(e) = AssertUnwindSafe(self.controller.run(token.clone()))
                .catch_unwind()
                .await
            {
                error!("controller panicked: {}. Restarting...", panic_message(e.as_ref()));
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        };

        let sessions = async {
            let delay = self.config.reconnect_delay();
            while !token.is_cancelled() {
                match self.session(&token, &connect).await {
                    Ok(()) => info!("gateway session ended"),
                    Err(e) => warn!("gateway session failed: {e}"),
                }
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {
                        info!("reconnecting to gateway after {delay:?}");
                    }
                }
            }
        };

        tokio::join!(dispatch, sessions);
        info!("node {} stopped", self.node_id);
    }

    async fn session<F, Fut>(&self, token: &CancellationToken, connect: &F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Connection>>,
    {
        let connection = connect().await?;
        let handler = ChannelHandler::new(
            connection,
            self.controller.channel(),
            self.controller.pool(),
            HandlerOptions {
                initial_heartbeat: self.config.initial_heartbeat(),
                max_pending_requests: self.config.node.request_buffer,
            },
        );

        let channel = self.controller.channel();
        let result = match handler.register(self.join_ping()).await {
            Ok(()) => {
                handler
                    .watch(token.child_token(), move |ctx, request| {
                        let channel = channel.clone();
                        async move {
                            tokio::select! {
                                _ = ctx.cancelled() => {}
                                res = channel.push_request(request) => {
                                    if let Err(e) = res {
                                        error!("failed to queue inbound request: {e}");
                                    }
                                }
                            }
                        }
                    })
                    .await
            }
            Err(e) => Err(e),
        };

        handler.close().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::model::{Command, CommandData, CommandRequest, Frame, JoinPong};
    use crate::downloader::RequestDownloader;
    use crate::errors::{Error, ServiceError};
    use futures::{SinkExt, StreamExt};
    use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::timeout;

    fn session() -> (Connection, UnboundedReceiver<Frame>, UnboundedSender<Result<Frame>>) {
        let (out_tx, out_rx) = unbounded::<Frame>();
        let (in_tx, in_rx) = unbounded::<Result<Frame>>();
        let connection = Connection::from_parts(
            "memory://gateway",
            Box::pin(out_tx.sink_map_err(Error::transport)),
            Box::pin(in_rx),
        );
        (connection, out_rx, in_tx)
    }

    fn node(token: &CancellationToken) -> Node {
        let mut config = Config::default();
        config.node.id = Some("node-a".to_string());
        config.node.max_concurrency = 3;
        config.gateway.reconnect_delay_ms = 10;

        let manager = Arc::new(CrawlerManager::new("host-a"));
        let downloader = Arc::new(RequestDownloader::new(&config.downloader).unwrap());
        Node::new(config, manager, downloader, token)
    }

    async fn next_frame(outbound: &mut UnboundedReceiver<Frame>) -> Frame {
        loop {
            let frame = timeout(Duration::from_secs(2), outbound.next())
                .await
                .expect("no frame from node")
                .expect("node closed the sink");
            if !matches!(frame, Frame::HeartbeatPing(_)) {
                return frame;
            }
        }
    }

    #[tokio::test]
    async fn test_node_id_falls_back_to_hostname() {
        let token = CancellationToken::new();

        let mut config = Config::default();
        config.node.id = Some("  ".to_string());
        let manager = Arc::new(CrawlerManager::new("host-a"));
        let downloader = Arc::new(RequestDownloader::new(&config.downloader).unwrap());
        let node = Node::new(config, manager, downloader, &token);

        assert_eq!(node.node_id(), "host-a");
        let ping = node.join_ping();
        assert_eq!(ping.node.host, "host-a");
        assert_eq!(ping.node.max_concurrency, 16);
        assert!(ping.crawlers.is_empty());
        token.cancel();
    }

    #[tokio::test]
    async fn test_reconnects_and_serves_requests() {
        let token = CancellationToken::new();
        let node = Arc::new(node(&token));

        let (first, mut first_out, first_in) = session();
        let (second, mut second_out, second_in) = session();
        drop(first_in);

        let sessions = Arc::new(StdMutex::new(VecDeque::from([first, second])));
        let attempts = Arc::new(AtomicUsize::new(0));
        let run = {
            let (node, token) = (node.clone(), token.clone());
            let (sessions, attempts) = (sessions.clone(), attempts.clone());
            tokio::spawn(async move {
                node.run_with(token, move || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    let next = sessions.lock().unwrap().pop_front();
                    async move {
                        next.ok_or_else(|| {
                            Error::from(ServiceError::ConnectionFailed("gateway down".into()))
                        })
                    }
                })
                .await
            })
        };

        // The first session ends as soon as it starts.
        while timeout(Duration::from_secs(2), first_out.next())
            .await
            .expect("first session never closed")
            .is_some()
        {}

        match next_frame(&mut second_out).await {
            Frame::JoinPing(ping) => {
                assert_eq!(ping.node.id, "node-a");
                assert_eq!(ping.node.host, "host-a");
                assert_eq!(ping.node.max_concurrency, 3);
            }
            other => panic!("expected join ping, got {other:?}"),
        }

        second_in
            .unbounded_send(Ok(Frame::JoinPong(JoinPong {
                heartbeat_interval: 0,
                network_delay: 2,
            })))
            .unwrap();
        let mut request = CommandRequest::new("https://unknown.test/");
        request.tracing_id = "t1".to_string();
        second_in
            .unbounded_send(Ok(Frame::Command(Command::new("", CommandData::Request(request)))))
            .unwrap();

        match next_frame(&mut second_out).await {
            Frame::Command(Command {
                node_id,
                data: CommandData::Error(err),
                ..
            }) => {
                assert_eq!(node_id, "node-a");
                assert_eq!(err.tracing_id, "t1");
                assert_eq!(err.err_msg, "no crawler found");
            }
            other => panic!("expected error command, got {other:?}"),
        }
        assert!(attempts.load(Ordering::SeqCst) >= 2);

        token.cancel();
        timeout(Duration::from_secs(2), run).await.unwrap().unwrap();
    }
}
