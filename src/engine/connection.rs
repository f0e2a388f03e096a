use std::future::{Future, ready};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, error, info, warn};
use metrics::counter;
use tokio::sync::{Mutex, Semaphore, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::common::model::command::now_millis;
use crate::common::model::{Command, CommandData, CommandRequest, Frame, HeartbeatPing, JoinPing};
use crate::engine::codec;
use crate::engine::pool::GPool;
use crate::errors::{Error, Result, ServiceError};
use crate::queue::Channel;

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = Error> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame>> + Send>>;

const MIN_HEARTBEAT: Duration = Duration::from_millis(10);
const CONTROL_BUFFER: usize = 16;
const DEFAULT_MAX_PENDING_REQUESTS: usize = 100;

/// A single duplex session with the gateway.
pub struct Connection {
    addr: String,
    sink: FrameSink,
    stream: FrameStream,
}

impl Connection {
    /// Dials `addr`, which must be a `ws://` or `wss://` url.
    pub async fn dial(addr: &str) -> Result<Self> {
        let url = Url::parse(addr).map_err(|e| ServiceError::ConnectionFailed(e.into()))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ServiceError::ConnectionFailed(
                format!("unsupported gateway scheme {:?}", url.scheme()).into(),
            )
            .into());
        }

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| ServiceError::ConnectionFailed(e.into()))?;
        info!("connected to gateway {addr}");

        let (write, read) = ws_stream.split();
        let sink = write
            .sink_map_err(Error::transport)
            .with(|frame: Frame| ready(codec::encode_message(&frame)));
        let stream = read
            .take_while(|message| ready(!matches!(message, Ok(Message::Close(_)))))
            .filter_map(|message| {
                ready(match message {
                    Ok(message) => codec::decode_message(message),
                    Err(e) => Some(Err(Error::transport(e))),
                })
            });

        Ok(Self::from_parts(addr, Box::pin(sink), Box::pin(stream)))
    }

    pub fn from_parts(addr: impl AsRef<str>, sink: FrameSink, stream: FrameStream) -> Self {
        Connection {
            addr: addr.as_ref().to_string(),
            sink,
            stream,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[derive(Debug, Clone)]
pub struct HandlerOptions {
    /// Heartbeat cadence until the gateway dictates one.
    pub initial_heartbeat: Duration,
    /// Request callbacks allowed to run at once. When all are busy the
    /// receive loop waits, pushing back on the gateway.
    pub max_pending_requests: usize,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        HandlerOptions {
            initial_heartbeat: Duration::from_secs(60),
            max_pending_requests: DEFAULT_MAX_PENDING_REQUESTS,
        }
    }
}

/// Protocol driver for one [`Connection`].
///
/// A single writer task owns the sink: control frames (join, heartbeat) go
/// through a private queue, commands through the shared outbound queue of
/// [`Channel`]. Commands are only forwarded once the gateway has
/// acknowledged the join; until then they stay queued.
pub struct ChannelHandler {
    addr: String,
    channel: Channel,
    stream: Mutex<Option<FrameStream>>,
    control: mpsc::Sender<Frame>,
    pending: Arc<Semaphore>,
    registered: watch::Sender<bool>,
    heartbeat: watch::Sender<Duration>,
    session: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ChannelHandler {
    /// Must be called inside a tokio runtime.
    pub fn new(
        connection: Connection,
        channel: Channel,
        pool: Arc<GPool>,
        options: HandlerOptions,
    ) -> Self {
        let Connection { addr, sink, stream } = connection;
        let session = CancellationToken::new();
        let (control, control_rx) = mpsc::channel(CONTROL_BUFFER);
        let (registered, registered_rx) = watch::channel(false);
        let (heartbeat, heartbeat_rx) = watch::channel(options.initial_heartbeat);

        let writer = tokio::spawn(write_loop(
            session.clone(),
            sink,
            control_rx,
            channel.clone(),
            registered_rx,
        ));
        let heartbeat_task = tokio::spawn(heartbeat_loop(
            session.clone(),
            control.clone(),
            heartbeat_rx,
            pool,
        ));

        ChannelHandler {
            addr,
            channel,
            stream: Mutex::new(Some(stream)),
            control,
            pending: Arc::new(Semaphore::new(options.max_pending_requests.max(1))),
            registered,
            heartbeat,
            session,
            tasks: Mutex::new(vec![writer, heartbeat_task]),
        }
    }

    pub fn is_registered(&self) -> bool {
        *self.registered.borrow()
    }

    pub fn heartbeat_interval(&self) -> Duration {
        *self.heartbeat.borrow()
    }

    /// Sends the join handshake; registration completes on `Join_Pong`.
    pub async fn register(&self, ping: JoinPing) -> Result<()> {
        info!(
            "joining gateway {} as {} with {} crawlers",
            self.addr,
            ping.node.id,
            ping.crawlers.len()
        );
        self.control
            .send(Frame::JoinPing(ping))
            .await
            .map_err(|_| ServiceError::StreamClosed.into())
    }

    /// Queues `command` for the gateway.
    pub async fn send(&self, command: Command) -> Result<()> {
        self.channel.push_command(command).await
    }

    /// Receive loop. Each inbound request is handed to `on_request` on its own
    /// task with a child of `token`. At most `max_pending_requests` callbacks
    /// run at once; beyond that the loop stops reading until one finishes.
    ///
    /// Returns `Ok` when the gateway ends the stream or `token` is cancelled,
    /// and an error when the transport or the writer fails.
    pub async fn watch<F, Fut>(&self, token: CancellationToken, on_request: F) -> Result<()>
    where
        F: Fn(CancellationToken, CommandRequest) -> Fut + Send + Sync,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut stream = self
            .stream
            .lock()
            .await
            .take()
            .ok_or(ServiceError::AlreadyWatched)?;

        loop {
            let frame = tokio::select! {
                _ = token.cancelled() => return Ok(()),
                _ = self.session.cancelled() => {
                    return Err(ServiceError::StreamClosed.into());
                }
                frame = stream.next() => frame,
            };

            match frame {
                None => {
                    info!("gateway {} closed the stream", self.addr);
                    return Ok(());
                }
                Some(Err(e)) if e.is_service() => return Err(e),
                Some(Err(e)) => error!("dropping undecodable frame: {e}"),
                Some(Ok(Frame::Command(Command {
                    data: CommandData::Request(request),
                    ..
                }))) => {
                    let permit = tokio::select! {
                        _ = token.cancelled() => return Ok(()),
                        _ = self.session.cancelled() => {
                            return Err(ServiceError::StreamClosed.into());
                        }
                        permit = self.pending.clone().acquire_owned() => {
                            permit.map_err(|_| ServiceError::StreamClosed)?
                        }
                    };
                    let callback = on_request(token.child_token(), request);
                    tokio::spawn(async move {
                        let _permit = permit;
                        callback.await;
                    });
                }
                Some(Ok(frame)) => self.handle_frame(frame),
            }
        }
    }

    fn handle_frame(&self, frame: Frame) {
        match frame {
            Frame::JoinPong(pong) => {
                if pong.heartbeat_interval > 0 {
                    self.heartbeat
                        .send_replace(Duration::from_millis(pong.heartbeat_interval));
                }
                self.registered.send_replace(true);
                info!(
                    "registered with gateway {}, heartbeat every {:?}, network delay {}ms",
                    self.addr,
                    self.heartbeat_interval(),
                    pong.network_delay
                );
            }
            Frame::HeartbeatPong(pong) => {
                debug!("heartbeat pong, network delay {}ms", pong.network_delay);
            }
            Frame::Command(command) => {
                error!("unrecognized {} command from gateway", command.kind());
            }
            other => {
                error!("unrecognized frame type {:?} from gateway", other.kind());
            }
        }
    }

    /// Stops the heartbeat and the writer; the writer closes the sink.
    pub async fn close(&self) {
        self.session.cancel();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("session task ended abnormally: {e}");
            }
        }
        self.registered.send_replace(false);
    }
}

impl Drop for ChannelHandler {
    fn drop(&mut self) {
        self.session.cancel();
    }
}

async fn write_loop(
    session: CancellationToken,
    mut sink: FrameSink,
    mut control: mpsc::Receiver<Frame>,
    channel: Channel,
    mut registered: watch::Receiver<bool>,
) {
    let commands = channel.command_receiver.clone();
    let mut commands = tokio::select! {
        _ = session.cancelled() => return,
        guard = commands.lock() => guard,
    };

    let result: Result<()> = loop {
        let can_forward = *registered.borrow_and_update();
        if can_forward && !session.is_cancelled() {
            if let Some(command) = channel.take_retry().await {
                if let Err(e) = forward(&mut sink, &channel, command).await {
                    break Err(e);
                }
                continue;
            }
        }

        tokio::select! {
            biased;
            _ = session.cancelled() => break Ok(()),
            frame = control.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = sink.send(frame).await {
                        break Err(e);
                    }
                }
                None => break Ok(()),
            },
            changed = registered.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
            }
            command = commands.recv(), if can_forward => match command {
                Some(command) => {
                    if let Err(e) = forward(&mut sink, &channel, command).await {
                        break Err(e);
                    }
                }
                None => break Ok(()),
            },
        }
    };

    if let Err(e) = &result {
        error!("gateway writer failed: {e}");
    }
    if let Err(e) = sink.close().await {
        debug!("closing gateway sink: {e}");
    }
    // Ends the receive loop if the writer failed on its own.
    session.cancel();
}

/// Sends one command. On failure the command is parked on the channel for the
/// next session, so delivery is at least once.
async fn forward(sink: &mut FrameSink, channel: &Channel, command: Command) -> Result<()> {
    let kind = command.kind();
    if let Err(e) = sink.send(Frame::Command(command.clone())).await {
        channel.retry_command(command).await;
        return Err(e);
    }
    counter!("crawlet_commands_sent_total", "kind" => kind).increment(1);
    Ok(())
}

async fn heartbeat_loop(
    session: CancellationToken,
    control: mpsc::Sender<Frame>,
    mut interval: watch::Receiver<Duration>,
    pool: Arc<GPool>,
) {
    loop {
        let period = (*interval.borrow_and_update()).max(MIN_HEARTBEAT);
        tokio::select! {
            _ = session.cancelled() => break,
            changed = interval.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep(period) => {
                let ping = HeartbeatPing {
                    timestamp: now_millis(),
                    idle_concurrency: pool.idle_concurrency() as u32,
                };
                if control.send(Frame::HeartbeatPing(ping)).await.is_err() {
                    break;
                }
            }
        }
    }
}
