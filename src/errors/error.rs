use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Boxed error detail carried as the source of an [`Error`].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    Request,
    Response,
    Command,
    Service,
    Download,
    Queue,
    Parser,
    Crawler,
    Pool,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Request => write!(f, "request"),
            ErrorKind::Response => write!(f, "response"),
            ErrorKind::Command => write!(f, "command"),
            ErrorKind::Service => write!(f, "service"),
            ErrorKind::Download => write!(f, "download"),
            ErrorKind::Queue => write!(f, "queue"),
            ErrorKind::Parser => write!(f, "parser"),
            ErrorKind::Crawler => write!(f, "crawler"),
            ErrorKind::Pool => write!(f, "pool"),
        }
    }
}

pub struct ErrorInner {
    pub kind: ErrorKind,
    pub source: Option<BoxError>,
    pub message: Option<String>,
}

pub struct Error {
    pub inner: Box<ErrorInner>,
}

impl Error {
    pub fn new<E>(kind: ErrorKind, source: Option<E>) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            inner: Box::new(ErrorInner {
                kind,
                source: source.map(Into::into),
                message: None,
            }),
        }
    }

    pub fn with_message<E>(kind: ErrorKind, message: impl Into<String>, source: Option<E>) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            inner: Box::new(ErrorInner {
                kind,
                source: source.map(Into::into),
                message: Some(message.into()),
            }),
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.inner.kind
    }

    pub fn is_request(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Request)
    }

    pub fn is_response(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Response)
    }

    pub fn is_command(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Command)
    }

    pub fn is_service(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Service)
    }

    pub fn is_download(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Download)
    }

    pub fn is_queue(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Queue)
    }

    pub fn is_parser(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Parser)
    }

    pub fn is_crawler(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Crawler)
    }

    pub fn is_pool(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Pool)
    }

    pub fn is_cancelled(&self) -> bool {
        self.is_pool()
            && self
                .inner
                .source
                .as_ref()
                .and_then(|s| s.downcast_ref::<PoolError>())
                .is_some_and(|e| matches!(e, PoolError::Cancelled))
    }

    pub fn is_timeout(&self) -> bool {
        if let Some(source) = &self.inner.source {
            source.to_string().to_lowercase().contains("timeout")
        } else {
            false
        }
    }

    pub fn is_connect(&self) -> bool {
        if let Some(source) = &self.inner.source {
            let msg = source.to_string().to_lowercase();
            msg.contains("connect") || msg.contains("connection")
        } else {
            false
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_struct("crawlet::Error");
        f.field("kind", &self.inner.kind);
        if let Some(ref message) = self.inner.message {
            f.field("message", message);
        }
        if let Some(ref source) = self.inner.source {
            f.field("source", source);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref message) = self.inner.message {
            write!(f, "{} error: {}", self.inner.kind, message)?;
        } else {
            write!(f, "{} error", self.inner.kind)?;
        }

        if let Some(ref source) = self.inner.source {
            write!(f, ": {source}")?;
        }

        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .source
            .as_ref()
            .map(|e| &**e as &(dyn StdError + 'static))
    }
}

impl From<RequestError> for Error {
    fn from(err: RequestError) -> Self {
        Error::new(ErrorKind::Request, Some(err))
    }
}

impl From<ResponseError> for Error {
    fn from(err: ResponseError) -> Self {
        Error::new(ErrorKind::Response, Some(err))
    }
}

impl From<CommandError> for Error {
    fn from(err: CommandError) -> Self {
        Error::new(ErrorKind::Command, Some(err))
    }
}

impl From<ServiceError> for Error {
    fn from(err: ServiceError) -> Self {
        Error::new(ErrorKind::Service, Some(err))
    }
}

impl From<DownloadError> for Error {
    fn from(err: DownloadError) -> Self {
        Error::new(ErrorKind::Download, Some(err))
    }
}

impl From<QueueError> for Error {
    fn from(err: QueueError) -> Self {
        Error::new(ErrorKind::Queue, Some(err))
    }
}

impl From<ParserError> for Error {
    fn from(value: ParserError) -> Self {
        Error::new(ErrorKind::Parser, Some(value))
    }
}

impl From<CrawlerError> for Error {
    fn from(value: CrawlerError) -> Self {
        Error::new(ErrorKind::Crawler, Some(value))
    }
}

impl From<PoolError> for Error {
    fn from(value: PoolError) -> Self {
        Error::new(ErrorKind::Pool, Some(value))
    }
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("invalid method: {0}")]
    InvalidMethod(String),
    #[error("timeout")]
    Timeout,
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    /// Milliseconds
    #[error("request ttl of {0}ms exceeded")]
    TtlExceeded(u64),
}

#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("body too large: {0} bytes")]
    BodyTooLarge(usize),
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unrecognized frame: {0}")]
    Unrecognized(String),
}

/// Failures of the gateway session itself. These end the receive loop and
/// trigger a reconnect; they are never reported as per-request errors.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("connection failed: {0}")]
    ConnectionFailed(#[source] BoxError),
    #[error("transport error: {0}")]
    Transport(#[source] BoxError),
    #[error("stream closed")]
    StreamClosed,
    #[error("stream already watched")]
    AlreadyWatched,
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("download failed: {0}")]
    DownloadFailed(#[source] BoxError),
    #[error("invalid proxy: {0}")]
    InvalidProxy(#[source] BoxError),
    #[error("network error: {0}")]
    NetworkError(#[source] BoxError),
    #[error("timeout error: {0}")]
    TimeoutError(#[source] BoxError),
    #[error("client error: {0}")]
    ClientError(#[source] BoxError),
    #[error("unsupported download option: {0}")]
    Unsupported(String),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue closed: {0}")]
    Closed(String),
}

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("{0}")]
    InvalidFormat(#[source] BoxError),
    #[error("{0}")]
    JsonParseError(#[source] BoxError),
}

#[derive(Debug, Error)]
pub enum CrawlerError {
    #[error("no crawler found")]
    NotFound,
    #[error("crawler {0} failed to load: {1}")]
    LoadFailed(String, #[source] BoxError),
    #[error("job panicked: {0}")]
    Panicked(String),
    #[error("{0}")]
    Reported(String),
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool cancelled")]
    Cancelled,
    #[error("pool closed")]
    Closed,
}

impl Error {
    pub fn request_timeout() -> Self {
        Error::from(RequestError::Timeout)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::from(CommandError::InvalidArgument(message.into()))
    }

    pub fn transport<E: Into<BoxError>>(source: E) -> Self {
        Error::from(ServiceError::Transport(source.into()))
    }

    pub fn crawler_not_found() -> Self {
        Error::from(CrawlerError::NotFound)
    }

    pub fn cancelled() -> Self {
        Error::from(PoolError::Cancelled)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => Error::request_timeout(),
            std::io::ErrorKind::ConnectionRefused => {
                Error::from(ServiceError::ConnectionFailed(err.into()))
            }
            _ => Error::new(ErrorKind::Service, Some(err)),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::from(CommandError::InvalidArgument(err.to_string()))
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::from(RequestError::InvalidUrl(err.to_string()))
    }
}
