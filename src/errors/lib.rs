pub mod error;

pub use error::{
    BoxError, CommandError, CrawlerError, DownloadError, Error, ErrorKind,
    ParserError, PoolError, QueueError, RequestError, ResponseError, Result, ServiceError,
};
