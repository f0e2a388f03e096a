// Crawler-facing types
pub use crate::common::interface::{
    CrawlOptions, Crawler, CrawlerFactory, Reliability, YieldSink, Yielded,
};
pub use crate::common::model::request::RequestMethod;
pub use crate::common::model::{
    CookieItem, Cookies, Headers, Price, Product, Request, Response, ShareContext,
};

// Errors
pub use crate::errors::{
    BoxError, CrawlerError, Error, ErrorKind, ParserError, RequestError, Result,
};

pub mod common {
    pub use crate::common::model::Command;
    pub use crate::common::model::CommandData;
    pub use crate::common::model::CommandRequest;
    pub use crate::common::model::Config;
    pub use crate::common::model::Frame;
}
pub mod downloader {
    pub use crate::downloader::DownloadOptions;
    pub use crate::downloader::Downloader;
    pub use crate::downloader::RequestDownloader;
}
pub mod engine {
    pub use crate::engine::CrawlerController;
    pub use crate::engine::CrawlerManager;
    pub use crate::engine::GPool;
    pub use crate::engine::Node;
}
pub mod queue {
    pub use crate::queue::Channel;
}
pub mod utils {
    pub use crate::utils::*;
}
