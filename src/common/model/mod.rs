pub mod command;
pub mod config;
pub mod context;
pub mod cookies;
pub mod headers;
pub mod item;
pub mod request;
pub mod response;

pub use command::{
    AnyData, Command, CommandData, CommandError, CommandItem, CommandRequest, CrawlerInfo, Frame,
    HeartbeatPing, HeartbeatPong, JoinPing, JoinPong, NodeInfo, RequestOptions,
};
pub use config::Config;
pub use context::{KeyValue, ShareContext, SharingData};
pub use cookies::{CookieItem, Cookies};
pub use headers::{HeaderItem, Headers};
pub use item::{Price, Product};
pub use request::{Request, RequestMethod};
pub use response::Response;
