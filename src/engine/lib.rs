//! Job execution: the bounded worker pool, the crawler registry, the gateway
//! connection handler and the controller tying them together.

pub mod codec;
pub mod connection;
pub mod controller;
pub mod manager;
pub mod node;
pub mod pool;

pub use connection::{ChannelHandler, Connection, HandlerOptions};
pub use controller::CrawlerController;
pub use manager::{CrawlerEntry, CrawlerManager};
pub use node::Node;
pub use pool::GPool;
