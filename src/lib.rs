//! crawlet: a crawl node that receives scrape requests from a gateway over a
//! duplex stream, runs them on registered site crawlers and streams the
//! results back.

pub mod crawlers;
pub mod prelude;

#[path = "common/lib.rs"]
pub mod common;
#[path = "downloader/lib.rs"]
pub mod downloader;
#[path = "engine/lib.rs"]
pub mod engine;
#[path = "errors/lib.rs"]
pub mod errors;
#[path = "queue/lib.rs"]
pub mod queue;
#[path = "utils/lib.rs"]
pub mod utils;
