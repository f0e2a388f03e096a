//! Wire messages, request/response models, configuration and the crawler
//! capability contract shared by the node's components.

pub mod interface;
pub mod model;
