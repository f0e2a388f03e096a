pub mod channel;

pub use crate::queue::channel::Channel;
