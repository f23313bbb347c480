//! Application Services
//!
//! - `StreamManager`: subscribe/unsubscribe facade over one socket
//! - `StreamManagerSlot`: owner of the process's shared manager
//! - `LiveMarketFeed`: one consumer's symbol subscription and state channel

mod feed;
mod manager;

pub use feed::LiveMarketFeed;
pub use manager::{StreamManager, StreamManagerSlot};
