//! Configuration Module
//!
//! Configuration loading for the market stream binary.

mod settings;

pub use settings::{ConfigError, StreamConfig, StreamSetMode, UnknownMode, WebSocketSettings};
