//! Domain Layer - Core streaming types and subscription bookkeeping.
//!
//! This layer contains the stream key codec, the decoded market data
//! types and the subscription registry. Nothing here performs I/O.

/// Stream keys, market data types and connection state.
pub mod streaming;

/// Handler and observer registry.
pub mod subscription;
