//! # Utility Modules
//!
//! Supporting utilities shared by the broker, codec, and transports.
//!
//! ## Components
//! - **Compression**: LZ4 and Zstd with size limits and thresholds
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Thread-safe observability counters
//! - **Timeout**: Async deadline wrappers

pub mod compression;
pub mod logging;
pub mod metrics;
pub mod timeout;
