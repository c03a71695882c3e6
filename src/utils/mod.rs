//! # Utility Modules
//!
//! Supporting utilities used throughout the protocol implementation.
//!
//! ## Components
//! - **Compression**: zlib, LZ4 and Zstd with block and output size limits
//! - **Logging**: subscriber setup and a rate-limited warner
//! - **Metrics**: thread-safe observability counters
//! - **Time**: conversions for persisted timestamps
//!
//! ## Security
//! - Decompression bomb protection (1 MiB output cap)

pub mod compression;
pub mod logging;
pub mod metrics;
pub mod time;

pub use metrics::{Metrics, MetricsSnapshot};
