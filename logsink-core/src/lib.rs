//! Logsink Core - Durable Event Ingestion Pipeline
//!
//! Accepts discrete log events, buffers them in memory and in an append-only
//! journal on local disk, and periodically commits them in batches to a
//! relational store.
//!
//! # Architecture
//!
//! - **Queue**: bounded FIFO between request handlers and the writer
//! - **Journal**: append-only durability file, rotated into sealed segments
//! - **Durability writer**: single task appending and syncing each record
//! - **Flush coordinator**: timer, size and shutdown triggered batch commits
//! - **Store**: transactional adapters (PostgreSQL, in-memory)

pub mod flush;
pub mod journal;
pub mod pipeline;
pub mod queue;
pub mod store;

mod error;
mod types;

pub use error::{Result, SinkError};
pub use types::*;

/// Logsink version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// Records buffered in memory before producers see backpressure
    pub const QUEUE_CAPACITY: usize = 15_000;

    /// How long a producer waits for queue space (100ms)
    pub const ENQUEUE_TIMEOUT_MS: u64 = 100;

    /// Timer-triggered flush period (30s)
    pub const FLUSH_INTERVAL_SECS: u64 = 30;

    /// Active journal size that triggers an early flush (10MB)
    pub const FLUSH_THRESHOLD_BYTES: u64 = 10 * 1024 * 1024;

    /// Grace period for each shutdown step (10s)
    pub const SHUTDOWN_GRACE_SECS: u64 = 10;

    /// Active journal file
    pub const JOURNAL_PATH: &str = "data/logs.ndjson";
}
