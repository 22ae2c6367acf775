//! Ingestion pipeline - wires the queue, durability writer and flusher

mod service;
mod stats;
mod writer;

pub use service::{Pipeline, PipelineStatus};
pub use stats::{PipelineStats, StatsSnapshot};
pub use writer::DurabilityWriter;

use crate::journal::JournalConfig;
use std::time::Duration;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Journal configuration
    pub journal: JournalConfig,
    /// Maximum records buffered in memory
    pub queue_capacity: usize,
    /// How long `enqueue` waits for room before reporting backpressure
    pub enqueue_timeout: Duration,
    /// Period of the timer-triggered flush
    pub flush_interval: Duration,
    /// Active journal size that triggers an early flush
    pub flush_threshold_bytes: u64,
    /// Time budget shared by the shutdown steps (writer drain, timer stop, final flush)
    pub shutdown_grace: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            journal: JournalConfig::default(),
            queue_capacity: crate::config::QUEUE_CAPACITY,
            enqueue_timeout: Duration::from_millis(crate::config::ENQUEUE_TIMEOUT_MS),
            flush_interval: Duration::from_secs(crate::config::FLUSH_INTERVAL_SECS),
            flush_threshold_bytes: crate::config::FLUSH_THRESHOLD_BYTES,
            shutdown_grace: Duration::from_secs(crate::config::SHUTDOWN_GRACE_SECS),
        }
    }
}

impl PipelineConfig {
    /// Check the configuration for values the pipeline cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.queue_capacity == 0 {
            return Err(crate::SinkError::Config(
                "queue capacity must be at least 1".into(),
            ));
        }
        if self.flush_interval.is_zero() {
            return Err(crate::SinkError::Config(
                "flush interval must be greater than zero".into(),
            ));
        }
        if self.flush_threshold_bytes == 0 {
            return Err(crate::SinkError::Config(
                "flush threshold must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
