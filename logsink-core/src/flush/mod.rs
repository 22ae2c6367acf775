//! Flush coordinator - commits sealed journal segments to the store
//!
//! A flush rotates the journal, then commits each sealed segment in its own
//! transaction, oldest first. A segment file is deleted only after its
//! transaction commits; on any failure the transaction is rolled back, the
//! failed segment and every later one stay on disk, and the next trigger
//! retries them verbatim.

use crate::journal::{Journal, SealedSegment};
use crate::pipeline::{PipelineConfig, PipelineStats};
use crate::store::{EventStore, StoreTransaction, INSERT_EVENT_SQL};
use crate::{EventRecord, Result};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What started a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushTrigger {
    /// Periodic timer
    Timer,
    /// Active journal grew past the size threshold
    Size,
    /// Final flush during shutdown
    Shutdown,
    /// Explicit request
    Manual,
}

impl fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlushTrigger::Timer => "timer",
            FlushTrigger::Size => "size",
            FlushTrigger::Shutdown => "shutdown",
            FlushTrigger::Manual => "manual",
        };
        f.write_str(name)
    }
}

/// Outcome of one flush
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub trigger: FlushTrigger,
    /// Segments committed and removed
    pub segments: usize,
    /// Records committed
    pub committed: usize,
    /// Malformed lines skipped
    pub skipped: usize,
}

impl FlushReport {
    fn new(trigger: FlushTrigger) -> Self {
        Self {
            trigger,
            segments: 0,
            committed: 0,
            skipped: 0,
        }
    }
}

/// Drives timer, size and shutdown flushes; never runs two at once
pub struct FlushCoordinator {
    journal: Arc<Journal>,
    store: Arc<dyn EventStore>,
    stats: Arc<PipelineStats>,
    size_signal: Arc<Notify>,
    flush_interval: Duration,
    threshold_bytes: u64,
    flush_lock: Mutex<()>,
}

impl FlushCoordinator {
    /// Create a coordinator for `journal` committing into `store`
    pub fn new(
        journal: Arc<Journal>,
        store: Arc<dyn EventStore>,
        stats: Arc<PipelineStats>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            journal,
            store,
            stats,
            size_signal: Arc::new(Notify::new()),
            flush_interval: config.flush_interval,
            threshold_bytes: config.flush_threshold_bytes,
            flush_lock: Mutex::new(()),
        }
    }

    /// Signal the durability writer raises when the journal passes the threshold
    pub fn size_signal(&self) -> Arc<Notify> {
        self.size_signal.clone()
    }

    /// Check if the active journal is past the size threshold
    pub fn over_threshold(&self) -> bool {
        self.journal.active_size() > self.threshold_bytes
    }

    /// Commit everything currently in the journal
    pub async fn flush(&self, trigger: FlushTrigger) -> Result<FlushReport> {
        let _guard = self.flush_lock.lock().await;
        let started = std::time::Instant::now();

        let journal = self.journal.clone();
        let segments = tokio::task::spawn_blocking(move || journal.rotate()).await??;

        let mut report = FlushReport::new(trigger);
        if segments.is_empty() {
            debug!("Nothing to flush ({} trigger)", trigger);
            return Ok(report);
        }

        for segment in segments {
            let segment_id = segment.id();
            match self.commit_segment(segment).await {
                Ok((committed, skipped)) => {
                    report.segments += 1;
                    report.committed += committed;
                    report.skipped += skipped;
                }
                Err(e) => {
                    self.stats.record_flush_failure();
                    error!(
                        "Flush ({} trigger) failed on segment {}, kept for retry: {}",
                        trigger, segment_id, e
                    );
                    return Err(e);
                }
            }
        }

        self.stats.record_flush();
        info!(
            "Flushed {} records from {} segments to {} in {:?} ({} trigger)",
            report.committed,
            report.segments,
            self.store.name(),
            started.elapsed(),
            trigger
        );
        Ok(report)
    }

    /// Periodic flush loop; returns once `stop` fires
    ///
    /// A flush already in progress when `stop` fires runs to completion.
    pub async fn run(self: Arc<Self>, stop: CancellationToken) {
        let period = self.flush_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Flush task started (interval={:?}, threshold={} bytes)",
            period, self.threshold_bytes
        );

        loop {
            let trigger = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = ticker.tick() => FlushTrigger::Timer,
                _ = self.size_signal.notified() => {
                    if !self.over_threshold() {
                        continue;
                    }
                    FlushTrigger::Size
                }
            };

            if let Err(e) = self.flush(trigger).await {
                warn!("Scheduled flush failed, retrying on next trigger: {}", e);
            }
        }

        debug!("Flush task stopped");
    }

    /// Commit one segment, returning (committed, skipped) record counts
    async fn commit_segment(&self, segment: SealedSegment) -> Result<(usize, usize)> {
        let reader = segment.clone();
        let batch = tokio::task::spawn_blocking(move || reader.read_batch()).await??;

        if batch.skipped > 0 {
            warn!(
                "Segment {} had {} malformed lines, skipped",
                segment.id(),
                batch.skipped
            );
            self.stats.record_skipped(batch.skipped);
        }

        if !batch.records.is_empty() {
            let mut tx = self.store.begin().await?;
            if let Err(e) = insert_all(tx.as_mut(), &batch.records).await {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("Rollback of segment {} failed: {}", segment.id(), rollback_err);
                }
                return Err(e);
            }
            tx.commit().await?;
            self.stats.record_committed(batch.records.len());
        }

        let segment_id = segment.id();
        if let Err(e) = tokio::task::spawn_blocking(move || segment.discard()).await? {
            error!(
                "Segment {} was committed but could not be removed, its records may be committed again: {}",
                segment_id, e
            );
        }

        Ok((batch.records.len(), batch.skipped))
    }
}

async fn insert_all(tx: &mut dyn StoreTransaction, records: &[EventRecord]) -> Result<()> {
    tx.prepare(INSERT_EVENT_SQL).await?;
    for record in records {
        tx.execute(record).await?;
    }
    Ok(())
}
