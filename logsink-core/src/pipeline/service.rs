//! Pipeline - top-level coordinator

use super::{DurabilityWriter, PipelineConfig, PipelineStats, StatsSnapshot};
use crate::flush::{FlushCoordinator, FlushReport, FlushTrigger};
use crate::journal::Journal;
use crate::queue::{self, EventSender};
use crate::store::EventStore;
use crate::{EventRecord, Result, SinkError};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Running ingestion pipeline
///
/// Owns the queue, the durability writer task and the periodic flush task.
pub struct Pipeline {
    config: PipelineConfig,
    sender: EventSender,
    journal: Arc<Journal>,
    coordinator: Arc<FlushCoordinator>,
    stats: Arc<PipelineStats>,
    writer_stop: CancellationToken,
    timer_stop: CancellationToken,
    tasks: Mutex<Option<PipelineTasks>>,
}

struct PipelineTasks {
    writer: JoinHandle<()>,
    timer: JoinHandle<()>,
}

/// Pipeline state reported by `/stats`
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub queue_len: usize,
    pub queue_capacity: usize,
    pub journal_bytes: u64,
    pub pending_segments: usize,
    #[serde(flatten)]
    pub counters: StatsSnapshot,
}

impl Pipeline {
    /// Open the journal and start the writer and flush tasks
    ///
    /// Must be called from within a Tokio runtime. Data left in the journal
    /// by a previous run is committed by the first flush.
    pub fn start(config: PipelineConfig, store: Arc<dyn EventStore>) -> Result<Self> {
        config.validate()?;

        let journal = Arc::new(Journal::open(config.journal.clone())?);
        let stats = Arc::new(PipelineStats::default());
        let coordinator = Arc::new(FlushCoordinator::new(
            journal.clone(),
            store,
            stats.clone(),
            &config,
        ));

        let (sender, receiver) = queue::channel(config.queue_capacity, config.enqueue_timeout);
        let writer = DurabilityWriter::new(
            journal.clone(),
            receiver,
            coordinator.size_signal(),
            config.flush_threshold_bytes,
            stats.clone(),
        );

        let writer_stop = CancellationToken::new();
        let timer_stop = CancellationToken::new();
        let tasks = PipelineTasks {
            writer: tokio::spawn(writer.run(writer_stop.clone())),
            timer: tokio::spawn(coordinator.clone().run(timer_stop.clone())),
        };

        info!(
            "Pipeline started (journal={:?}, queue_capacity={})",
            config.journal.path, config.queue_capacity
        );

        Ok(Self {
            config,
            sender,
            journal,
            coordinator,
            stats,
            writer_stop,
            timer_stop,
            tasks: Mutex::new(Some(tasks)),
        })
    }

    /// Queue a validated record for durable storage
    pub async fn ingest(&self, record: EventRecord) -> Result<()> {
        record.validate()?;
        match self.sender.enqueue(record).await {
            Ok(()) => {
                self.stats.record_accepted();
                Ok(())
            }
            Err(e) => {
                self.stats.record_rejected();
                Err(e)
            }
        }
    }

    /// Producer handle onto the event queue
    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    /// Flush the journal now
    pub async fn flush(&self) -> Result<FlushReport> {
        self.coordinator.flush(FlushTrigger::Manual).await
    }

    /// Current counters and buffer levels
    pub fn status(&self) -> PipelineStatus {
        let pending_segments = match self.journal.pending_segments() {
            Ok(segments) => segments.len(),
            Err(e) => {
                warn!("Failed to list pending journal segments: {}", e);
                0
            }
        };

        PipelineStatus {
            queue_len: self.sender.len(),
            queue_capacity: self.sender.capacity(),
            journal_bytes: self.journal.active_size(),
            pending_segments,
            counters: self.stats.snapshot(),
        }
    }

    /// Counter snapshot
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop the timer, drain the queue into the journal and run the final flush
    ///
    /// All steps share one deadline, `shutdown_grace` from now. Whatever could
    /// not be flushed by then stays in the journal for the next startup.
    pub async fn shutdown(&self) -> Result<FlushReport> {
        let tasks = self
            .tasks
            .lock()
            .take()
            .ok_or_else(|| SinkError::Internal("pipeline already shut down".into()))?;
        let grace = self.config.shutdown_grace;
        let deadline = Instant::now() + grace;

        info!("Shutting down pipeline (grace={:?})", grace);
        self.timer_stop.cancel();
        self.writer_stop.cancel();

        match timeout_at(deadline, tasks.writer).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Durability writer task failed: {}", e),
            Err(_) => warn!(
                "Durability writer did not drain within {:?}, queued records not yet in the journal are lost",
                grace
            ),
        }

        match timeout_at(deadline, tasks.timer).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Flush task failed: {}", e),
            Err(_) => warn!("Flush task did not stop within {:?}", grace),
        }

        match timeout_at(deadline, self.coordinator.flush(FlushTrigger::Shutdown)).await {
            Ok(Ok(report)) => {
                info!("Shutdown flush committed {} records", report.committed);
                Ok(report)
            }
            Ok(Err(e)) => {
                error!(
                    "Shutdown flush failed, journal kept at {:?} for next startup: {}",
                    self.journal.path(),
                    e
                );
                Err(e)
            }
            Err(_) => {
                error!(
                    "Shutdown did not finish within {:?}, journal kept at {:?} for next startup",
                    grace,
                    self.journal.path()
                );
                Err(SinkError::Timeout(format!(
                    "shutdown exceeded {:?}",
                    grace
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::JournalConfig;
    use crate::store::{FailurePoint, MemoryStore};
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> PipelineConfig {
        PipelineConfig {
            journal: JournalConfig::new(dir.path().join("events.ndjson")),
            flush_interval: Duration::from_secs(3600),
            shutdown_grace: Duration::from_secs(5),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_ingest_then_shutdown() {
        let temp_dir = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let pipeline = Pipeline::start(config(&temp_dir), Arc::new(store.clone())).unwrap();

        for i in 0..10 {
            pipeline
                .ingest(EventRecord::new(100 + i, i, "login").unwrap())
                .await
                .unwrap();
        }

        let report = pipeline.shutdown().await.unwrap();
        assert_eq!(report.trigger, FlushTrigger::Shutdown);
        assert_eq!(store.row_count(), 10);
        assert_eq!(pipeline.stats().accepted, 10);
        assert_eq!(pipeline.stats().committed, 10);
    }

    #[tokio::test]
    async fn test_ingest_after_shutdown_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let pipeline = Pipeline::start(config(&temp_dir), Arc::new(MemoryStore::new())).unwrap();
        pipeline.shutdown().await.unwrap();

        let err = pipeline
            .ingest(EventRecord::new(1, 1, "late").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::QueueClosed));
        assert_eq!(pipeline.stats().rejected, 1);
        assert!(pipeline.shutdown().await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config = PipelineConfig {
            queue_capacity: 0,
            ..config(&temp_dir)
        };
        assert!(matches!(
            Pipeline::start(config, Arc::new(MemoryStore::new())),
            Err(SinkError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_steps_share_one_grace_period() {
        let temp_dir = TempDir::new().unwrap();
        let store = MemoryStore::new();
        store.fail_at(FailurePoint::Hang);
        let grace = Duration::from_millis(300);
        let pipeline = Pipeline::start(
            PipelineConfig {
                flush_interval: Duration::from_millis(20),
                shutdown_grace: grace,
                ..config(&temp_dir)
            },
            Arc::new(store.clone()),
        )
        .unwrap();

        // A timer flush gets stuck in the store while holding the flush lock
        pipeline
            .ingest(EventRecord::new(1, 1, "stuck").unwrap())
            .await
            .unwrap();
        while store.transactions_begun() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let started = std::time::Instant::now();
        let err = pipeline.shutdown().await.unwrap_err();
        assert!(matches!(err, SinkError::Timeout(_)));
        assert!(started.elapsed() < grace * 2, "took {:?}", started.elapsed());
    }
}
