//! Durability writer - sole consumer of the event queue

use super::PipelineStats;
use crate::journal::Journal;
use crate::queue::EventReceiver;
use crate::EventRecord;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Moves records from the queue into the journal, one synced append at a time
pub struct DurabilityWriter {
    journal: Arc<Journal>,
    receiver: EventReceiver,
    size_signal: Arc<Notify>,
    threshold_bytes: u64,
    stats: Arc<PipelineStats>,
}

impl DurabilityWriter {
    /// Create a writer draining `receiver` into `journal`
    pub fn new(
        journal: Arc<Journal>,
        receiver: EventReceiver,
        size_signal: Arc<Notify>,
        threshold_bytes: u64,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            journal,
            receiver,
            size_signal,
            threshold_bytes,
            stats,
        }
    }

    /// Run until `stop` fires, then close the queue and drain what it holds
    pub async fn run(mut self, stop: CancellationToken) {
        loop {
            let record = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                next = self.receiver.dequeue() => match next {
                    Some(record) => record,
                    None => return,
                },
            };
            self.write(record).await;
        }

        self.receiver.close();
        let mut drained = 0usize;
        while let Some(record) = self.receiver.dequeue().await {
            self.write(record).await;
            drained += 1;
        }
        info!("Durability writer stopped after draining {} queued records", drained);
    }

    async fn write(&self, record: EventRecord) {
        let journal = self.journal.clone();
        let description = record.to_string();

        match tokio::task::spawn_blocking(move || journal.append(&record)).await {
            Ok(Ok(size)) => {
                self.stats.record_appended();
                if size > self.threshold_bytes {
                    self.size_signal.notify_one();
                }
            }
            Ok(Err(e)) => {
                self.stats.record_dropped();
                error!("Failed to write {} to journal, record dropped: {}", description, e);
            }
            Err(e) => {
                self.stats.record_dropped();
                error!("Journal append task for {} failed, record dropped: {}", description, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{Fault, JournalConfig};
    use crate::queue;
    use std::time::Duration;
    use tempfile::TempDir;

    fn record(i: i64) -> EventRecord {
        EventRecord::new(1_700_000_000 + i, i, "login").unwrap()
    }

    #[tokio::test]
    async fn test_writer_drains_on_stop() {
        let temp_dir = TempDir::new().unwrap();
        let journal =
            Arc::new(Journal::open(JournalConfig::new(temp_dir.path().join("events.ndjson"))).unwrap());
        let stats = Arc::new(PipelineStats::default());
        let (tx, rx) = queue::channel(64, Duration::from_millis(10));

        for i in 0..20 {
            tx.enqueue(record(i)).await.unwrap();
        }

        let writer = DurabilityWriter::new(
            journal.clone(),
            rx,
            Arc::new(Notify::new()),
            u64::MAX,
            stats.clone(),
        );
        let stop = CancellationToken::new();
        stop.cancel();
        writer.run(stop).await;

        assert_eq!(stats.snapshot().appended, 20);
        assert!(tx.is_closed());

        let segments = journal.rotate().unwrap();
        let batch = segments[0].read_batch().unwrap();
        let ids: Vec<i64> = batch.records.iter().map(|r| r.subject_id()).collect();
        assert_eq!(ids, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_writer_signals_threshold() {
        let temp_dir = TempDir::new().unwrap();
        let journal =
            Arc::new(Journal::open(JournalConfig::new(temp_dir.path().join("events.ndjson"))).unwrap());
        let stats = Arc::new(PipelineStats::default());
        let signal = Arc::new(Notify::new());
        let (tx, rx) = queue::channel(8, Duration::from_millis(10));

        let writer = DurabilityWriter::new(journal.clone(), rx, signal.clone(), 1, stats);
        let stop = CancellationToken::new();
        let handle = tokio::spawn(writer.run(stop.clone()));

        tx.enqueue(record(1)).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), signal.notified())
            .await
            .expect("size signal not raised");

        stop.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_append_drops_record_and_keeps_consuming() {
        let temp_dir = TempDir::new().unwrap();
        let journal =
            Arc::new(Journal::open(JournalConfig::new(temp_dir.path().join("events.ndjson"))).unwrap());
        let stats = Arc::new(PipelineStats::default());
        let (tx, rx) = queue::channel(8, Duration::from_millis(10));

        let writer = DurabilityWriter::new(
            journal.clone(),
            rx,
            Arc::new(Notify::new()),
            u64::MAX,
            stats.clone(),
        );
        let stop = CancellationToken::new();
        let handle = tokio::spawn(writer.run(stop.clone()));

        tx.enqueue(record(1)).await.unwrap();
        while stats.snapshot().appended < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        journal.inject_fault(Fault::TornWrite);
        tx.enqueue(record(2)).await.unwrap();
        tx.enqueue(record(3)).await.unwrap();
        while stats.snapshot().appended < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        stop.cancel();
        handle.await.unwrap();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.dropped, 1);
        assert_eq!(snapshot.appended, 2);

        let segments = journal.rotate().unwrap();
        let batch = segments[0].read_batch().unwrap();
        let subjects: Vec<i64> = batch.records.iter().map(|r| r.subject_id()).collect();
        assert_eq!(subjects, vec![1, 3]);
        assert_eq!(batch.skipped, 0);
    }
}
