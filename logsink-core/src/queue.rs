//! Bounded in-memory event queue
//!
//! Producers (request handlers) hold cloned [`EventSender`]s; the durability
//! writer owns the single [`EventReceiver`]. Records come out in arrival order.
//! A full queue makes `enqueue` wait up to the configured timeout, after which
//! the record is rejected with [`SinkError::Backpressure`].

use crate::{EventRecord, Result, SinkError};
use std::time::Duration;
use tokio::sync::mpsc;

/// Create a bounded queue
pub fn channel(capacity: usize, enqueue_timeout: Duration) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        EventSender {
            tx,
            enqueue_timeout,
        },
        EventReceiver { rx },
    )
}

/// Producer half of the event queue
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<EventRecord>,
    enqueue_timeout: Duration,
}

impl EventSender {
    /// Enqueue a validated record, waiting at most `enqueue_timeout` for room
    pub async fn enqueue(&self, record: EventRecord) -> Result<()> {
        match self.tx.try_send(record) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SinkError::QueueClosed),
            Err(mpsc::error::TrySendError::Full(record)) => {
                match tokio::time::timeout(self.enqueue_timeout, self.tx.send(record)).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(_)) => Err(SinkError::QueueClosed),
                    Err(_) => Err(SinkError::Backpressure {
                        capacity: self.capacity(),
                    }),
                }
            }
        }
    }

    /// Maximum number of buffered records
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Number of records currently buffered
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Check if no records are buffered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if the consumer has closed the queue
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half of the event queue
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<EventRecord>,
}

impl EventReceiver {
    /// Next record in FIFO order, `None` once closed and drained
    pub async fn dequeue(&mut self) -> Option<EventRecord> {
        self.rx.recv().await
    }

    /// Stop accepting new records; buffered records can still be dequeued
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(i: i64) -> EventRecord {
        EventRecord::new(1_700_000_000 + i, i, "login").unwrap()
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (tx, mut rx) = channel(16, Duration::from_millis(10));
        for i in 0..10 {
            tx.enqueue(record(i)).await.unwrap();
        }
        assert_eq!(tx.len(), 10);

        for i in 0..10 {
            let next = rx.dequeue().await.unwrap();
            assert_eq!(next.subject_id(), i);
        }
        assert!(tx.is_empty());
    }

    #[tokio::test]
    async fn test_backpressure_after_bounded_wait() {
        let (tx, _rx) = channel(2, Duration::from_millis(20));
        tx.enqueue(record(1)).await.unwrap();
        tx.enqueue(record(2)).await.unwrap();

        let started = std::time::Instant::now();
        let err = tx.enqueue(record(3)).await.unwrap_err();
        assert!(matches!(err, SinkError::Backpressure { capacity: 2 }));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_blocked_enqueue_succeeds_when_space_frees() {
        let (tx, mut rx) = channel(1, Duration::from_secs(5));
        tx.enqueue(record(1)).await.unwrap();

        let producer = {
            let tx = tx.clone();
            tokio::spawn(async move { tx.enqueue(record(2)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(rx.dequeue().await.unwrap().subject_id(), 1);
        producer.await.unwrap().unwrap();
        assert_eq!(rx.dequeue().await.unwrap().subject_id(), 2);
    }

    #[tokio::test]
    async fn test_close_drains_then_rejects() {
        let (tx, mut rx) = channel(8, Duration::from_millis(10));
        tx.enqueue(record(1)).await.unwrap();
        tx.enqueue(record(2)).await.unwrap();

        rx.close();
        assert!(matches!(
            tx.enqueue(record(3)).await,
            Err(SinkError::QueueClosed)
        ));

        assert_eq!(rx.dequeue().await.unwrap().subject_id(), 1);
        assert_eq!(rx.dequeue().await.unwrap().subject_id(), 2);
        drop(tx);
        assert!(rx.dequeue().await.is_none());
    }
}
