//! In-process store with failure injection

use super::{EventStore, StoreTransaction};
use crate::{EventRecord, Result, SinkError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

/// Where an injected failure fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    /// Opening the transaction
    Begin,
    /// Preparing the insert
    Prepare,
    /// Executing the insert for the record at this zero-based batch position
    Execute { at: usize },
    /// Committing
    Commit,
    /// Opening the transaction never completes
    Hang,
}

/// Event store that keeps committed rows in memory
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    rows: Vec<EventRecord>,
    next_id: i64,
    failure: Option<FailurePoint>,
    begun: usize,
    commits: usize,
    rollbacks: usize,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following transaction fail at `point` until cleared
    pub fn fail_at(&self, point: FailurePoint) {
        self.state.lock().failure = Some(point);
    }

    /// Stop injecting failures
    pub fn clear_failure(&self) {
        self.state.lock().failure = None;
    }

    /// Committed rows in insertion order
    pub fn rows(&self) -> Vec<EventRecord> {
        self.state.lock().rows.clone()
    }

    /// Number of committed rows
    pub fn row_count(&self) -> usize {
        self.state.lock().rows.len()
    }

    /// Number of transactions opened
    pub fn transactions_begun(&self) -> usize {
        self.state.lock().begun
    }

    /// Number of successful commits
    pub fn commits(&self) -> usize {
        self.state.lock().commits
    }

    /// Number of explicit rollbacks
    pub fn rollbacks(&self) -> usize {
        self.state.lock().rollbacks
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let failure = {
            let mut state = self.state.lock();
            if state.failure == Some(FailurePoint::Begin) {
                return Err(SinkError::Transaction("injected begin failure".into()));
            }
            state.begun += 1;
            state.failure
        };
        if failure == Some(FailurePoint::Hang) {
            std::future::pending::<()>().await;
        }

        Ok(Box::new(MemoryTransaction {
            state: self.state.clone(),
            failure,
            staged: Vec::new(),
            prepared: false,
            poisoned: false,
        }))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    failure: Option<FailurePoint>,
    staged: Vec<EventRecord>,
    prepared: bool,
    poisoned: bool,
}

impl MemoryTransaction {
    fn check_usable(&self) -> Result<()> {
        if self.poisoned {
            return Err(SinkError::Transaction(
                "transaction failed earlier, only rollback is allowed".into(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn prepare(&mut self, _sql: &'static str) -> Result<()> {
        self.check_usable()?;
        if self.failure == Some(FailurePoint::Prepare) {
            self.poisoned = true;
            return Err(SinkError::Transaction("injected prepare failure".into()));
        }
        self.prepared = true;
        Ok(())
    }

    async fn execute(&mut self, record: &EventRecord) -> Result<()> {
        self.check_usable()?;
        if !self.prepared {
            return Err(SinkError::Transaction("execute called before prepare".into()));
        }
        if self.failure == Some(FailurePoint::Execute { at: self.staged.len() }) {
            self.poisoned = true;
            return Err(SinkError::Transaction(format!(
                "injected insert failure for {}",
                record
            )));
        }
        self.staged.push(record.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.check_usable()?;
        if self.failure == Some(FailurePoint::Commit) {
            return Err(SinkError::Transaction("injected commit failure".into()));
        }

        let mut state = self.state.lock();
        for record in &self.staged {
            state.next_id += 1;
            let id = state.next_id;
            state.rows.push(record.with_id(id));
        }
        state.commits += 1;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.state.lock().rollbacks += 1;
        Ok(())
    }
}
