//! Relational store adapters
//!
//! A flush drives one [`StoreTransaction`] per batch: `prepare` the insert,
//! `execute` it once per record, then `commit`. After any failed `execute`
//! the transaction only accepts `rollback`.

mod memory;
mod postgres;

pub use memory::{FailurePoint, MemoryStore};
pub use postgres::{PgEventStore, PgStoreConfig};

use crate::{EventRecord, Result};
use async_trait::async_trait;

/// Parameterized insert for one event row
pub const INSERT_EVENT_SQL: &str =
    "INSERT INTO logs (unix_ts, user_id, event_name) VALUES ($1, $2, $3)";

/// A store able to open write transactions
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Open a new transaction
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;

    /// Short name used in logs
    fn name(&self) -> &str;
}

/// A single open transaction
#[async_trait]
pub trait StoreTransaction: Send {
    /// Prepare the insert statement used by `execute`
    async fn prepare(&mut self, sql: &'static str) -> Result<()>;

    /// Insert one record with the prepared statement
    async fn execute(&mut self, record: &EventRecord) -> Result<()>;

    /// Commit all executed records
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard all executed records
    async fn rollback(self: Box<Self>) -> Result<()>;
}
