//! Core types for Logsink

use crate::{Result, SinkError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp in seconds since Unix epoch
pub type UnixSeconds = i64;

/// A single logged event
///
/// Records are immutable once built. The `id` is assigned by the store on
/// insert and never serialized into the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(default, skip_serializing)]
    id: Option<i64>,
    #[serde(rename = "unix_ts")]
    timestamp: UnixSeconds,
    #[serde(rename = "user_id")]
    subject_id: i64,
    event_name: String,
}

impl EventRecord {
    /// Create a validated event record
    pub fn new(
        timestamp: UnixSeconds,
        subject_id: i64,
        event_name: impl Into<String>,
    ) -> Result<Self> {
        let record = Self {
            id: None,
            timestamp,
            subject_id,
            event_name: event_name.into(),
        };
        record.validate()?;
        Ok(record)
    }

    /// Check the record invariants
    pub fn validate(&self) -> Result<()> {
        if self.event_name.trim().is_empty() {
            return Err(SinkError::InvalidRecord(
                "event_name must be a non-empty string".into(),
            ));
        }
        Ok(())
    }

    /// Store-assigned id, if the record was read back from the store
    pub fn id(&self) -> Option<i64> {
        self.id
    }

    /// Event time in unix seconds
    pub fn timestamp(&self) -> UnixSeconds {
        self.timestamp
    }

    /// Subject (user) the event belongs to
    pub fn subject_id(&self) -> i64 {
        self.subject_id
    }

    /// Event name
    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    /// Copy of this record carrying a store-assigned id
    pub(crate) fn with_id(&self, id: i64) -> Self {
        Self {
            id: Some(id),
            ..self.clone()
        }
    }

    /// Same event, ignoring any store-assigned id
    pub fn same_event(&self, other: &EventRecord) -> bool {
        self.timestamp == other.timestamp
            && self.subject_id == other.subject_id
            && self.event_name == other.event_name
    }
}

impl fmt::Display for EventRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} user={}",
            self.event_name, self.timestamp, self.subject_id
        )
    }
}
