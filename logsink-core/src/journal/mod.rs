//! Durability journal
//!
//! Every accepted record is appended to the active journal file as one JSON
//! line and synced before the next record is taken. A record whose write or
//! sync fails is cut from the file again, so it never reaches the store.
//!
//! A flush seals the active file under the journal lock and hands the sealed
//! segment to the flusher, so appends never share a file with a reader.
//! Sealed segments are removed only after their batch is committed.

mod entry;
mod segment;
mod writer;

pub use entry::{decode_line, encode_line};
pub use segment::{Batch, SealedSegment};
pub use writer::Journal;

#[cfg(test)]
pub(crate) use writer::Fault;

use std::path::PathBuf;

/// Journal configuration
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Path of the active journal file
    pub path: PathBuf,
}

impl JournalConfig {
    /// Journal at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self::new(crate::config::JOURNAL_PATH)
    }
}
