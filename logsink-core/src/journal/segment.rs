//! Sealed journal segments

use super::entry::{decode_line, trim, SEPARATOR};
use crate::{EventRecord, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::warn;

const SEALED_SUFFIX: &str = ".sealed";

/// A journal file that no longer receives appends
#[derive(Debug, Clone)]
pub struct SealedSegment {
    id: u64,
    path: PathBuf,
}

/// Records read from one sealed segment
#[derive(Debug, Default)]
pub struct Batch {
    /// Well-formed records in file order
    pub records: Vec<EventRecord>,
    /// Lines that failed to decode and were skipped
    pub skipped: usize,
}

impl SealedSegment {
    /// Segment sequence number
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Path of the sealed file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the sealed file in bytes
    pub fn len(&self) -> Result<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    /// Check if the sealed file is empty
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Read all records, skipping lines that fail to decode
    pub fn read_batch(&self) -> Result<Batch> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        let mut batch = Batch::default();
        let mut line = Vec::new();
        let mut line_no = 0usize;

        loop {
            line.clear();
            if reader.read_until(SEPARATOR, &mut line)? == 0 {
                break;
            }
            line_no += 1;

            if trim(&line).is_empty() {
                continue;
            }

            match decode_line(&line) {
                Ok(record) => batch.records.push(record),
                Err(e) => {
                    warn!(
                        "Skipping malformed record at {:?} line {}: {}",
                        self.path, line_no, e
                    );
                    batch.skipped += 1;
                }
            }
        }

        Ok(batch)
    }

    /// Delete the sealed file once its batch is committed
    ///
    /// If the file cannot be removed it is truncated instead, so a later
    /// flush finds nothing to commit again.
    pub fn discard(self) -> Result<()> {
        let remove_err = match fs::remove_file(&self.path) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        warn!(
            "Failed to remove sealed segment {:?}, truncating instead: {}",
            self.path, remove_err
        );
        OpenOptions::new()
            .write(true)
            .open(&self.path)
            .and_then(|file| file.set_len(0))?;
        Ok(())
    }

    pub(crate) fn path_for(active: &Path, id: u64) -> PathBuf {
        let mut name = active
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".{:020}{}", id, SEALED_SUFFIX));
        active.with_file_name(name)
    }

    /// Find sealed segments belonging to the journal at `active`, oldest first
    pub(crate) fn discover(active: &Path) -> Result<Vec<SealedSegment>> {
        let dir = match active.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let prefix = match active.file_name().and_then(|n| n.to_str()) {
            Some(name) => format!("{}.", name),
            None => return Ok(Vec::new()),
        };

        let mut segments = Vec::new();
        if !dir.exists() {
            return Ok(segments);
        }

        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if let Some(id) = name
                    .strip_prefix(prefix.as_str())
                    .and_then(|s| s.strip_suffix(SEALED_SUFFIX))
                {
                    if let Ok(id) = id.parse::<u64>() {
                        segments.push(SealedSegment { id, path });
                    }
                }
            }
        }

        segments.sort_by_key(|s| s.id);
        Ok(segments)
    }
}
