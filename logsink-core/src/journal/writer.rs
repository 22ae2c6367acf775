//! Active journal file and segment rotation

use super::entry::{encode_line, SEPARATOR};
use super::{JournalConfig, SealedSegment};
use crate::{EventRecord, Result};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Owner of the active journal file
///
/// The durability writer appends through [`Journal::append`]; the flusher
/// only ever sees files returned by [`Journal::rotate`], which swaps a fresh
/// active file in under the same lock the appends take.
pub struct Journal {
    config: JournalConfig,
    inner: Mutex<JournalInner>,
}

struct JournalInner {
    file: File,
    bytes_written: u64,
    next_segment_id: u64,
    #[cfg(test)]
    fault: Option<Fault>,
}

/// Failure injected into the next append
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    /// Half the line reaches the file, then the write fails
    TornWrite,
    /// The line is written but the sync fails
    Sync,
}

impl Journal {
    /// Open the journal, keeping whatever a previous run left on disk
    ///
    /// A record cut short by a crash is terminated with a separator so the
    /// next append starts on a line of its own.
    pub fn open(config: JournalConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = Self::open_active(&config.path)?;
        let mut bytes_written = file.metadata()?.len();

        if bytes_written > 0 && !ends_with_separator(&config.path)? {
            warn!(
                "Journal {:?} ends in a partial record from an earlier run, it will be skipped at flush",
                config.path
            );
            file.write_all(&[SEPARATOR])?;
            file.sync_data()?;
            bytes_written += 1;
        }

        let pending = SealedSegment::discover(&config.path)?;
        let next_segment_id = pending.last().map(|s| s.id() + 1).unwrap_or(1);

        if bytes_written > 0 || !pending.is_empty() {
            info!(
                "Journal {:?} reopened with {} bytes active and {} sealed segments pending",
                config.path,
                bytes_written,
                pending.len()
            );
        }

        let inner = JournalInner {
            file,
            bytes_written,
            next_segment_id,
            #[cfg(test)]
            fault: None,
        };

        Ok(Self {
            config,
            inner: Mutex::new(inner),
        })
    }

    /// Path of the active journal file
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Append one record and sync it, returning the active file size afterwards
    ///
    /// On error the file is cut back to its previous length, so the record
    /// is not committed by a later flush.
    pub fn append(&self, record: &EventRecord) -> Result<u64> {
        let line = encode_line(record)?;
        let mut inner = self.inner.lock();
        let good_len = inner.bytes_written;

        if let Err(e) = inner.write_line(&line).and_then(|()| inner.sync()) {
            if let Err(truncate_err) = inner.file.set_len(good_len) {
                error!(
                    "Failed to roll journal back to {} bytes, a dropped record may still be committed: {}",
                    good_len, truncate_err
                );
            }
            return Err(e.into());
        }

        inner.bytes_written += line.len() as u64;
        Ok(inner.bytes_written)
    }

    /// Current size of the active file in bytes
    pub fn active_size(&self) -> u64 {
        self.inner.lock().bytes_written
    }

    /// Seal the active file if it holds data and return every sealed
    /// segment awaiting commit, oldest first
    pub fn rotate(&self) -> Result<Vec<SealedSegment>> {
        {
            let mut inner = self.inner.lock();
            if inner.bytes_written > 0 {
                self.seal_active(&mut inner)?;
            }
        }
        self.pending_segments()
    }

    /// Sealed segments awaiting commit, oldest first
    pub fn pending_segments(&self) -> Result<Vec<SealedSegment>> {
        SealedSegment::discover(&self.config.path)
    }

    /// Make the next append fail
    #[cfg(test)]
    pub(crate) fn inject_fault(&self, fault: Fault) {
        self.inner.lock().fault = Some(fault);
    }

    fn seal_active(&self, inner: &mut JournalInner) -> Result<()> {
        inner.file.sync_all()?;

        let segment_id = inner.next_segment_id;
        let sealed_path = SealedSegment::path_for(&self.config.path, segment_id);
        fs::rename(&self.config.path, &sealed_path)?;

        let file = match Self::open_active(&self.config.path) {
            Ok(file) => file,
            Err(e) => {
                // Put the old file back so appends keep landing in the active path
                if let Err(restore_err) = fs::rename(&sealed_path, &self.config.path) {
                    warn!(
                        "Failed to restore journal {:?} after rotation error: {}",
                        sealed_path, restore_err
                    );
                }
                return Err(e);
            }
        };
        sync_parent_dir(&self.config.path);

        debug!(
            "Sealed {} bytes of journal into segment {}",
            inner.bytes_written, segment_id
        );

        inner.file = file;
        inner.bytes_written = 0;
        inner.next_segment_id += 1;

        Ok(())
    }

    fn open_active(path: &PathBuf) -> Result<File> {
        Ok(OpenOptions::new().create(true).append(true).open(path)?)
    }
}

impl JournalInner {
    fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        #[cfg(test)]
        if self.take_fault(Fault::TornWrite) {
            self.file.write_all(&line[..line.len() / 2])?;
            return Err(io::Error::other("injected torn write"));
        }
        self.file.write_all(line)
    }

    fn sync(&mut self) -> io::Result<()> {
        #[cfg(test)]
        if self.take_fault(Fault::Sync) {
            return Err(io::Error::other("injected sync failure"));
        }
        self.file.sync_data()
    }

    #[cfg(test)]
    fn take_fault(&mut self, fault: Fault) -> bool {
        if self.fault == Some(fault) {
            self.fault = None;
            true
        } else {
            false
        }
    }
}

fn ends_with_separator(path: &Path) -> Result<bool> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == SEPARATOR)
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        debug!("Could not sync journal directory {:?}: {}", dir, e);
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}
