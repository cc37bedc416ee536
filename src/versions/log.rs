//! Append-only version log.
//!
//! Every committed run is written as one contiguous batch:
//!
//! ```text
//! Begin { run_id }
//! Expire { .. }*
//! Insert(version)*
//! Commit(run_record)
//! ```
//!
//! Each entry is framed as `len: u32 | MessagePack payload | crc32: u32`.
//! A batch without its `Commit` marker never happened: replay drops it and
//! truncates the file back to the end of the last committed run. Only a tail
//! that stops short of end-of-file is treated this way; a damaged entry with
//! intact bytes after it is corruption and fails the open.

use crate::error::{Result, StoreError};
use crate::reconcile::ChangeSet;
use crate::types::{DimensionVersion, RunId, RunRecord, SurrogateId, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Magic bytes for the version log.
const LOG_MAGIC: &[u8; 4] = b"SCD\0";

/// Current log format version.
const LOG_VERSION: u8 = 1;

/// Size of the file header.
const HEADER_SIZE: u64 = 5;

/// Upper bound on a single encoded entry. Enforced on write and on replay.
pub const MAX_ENTRY_SIZE: usize = 100 * 1024 * 1024;

/// One log entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LogEntry {
    Begin { run_id: RunId },
    Expire { surrogate_id: SurrogateId, effective_end: Timestamp },
    Insert(DimensionVersion),
    Commit(RunRecord),
}

/// A run recovered from the log.
#[derive(Clone, Debug)]
pub struct CommittedRun {
    pub record: RunRecord,
    pub expirations: Vec<(SurrogateId, Timestamp)>,
    pub inserts: Vec<DimensionVersion>,
}

struct LogFile {
    file: File,
    /// End of the last committed run.
    size: u64,
}

/// Durable log of committed runs.
pub struct VersionLog {
    path: PathBuf,
    inner: Mutex<LogFile>,
    /// fsync after every committed run.
    sync_on_commit: bool,
    /// Largest entry `append_run` will write.
    max_entry_size: usize,
    #[cfg(test)]
    fail_next_write: std::sync::atomic::AtomicBool,
}

impl VersionLog {
    /// Create or open a log and replay its committed runs.
    pub fn open(path: impl AsRef<Path>, sync_on_commit: bool) -> Result<(Self, Vec<CommittedRun>)> {
        let path = path.as_ref().to_path_buf();

        let (file, size, runs) = if path.exists() {
            let file = OpenOptions::new().read(true).write(true).open(&path)?;
            let (size, runs) = Self::replay(&file)?;

            let file_len = file.metadata()?.len();
            if file_len > size {
                warn!(
                    path = %path.display(),
                    discarded_bytes = file_len - size,
                    "discarding uncommitted tail of version log"
                );
                file.set_len(size)?;
                file.sync_all()?;
            }

            (file, size, runs)
        } else {
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?;

            file.write_all(LOG_MAGIC)?;
            file.write_all(&[LOG_VERSION])?;
            file.sync_all()?;

            (file, HEADER_SIZE, Vec::new())
        };

        debug!(path = %path.display(), runs = runs.len(), size, "opened version log");

        Ok((
            Self {
                path,
                inner: Mutex::new(LogFile { file, size }),
                sync_on_commit,
                max_entry_size: MAX_ENTRY_SIZE,
                #[cfg(test)]
                fail_next_write: std::sync::atomic::AtomicBool::new(false),
            },
            runs,
        ))
    }

    /// Append a run as one batch ending in its commit marker.
    ///
    /// The whole batch is encoded before anything touches the file, so an
    /// entry that cannot be encoded fails the run with the log untouched. On
    /// a write failure the file is cut back to where it was, so a retry
    /// starts from the same state.
    pub fn append_run(&self, changes: &ChangeSet, record: &RunRecord) -> Result<()> {
        let max = self.max_entry_size;
        let mut buf = Vec::new();
        encode_entry(&mut buf, &LogEntry::Begin { run_id: changes.run_id }, max)?;
        for expiration in &changes.expirations {
            encode_entry(
                &mut buf,
                &LogEntry::Expire {
                    surrogate_id: expiration.surrogate_id,
                    effective_end: expiration.effective_end,
                },
                max,
            )?;
        }
        for version in &changes.inserts {
            encode_entry(&mut buf, &LogEntry::Insert(version.clone()), max)?;
        }
        encode_entry(&mut buf, &LogEntry::Commit(record.clone()), max)?;

        let mut inner = self.inner.lock();
        let start = inner.size;

        let written = Self::write_at(&mut inner.file, start, &buf, self.sync_on_commit)
            .and_then(|()| self.injected_failure());
        if let Err(e) = written {
            warn!(run_id = %changes.run_id, error = %e, "version log write failed, rolling back");
            // Best effort; replay drops the uncommitted tail anyway.
            let _ = inner.file.set_len(start);
            return Err(e);
        }

        inner.size = start + buf.len() as u64;
        Ok(())
    }

    fn write_at(file: &mut File, offset: u64, buf: &[u8], sync: bool) -> Result<()> {
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        // Drop leftovers of an earlier failed write whose rollback also failed.
        file.set_len(offset + buf.len() as u64)?;
        file.flush()?;
        if sync {
            file.sync_data()?;
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn injected_failure(&self) -> Result<()> {
        Ok(())
    }

    #[cfg(test)]
    fn injected_failure(&self) -> Result<()> {
        use std::sync::atomic::Ordering;
        if self.fail_next_write.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::new(
                ErrorKind::Other,
                "injected write failure",
            )));
        }
        Ok(())
    }

    /// Make the next `append_run` fail after its bytes reach the file.
    #[cfg(test)]
    pub(crate) fn fail_next_write(&self) {
        self.fail_next_write
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    #[cfg(test)]
    pub(crate) fn set_max_entry_size(&mut self, max: usize) {
        self.max_entry_size = max;
    }

    /// Force all writes to disk.
    pub fn sync(&self) -> Result<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }

    /// Size of the committed portion of the log.
    pub fn size(&self) -> u64 {
        self.inner.lock().size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every committed run. Returns the end offset of the last one.
    fn replay(file: &File) -> Result<(u64, Vec<CommittedRun>)> {
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(0))?;

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != LOG_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid version log magic".into()));
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != LOG_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported version log version: {}",
                version[0]
            )));
        }

        let mut runs = Vec::new();
        let mut committed_end = HEADER_SIZE;
        let mut offset = HEADER_SIZE;
        let mut pending: Option<CommittedRun> = None;

        while offset < file_len {
            let (entry, len) = match read_entry(&mut reader) {
                Ok(read) => read,
                Err(StoreError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    warn!(offset, "version log ends in a partial entry");
                    break;
                }
                Err(e) => {
                    return Err(StoreError::Corruption(format!(
                        "unreadable version log entry at offset {}: {}",
                        offset, e
                    )));
                }
            };
            offset += len;

            match entry {
                LogEntry::Begin { run_id } => {
                    if let Some(abandoned) = pending.take() {
                        return Err(StoreError::Corruption(format!(
                            "run {} has no commit marker but is followed by run {}",
                            abandoned.record.run_id, run_id
                        )));
                    }
                    pending = Some(CommittedRun {
                        record: RunRecord {
                            run_id,
                            run_timestamp: Timestamp(0),
                            inserted_count: 0,
                            expired_count: 0,
                            retired_count: 0,
                            unchanged_count: 0,
                            rejected_count: 0,
                        },
                        expirations: Vec::new(),
                        inserts: Vec::new(),
                    });
                }
                LogEntry::Expire {
                    surrogate_id,
                    effective_end,
                } => match pending.as_mut() {
                    Some(run) => run.expirations.push((surrogate_id, effective_end)),
                    None => return Err(StoreError::Corruption("Expire entry outside a run".into())),
                },
                LogEntry::Insert(version) => match pending.as_mut() {
                    Some(run) => run.inserts.push(version),
                    None => return Err(StoreError::Corruption("Insert entry outside a run".into())),
                },
                LogEntry::Commit(record) => {
                    let mut run = pending.take().ok_or_else(|| {
                        StoreError::Corruption("Commit entry outside a run".into())
                    })?;
                    if run.record.run_id != record.run_id {
                        return Err(StoreError::Corruption(format!(
                            "Commit for {} closes run {}",
                            record.run_id, run.record.run_id
                        )));
                    }
                    run.record = record;
                    runs.push(run);
                    committed_end = offset;
                }
            }
        }

        if let Some(abandoned) = pending {
            warn!(run_id = %abandoned.record.run_id, "dropping run without commit marker");
        }

        Ok((committed_end, runs))
    }
}

fn encode_entry(buf: &mut Vec<u8>, entry: &LogEntry, max_size: usize) -> Result<()> {
    let encoded = rmp_serde::to_vec(entry)?;
    if encoded.len() > max_size {
        return Err(StoreError::EntryTooLarge {
            size: encoded.len(),
            limit: max_size,
        });
    }

    buf.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
    buf.extend_from_slice(&encoded);
    buf.extend_from_slice(&crc32fast::hash(&encoded).to_le_bytes());

    Ok(())
}

/// Read one framed entry, returning it with its size on disk.
fn read_entry<R: Read>(reader: &mut R) -> Result<(LogEntry, u64)> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > MAX_ENTRY_SIZE {
        return Err(StoreError::Corruption("Log entry too large".into()));
    }

    let mut encoded = vec![0u8; len];
    reader.read_exact(&mut encoded)?;

    let mut checksum_bytes = [0u8; 4];
    reader.read_exact(&mut checksum_bytes)?;
    let expected = u32::from_le_bytes(checksum_bytes);

    let got = crc32fast::hash(&encoded);
    if expected != got {
        return Err(StoreError::ChecksumMismatch { expected, got });
    }

    let entry = rmp_serde::from_slice(&encoded)?;
    Ok((entry, (4 + len + 4) as u64))
}
