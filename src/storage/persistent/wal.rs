//! Write-ahead log of journal batches.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [FRAME 1: codec-encoded WalEntry]
//! [FRAME 2: codec-encoded WalEntry]
//! ...
//! ```
//!
//! Each frame holds one batch, so a batch is recovered whole or not at all.
//! A torn or corrupt tail is cut off when the log is opened.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::codec;
use crate::storage::JournalEntry;

/// Length of the file header.
const HEADER_LEN: u64 = 5;

/// One appended batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonic sequence number, restarting at 1 after compaction.
    pub sequence: u64,
    /// When the batch was written.
    pub timestamp: DateTime<Utc>,
    /// Entries committed together.
    pub batch: Vec<JournalEntry>,
}

struct WalState {
    /// `None` once a failed write could not be rolled back.
    writer: Option<BufWriter<File>>,
    sequence: u64,
    size: u64,
}

impl WalState {
    fn writer(&mut self) -> IoResult<&mut BufWriter<File>> {
        self.writer
            .as_mut()
            .ok_or_else(|| std::io::Error::other("WAL is unavailable after a failed write"))
    }

    /// Drops unflushed bytes and cuts the file back to the last acknowledged
    /// frame. On failure the log refuses further appends.
    fn discard_tail(&mut self) {
        let Some(writer) = self.writer.take() else {
            return;
        };
        let (file, _unflushed) = writer.into_parts();
        match file.set_len(self.size) {
            Ok(()) => self.writer = Some(BufWriter::new(file)),
            Err(e) => tracing::error!(error = %e, "WAL rollback failed; log closed for writes"),
        }
    }
}

/// Append-only log file. Thread-safe via an internal mutex.
pub struct WriteAheadLog {
    path: PathBuf,
    state: Mutex<WalState>,
    sync_on_write: bool,
}

impl std::fmt::Debug for WriteAheadLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteAheadLog")
            .field("path", &self.path)
            .field("sync_on_write", &self.sync_on_write)
            .finish_non_exhaustive()
    }
}

/// Result of scanning an existing log.
struct Scan {
    last_sequence: u64,
    valid_len: u64,
}

impl WriteAheadLog {
    /// Opens or creates the log at `path`.
    ///
    /// An existing log is scanned; anything after the last intact frame is
    /// truncated so new appends never follow garbage.
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();

        let (sequence, size) = if len >= HEADER_LEN {
            let scan = Self::scan(path)?;
            if scan.valid_len < len {
                tracing::warn!(
                    path = %path.display(),
                    last_sequence = scan.last_sequence,
                    discarded_bytes = len - scan.valid_len,
                    "WAL has a corrupt tail; truncating"
                );
                file.set_len(scan.valid_len)?;
                file.sync_all()?;
            }
            (scan.last_sequence, scan.valid_len)
        } else {
            let mut file = file;
            file.set_len(0)?;
            codec::write_header(&mut file)?;
            file.sync_all()?;
            (0, HEADER_LEN)
        };

        let file = OpenOptions::new().append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(WalState {
                writer: Some(BufWriter::new(file)),
                sequence,
                size,
            }),
            sync_on_write,
        })
    }

    fn lock(&self) -> IoResult<MutexGuard<'_, WalState>> {
        self.state
            .lock()
            .map_err(|_| std::io::Error::other("WAL mutex poisoned"))
    }

    /// Appends one batch and returns its sequence number.
    pub fn append(&self, batch: Vec<JournalEntry>) -> IoResult<u64> {
        let mut state = self.lock()?;
        let sequence = state.sequence + 1;
        let encoded = codec::encode(&WalEntry {
            sequence,
            timestamp: Utc::now(),
            batch,
        })?;

        let sync = self.sync_on_write;
        let written = state.writer().and_then(|writer| {
            writer.write_all(&encoded)?;
            writer.flush()?;
            if sync {
                writer.get_ref().sync_data()?;
            }
            Ok(())
        });
        if let Err(e) = written {
            state.discard_tail();
            return Err(e);
        }
        state.sequence = sequence;
        state.size += encoded.len() as u64;
        Ok(sequence)
    }

    /// Iterates over the intact entries, oldest first.
    pub fn iter(&self) -> IoResult<WalIterator> {
        WalIterator::new(&self.path)
    }

    /// Last sequence number written.
    pub fn current_sequence(&self) -> IoResult<u64> {
        Ok(self.lock()?.sequence)
    }

    /// Current file size in bytes.
    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(self.lock()?.size)
    }

    /// Replaces the log with `batches`.
    ///
    /// The new log is written beside the old one and renamed over it, so a
    /// crash leaves either the old or the new log intact.
    pub fn rewrite(&self, batches: Vec<Vec<JournalEntry>>) -> IoResult<u64> {
        let mut state = self.lock()?;
        state.writer()?.flush()?;

        let tmp = self.path.with_extension("wal.compact");
        let mut size = HEADER_LEN;
        let mut sequence = 0;
        {
            let mut out = BufWriter::new(
                OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&tmp)?,
            );
            codec::write_header(&mut out)?;
            for batch in batches {
                sequence += 1;
                let encoded = codec::encode(&WalEntry {
                    sequence,
                    timestamp: Utc::now(),
                    batch,
                })?;
                out.write_all(&encoded)?;
                size += encoded.len() as u64;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        // Open the replacement before the rename so a failure keeps the old writer.
        let writer = BufWriter::new(OpenOptions::new().append(true).open(&tmp)?);
        std::fs::rename(&tmp, &self.path)?;
        state.writer = Some(writer);
        if let Some(dir) = self.path.parent() {
            sync_dir(dir)?;
        }

        state.sequence = sequence;
        state.size = size;
        Ok(size)
    }

    fn scan(path: &Path) -> IoResult<Scan> {
        let mut iter = WalIterator::new(path)?;
        let mut scan = Scan {
            last_sequence: 0,
            valid_len: HEADER_LEN,
        };
        loop {
            match iter.next() {
                None => break,
                Some(Ok(entry)) => {
                    scan.last_sequence = entry.sequence;
                    scan.valid_len = iter.position()?;
                }
                Some(Err(e)) => {
                    tracing::warn!(
                        path = %path.display(),
                        after_sequence = scan.last_sequence,
                        error = %e,
                        "WAL replay stopped at corrupt frame"
                    );
                    break;
                }
            }
        }
        Ok(scan)
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> IoResult<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> IoResult<()> {
    Ok(())
}

/// Iterator over WAL entries.
///
/// Yields `Err` once for a corrupt frame; a truncated final frame ends the
/// iteration silently, since it was never acknowledged.
pub struct WalIterator {
    reader: BufReader<File>,
    file_size: u64,
    failed: bool,
}

impl WalIterator {
    fn new(path: &Path) -> IoResult<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        codec::read_header(&mut reader)?;
        Ok(Self {
            reader,
            file_size,
            failed: false,
        })
    }

    fn position(&mut self) -> IoResult<u64> {
        self.reader.stream_position()
    }
}

impl Iterator for WalIterator {
    type Item = IoResult<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.position() {
            Ok(pos) if pos >= self.file_size => return None,
            Ok(_) => {}
            Err(e) => {
                self.failed = true;
                return Some(Err(e));
            }
        }
        match codec::decode(&mut self.reader) {
            Ok(entry) => Some(Ok(entry)),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
