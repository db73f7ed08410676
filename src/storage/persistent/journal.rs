//! [`RecordJournal`] backed by a write-ahead log in a locked directory.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{StoreError, StoreResult};
use crate::storage::{JournalEntry, RecordJournal};

use super::file_lock::FileLock;
use super::wal::WriteAheadLog;
use super::PersistentConfig;

/// Name of the log file inside a store directory.
pub const WAL_FILE: &str = "stash.wal";

/// Records per batch written by compaction.
const COMPACT_BATCH: usize = 512;

/// Durable journal: one WAL file guarded by a directory lock.
#[derive(Debug)]
pub struct WalJournal {
    dir: PathBuf,
    wal: WriteAheadLog,
    config: PersistentConfig,
    /// Size at which the next compaction is due.
    compact_at: AtomicU64,
    _lock: FileLock,
}

impl WalJournal {
    /// Locks `dir` (creating it if needed) and opens its log.
    pub fn open(dir: &Path, config: PersistentConfig) -> StoreResult<Self> {
        let config = config.validate()?;
        std::fs::create_dir_all(dir)?;
        let lock = FileLock::acquire(dir)?;
        let wal = WriteAheadLog::open(&dir.join(WAL_FILE), config.sync_on_write)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            wal,
            compact_at: AtomicU64::new(config.max_wal_size),
            config,
            _lock: lock,
        })
    }

    /// Store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current log size in bytes.
    pub fn size_bytes(&self) -> StoreResult<u64> {
        Ok(self.wal.size_bytes()?)
    }
}

impl RecordJournal for WalJournal {
    fn append(&self, entries: Vec<JournalEntry>) -> StoreResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        self.wal.append(entries)?;
        Ok(())
    }

    fn recover(&self) -> StoreResult<Vec<JournalEntry>> {
        let mut out = Vec::new();
        for entry in self.wal.iter()? {
            match entry {
                Ok(entry) => out.extend(entry.batch),
                Err(e) => {
                    return Err(StoreError::storage(format!(
                        "WAL in {} is corrupt: {e}",
                        self.dir.display()
                    )))
                }
            }
        }
        Ok(out)
    }

    fn compact(&self, live: Vec<JournalEntry>) -> StoreResult<()> {
        let mut batches = Vec::with_capacity(live.len() / COMPACT_BATCH + 1);
        let mut rest = live.into_iter().peekable();
        while rest.peek().is_some() {
            batches.push(rest.by_ref().take(COMPACT_BATCH).collect::<Vec<_>>());
        }
        let size = self.wal.rewrite(batches)?;
        // Leave headroom when live data alone is near the bound, otherwise
        // every write would compact again.
        let next = self.config.max_wal_size.max(size.saturating_mul(2));
        self.compact_at.store(next, Ordering::Relaxed);
        Ok(())
    }

    fn needs_compaction(&self) -> bool {
        self.wal
            .size_bytes()
            .is_ok_and(|size| size > self.compact_at.load(Ordering::Relaxed))
    }
}
