//! Durable storage backend for StashDB.
//!
//! A store directory holds:
//! - `stash.wal`: write-ahead log of committed batches, CRC32 framed
//! - `stash.lock`: exclusive lock so only one process opens the directory
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       DocumentStore                           │
//! │        partitions (records + indexes, RwLock each)            │
//! ├──────────────────────────────────────────────────────────────┤
//! │                        WalJournal                             │
//! │  ┌─────────────────┐            ┌─────────────────┐           │
//! │  │ WriteAheadLog   │            │ FileLock (flock)│           │
//! │  │ (append-only)   │            │                 │           │
//! │  └─────────────────┘            └─────────────────┘           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! On open the log is replayed; each partition's records are loaded and its
//! indexes rebuilt when the partition is first opened.

mod file_lock;
mod journal;
mod wal;

pub use file_lock::{FileLock, LOCK_FILE};
pub use journal::{WalJournal, WAL_FILE};
pub use wal::{WalEntry, WalIterator, WriteAheadLog};

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::{StoreError, StoreResult};
use crate::migration::MigrationRegistry;
use crate::permission::PermissionPolicy;

use super::{DocumentStore, StoreConfig};

/// Configuration for the durable backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PersistentConfig {
    /// Log size (bytes) past which the store compacts.
    pub max_wal_size: u64,
    /// Whether to fsync after every append.
    pub sync_on_write: bool,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            max_wal_size: 64 * 1024 * 1024, // 64 MB
            sync_on_write: true,
        }
    }
}

impl PersistentConfig {
    const MIN_WAL_SIZE: u64 = 4 * 1024;

    /// Validates the configuration.
    pub fn validate(self) -> StoreResult<Self> {
        if self.max_wal_size < Self::MIN_WAL_SIZE {
            return Err(StoreError::invalid_config(format!(
                "max_wal_size must be at least {} bytes (got {})",
                Self::MIN_WAL_SIZE,
                self.max_wal_size
            )));
        }
        Ok(self)
    }
}

impl DocumentStore {
    /// Opens or creates a durable store in `dir`.
    ///
    /// # Errors
    /// - `Storage` if the directory cannot be created, another process holds
    ///   its lock, or the log is unreadable
    /// - `InvalidConfig` for a bad `config`
    ///
    /// # Example
    /// ```rust,no_run
    /// use std::sync::Arc;
    /// use stashdb::{AllowAll, DocumentStore, MigrationRegistry};
    ///
    /// let registry = Arc::new(MigrationRegistry::builder().finish());
    /// let store = DocumentStore::open("./data.stash", registry, Arc::new(AllowAll), None)?;
    /// # Ok::<(), stashdb::StoreError>(())
    /// ```
    pub fn open(
        dir: impl AsRef<Path>,
        registry: Arc<MigrationRegistry>,
        policy: Arc<dyn PermissionPolicy>,
        config: Option<PersistentConfig>,
    ) -> StoreResult<Self> {
        Self::open_with(dir, registry, policy, config, StoreConfig::default())
    }

    /// [`DocumentStore::open`] with an explicit [`StoreConfig`].
    pub fn open_with(
        dir: impl AsRef<Path>,
        registry: Arc<MigrationRegistry>,
        policy: Arc<dyn PermissionPolicy>,
        config: Option<PersistentConfig>,
        store_config: StoreConfig,
    ) -> StoreResult<Self> {
        let dir = dir.as_ref();
        let journal = WalJournal::open(dir, config.unwrap_or_default())?;
        let wal_bytes = journal.size_bytes()?;
        let store = Self::builder(registry, policy)
            .journal(Arc::new(journal))
            .config(store_config)
            .build()?;
        tracing::info!(dir = %dir.display(), wal_bytes, "persistent store opened");
        Ok(store)
    }
}
