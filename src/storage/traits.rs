//! Collaborator traits for the storage layer.
//!
//! The document store is generic over two seams:
//! - [`ObjectSerializer`]: turns a [`VersionedObject`] into storage bytes and back
//! - [`RecordJournal`]: durability backend that sees every committed mutation
//!
//! The in-memory configuration uses [`NullJournal`]; the `persistent` feature
//! provides a write-ahead-log journal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::object::{Uid, VersionedObject};

/// Metadata kept beside a record, outside its business fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMeta {
    /// When the record was first stored.
    pub created_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
    /// Fingerprint of the key that created the record.
    pub created_by: Option<String>,
}

impl RecordMeta {
    pub(crate) fn created(by: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            created_by: by,
        }
    }

    pub(crate) fn touched(&self) -> Self {
        Self {
            updated_at: Utc::now(),
            ..self.clone()
        }
    }
}

/// A record as held by a partition: serialized payload plus metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Record identity.
    pub uid: Uid,
    /// Version the payload was written at.
    pub version: u32,
    /// Serializer output, hex-encoded when the record itself is serialized.
    #[serde(with = "hex_bytes")]
    pub bytes: Vec<u8>,
    /// Side metadata.
    pub meta: RecordMeta,
}

mod hex_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(D::Error::custom)
    }
}

/// One committed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalEntry {
    /// Insert or overwrite a record.
    Put {
        /// Owning partition.
        partition: String,
        /// Encoded record.
        record: StoredRecord,
    },
    /// Remove a record.
    Delete {
        /// Owning partition.
        partition: String,
        /// Removed record.
        uid: Uid,
    },
}

impl JournalEntry {
    /// Partition the entry belongs to.
    #[must_use]
    pub fn partition(&self) -> &str {
        match self {
            Self::Put { partition, .. } | Self::Delete { partition, .. } => partition,
        }
    }
}

/// Converts objects to storage bytes and back.
pub trait ObjectSerializer: Send + Sync {
    /// Encodes an object.
    fn serialize(&self, obj: &VersionedObject) -> StoreResult<Vec<u8>>;

    /// Decodes bytes written at `target_version`.
    fn deserialize(&self, bytes: &[u8], target_version: u32) -> StoreResult<VersionedObject>;
}

/// Durability backend.
///
/// # Safety Considerations
/// - `append` is called while the partition write lock is held; a failed
///   append aborts the mutation before any in-memory state changes
/// - a batch passed to `append` must be recovered all-or-nothing
pub trait RecordJournal: Send + Sync {
    /// Persists a batch of entries as one unit.
    fn append(&self, entries: Vec<JournalEntry>) -> StoreResult<()>;

    /// Returns every committed entry, oldest first.
    fn recover(&self) -> StoreResult<Vec<JournalEntry>>;

    /// Replaces the journal contents with `live`, one `Put` per live record.
    fn compact(&self, live: Vec<JournalEntry>) -> StoreResult<()>;

    /// Returns true when the journal has grown past its configured bound.
    fn needs_compaction(&self) -> bool {
        false
    }
}

/// Journal that keeps nothing. Used by purely in-memory stores.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullJournal;

impl RecordJournal for NullJournal {
    fn append(&self, _entries: Vec<JournalEntry>) -> StoreResult<()> {
        Ok(())
    }

    fn recover(&self) -> StoreResult<Vec<JournalEntry>> {
        Ok(Vec::new())
    }

    fn compact(&self, _live: Vec<JournalEntry>) -> StoreResult<()> {
        Ok(())
    }
}
