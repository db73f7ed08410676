//! Storage layer for StashDB.
//!
//! A [`DocumentStore`] owns a set of [`Partition`]s. Each partition keeps its
//! records and indexes behind one lock and writes through a [`RecordJournal`].
//! Serialization is delegated to an [`ObjectSerializer`].

mod codec;
mod document_store;
mod events;
mod partition;
mod query;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use codec::{decode, encode, read_header, write_header, JsonSerializer, MAGIC};
pub use document_store::{DocumentStore, DocumentStoreBuilder, StoreConfig};
pub use events::{PartitionStats, StatsSnapshot, StoreEvent, StoreOp};
pub use partition::{IndexSpec, Partition, PartitionSettings};
pub use query::{PartitionKey, QueryKey, QueryKeys};
pub use traits::{JournalEntry, NullJournal, ObjectSerializer, RecordJournal, RecordMeta, StoredRecord};
