//! # StashDB - Versioned, Permissioned Object Store
//!
//! StashDB stores application objects whose shape changes over time. Every
//! stored record is tagged with the canonical name of its entity and the
//! schema version it was written at; records move between versions only
//! through migrations declared at startup.
//!
//! ## Core Concepts
//!
//! - **Versioned object**: a record tagged `(canonical_name, version)` with
//!   ordered, typed fields and a stable [`Uid`]
//! - **Migration registry**: the versions of every entity and the transforms
//!   between them, frozen before the store accepts traffic
//! - **Transform**: an ordered list of `set_default` / `drop` / `rename` /
//!   `custom` steps, validated when it is built
//! - **Document store**: partitions of records with unique and non-unique
//!   indexes, guarded by a pluggable [`PermissionPolicy`]
//! - **Stash**: a typed façade binding one Rust type to one partition
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use serde::{Deserialize, Serialize};
//! use stashdb::{
//!     AllowAll, DocumentStore, FieldKind, FieldSpec, IndexSpec, MigrationRegistry, Stash,
//!     Uid, VerifyKey, Versioned,
//! };
//!
//! #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
//! struct Dataset {
//!     id: Uid,
//!     name: String,
//! }
//!
//! impl Versioned for Dataset {
//!     const CANONICAL_NAME: &'static str = "Dataset";
//!     const VERSION: u32 = 1;
//!
//!     fn fields() -> Vec<FieldSpec> {
//!         vec![FieldSpec::new("name", FieldKind::String)]
//!     }
//!
//!     fn uid(&self) -> Uid {
//!         self.id
//!     }
//!
//!     fn indexes() -> Vec<IndexSpec> {
//!         vec![IndexSpec::unique("name")]
//!     }
//! }
//!
//! let mut builder = MigrationRegistry::builder();
//! builder.declare_version::<Dataset>()?;
//! let registry = Arc::new(builder.finish());
//!
//! let store = Arc::new(DocumentStore::new(registry, Arc::new(AllowAll))?);
//! let datasets: Stash<Dataset> = Stash::new(store)?;
//!
//! let key = VerifyKey::derive("example");
//! let ds = Dataset { id: Uid::new(), name: "mnist".into() };
//! datasets.set(&key, &ds, false)?;
//! assert_eq!(datasets.find_one_by(&key, "name", "mnist")?, ds);
//! # Ok::<(), stashdb::StoreError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod credentials;
pub mod error;
pub mod object;
pub mod permission;
pub mod schema;
pub mod value;

// Migration, storage, and the typed façade
pub mod migration;
pub mod stash;
pub mod storage;

// Re-export primary types at crate root for convenience
pub use credentials::VerifyKey;
pub use error::{ErrorKind, StoreError, StoreResult};
pub use object::{Fields, ObjectUpdate, TypeKey, Uid, Versioned, VersionedObject, ID_FIELD};
pub use permission::{Action, AllowAll, KeyGrantPolicy, PermissionPolicy};
pub use schema::{FieldSpec, ObjectSchema, SchemaBuilder, SchemaFingerprint};
pub use value::{FieldKind, IndexKey, Value};

pub use migration::{
    build_transform, CustomFn, MigrationContext, MigrationRegistry, RegistryBuilder, Transform,
    TransformOp, TypeIdentity,
};
pub use stash::Stash;
pub use storage::{
    DocumentStore, DocumentStoreBuilder, IndexSpec, JournalEntry, JsonSerializer, NullJournal,
    ObjectSerializer, Partition, PartitionKey, PartitionSettings, QueryKey, QueryKeys,
    RecordJournal, RecordMeta, StatsSnapshot, StoreConfig, StoreEvent, StoreOp, StoredRecord,
};

#[cfg(feature = "persistent")]
pub use storage::persistent::PersistentConfig;
