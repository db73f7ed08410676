//! The document store: permissioned access to a set of partitions.
//!
//! Every call names its partition and carries the caller's [`VerifyKey`]. The
//! policy is consulted before any partition state is touched. Writes go
//! through the partition's write lock, reads through its read lock; the
//! partition map itself is only write-locked while a partition is opened.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use chrono::Utc;
use crossbeam_channel::Receiver;
use serde::Deserialize;

use crate::credentials::VerifyKey;
use crate::error::{lock_err, StoreError, StoreResult};
use crate::migration::{MigrationContext, MigrationRegistry};
use crate::object::{ObjectUpdate, Uid, VersionedObject, ID_FIELD};
use crate::permission::{Action, PermissionPolicy};
use crate::schema::validate_canonical_name;

use super::codec::JsonSerializer;
use super::events::{EventHub, StatsSnapshot, StoreEvent, StoreOp};
use super::partition::{Partition, PartitionSettings};
use super::query::QueryKeys;
use super::traits::{
    JournalEntry, NullJournal, ObjectSerializer, RecordJournal, RecordMeta, StoredRecord,
};

/// Default bound of each event subscriber queue.
const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 1024;

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Capacity of each [`DocumentStore::subscribe`] queue.
    pub event_queue_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
        }
    }
}

impl StoreConfig {
    /// Validates the configuration.
    pub fn validate(self) -> StoreResult<Self> {
        if self.event_queue_capacity == 0 {
            return Err(StoreError::invalid_config(
                "event_queue_capacity must be at least 1",
            ));
        }
        Ok(self)
    }
}

/// Builder for [`DocumentStore`].
pub struct DocumentStoreBuilder {
    registry: Arc<MigrationRegistry>,
    policy: Arc<dyn PermissionPolicy>,
    serializer: Arc<dyn ObjectSerializer>,
    journal: Arc<dyn RecordJournal>,
    config: StoreConfig,
}

impl DocumentStoreBuilder {
    /// Permission policy consulted on every call.
    #[must_use]
    pub fn policy(mut self, policy: Arc<dyn PermissionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Record encoding.
    #[must_use]
    pub fn serializer(mut self, serializer: Arc<dyn ObjectSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Durability backend; [`NullJournal`] by default.
    #[must_use]
    pub fn journal(mut self, journal: Arc<dyn RecordJournal>) -> Self {
        self.journal = journal;
        self
    }

    /// Store tuning.
    #[must_use]
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Replays the journal and returns the store.
    ///
    /// Recovered records stay parked until their partition is opened.
    pub fn build(self) -> StoreResult<DocumentStore> {
        let config = self.config.validate()?;
        let recovered = replay(self.journal.recover()?);
        Ok(DocumentStore {
            registry: self.registry,
            policy: self.policy,
            serializer: self.serializer,
            journal: self.journal,
            partitions: RwLock::new(HashMap::new()),
            recovered: Mutex::new(recovered),
            events: EventHub::new(config.event_queue_capacity),
            config,
        })
    }
}

/// Folds journal entries into the live records of each partition, in first
/// insertion order.
fn replay(entries: Vec<JournalEntry>) -> HashMap<String, Vec<StoredRecord>> {
    let mut live: HashMap<String, HashMap<Uid, (u64, StoredRecord)>> = HashMap::new();
    let mut seq = 0u64;
    for entry in entries {
        match entry {
            JournalEntry::Put { partition, record } => {
                let records = live.entry(partition).or_default();
                let order = match records.get(&record.uid) {
                    Some((order, _)) => *order,
                    None => {
                        seq += 1;
                        seq
                    }
                };
                records.insert(record.uid, (order, record));
            }
            JournalEntry::Delete { partition, uid } => {
                if let Some(records) = live.get_mut(&partition) {
                    records.remove(&uid);
                }
            }
        }
    }
    live.into_iter()
        .map(|(partition, records)| {
            let mut ordered: Vec<(u64, StoredRecord)> = records.into_values().collect();
            ordered.sort_by_key(|(order, _)| *order);
            (partition, ordered.into_iter().map(|(_, r)| r).collect())
        })
        .collect()
}

/// Permissioned, partitioned record store.
pub struct DocumentStore {
    registry: Arc<MigrationRegistry>,
    policy: Arc<dyn PermissionPolicy>,
    serializer: Arc<dyn ObjectSerializer>,
    journal: Arc<dyn RecordJournal>,
    partitions: RwLock<HashMap<String, Arc<Partition>>>,
    recovered: Mutex<HashMap<String, Vec<StoredRecord>>>,
    events: EventHub,
    config: StoreConfig,
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let partitions = self.partition_names().unwrap_or_default();
        f.debug_struct("DocumentStore")
            .field("partitions", &partitions)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DocumentStore {
    /// Builder with the JSON serializer and no durability.
    #[must_use]
    pub fn builder(
        registry: Arc<MigrationRegistry>,
        policy: Arc<dyn PermissionPolicy>,
    ) -> DocumentStoreBuilder {
        DocumentStoreBuilder {
            registry,
            policy,
            serializer: Arc::new(JsonSerializer),
            journal: Arc::new(NullJournal),
            config: StoreConfig::default(),
        }
    }

    /// In-memory store with default settings.
    pub fn new(
        registry: Arc<MigrationRegistry>,
        policy: Arc<dyn PermissionPolicy>,
    ) -> StoreResult<Self> {
        Self::builder(registry, policy).build()
    }

    /// The frozen registry the store validates against.
    #[must_use]
    pub fn registry(&self) -> &Arc<MigrationRegistry> {
        &self.registry
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Opens (or returns the already open) partition described by `settings`.
    ///
    /// # Errors
    /// - `UnknownVersion` if the canonical name has no registered version
    /// - `InvalidConfig` for a bad name, an index on a field no version
    ///   declares, or settings that differ from an already open partition
    pub fn open_partition(&self, settings: PartitionSettings) -> StoreResult<Arc<Partition>> {
        validate_canonical_name(&settings.name)
            .map_err(|e| StoreError::invalid_config(format!("partition name: {}", e.message())))?;
        self.check_settings(&settings)?;

        let mut partitions = self
            .partitions
            .write()
            .map_err(|_| lock_err("store.partitions"))?;
        if let Some(existing) = partitions.get(&settings.name) {
            if existing.settings() != &settings {
                return Err(StoreError::invalid_config(format!(
                    "partition {} is already open with different settings",
                    settings.name
                )));
            }
            return Ok(Arc::clone(existing));
        }

        let name = settings.name.clone();
        let partition = Arc::new(Partition::new(
            settings,
            Arc::clone(&self.registry),
            Arc::clone(&self.serializer),
            Arc::clone(&self.journal),
        ));
        let mut recovered = self
            .recovered
            .lock()
            .map_err(|_| lock_err("store.recovered"))?;
        // Parked records stay parked until the partition accepts all of them.
        let hydrated = match recovered.get(&name) {
            Some(parked) => {
                partition.hydrate(parked)?;
                Some(parked.len())
            }
            None => None,
        };
        if hydrated.is_some() {
            recovered.remove(&name);
        }
        drop(recovered);
        let hydrated = hydrated.unwrap_or(0);
        partitions.insert(name.clone(), Arc::clone(&partition));
        tracing::info!(partition = %name, records = hydrated, "partition opened");
        Ok(partition)
    }

    fn check_settings(&self, settings: &PartitionSettings) -> StoreResult<()> {
        let versions = self.registry.versions(&settings.canonical_name);
        if versions.is_empty() {
            return Err(StoreError::unknown_version(format!(
                "no version of {} is registered",
                settings.canonical_name
            )));
        }
        for (i, index) in settings.indexes.iter().enumerate() {
            if settings.indexes[..i].iter().any(|prev| prev.field == index.field) {
                return Err(StoreError::invalid_config(format!(
                    "partition {} declares index on '{}' twice",
                    settings.name, index.field
                )));
            }
            if index.field == ID_FIELD {
                continue;
            }
            let declared = versions.iter().any(|v| {
                self.registry
                    .schema(&settings.canonical_name, *v)
                    .is_ok_and(|s| s.has_field(&index.field))
            });
            if !declared {
                return Err(StoreError::invalid_config(format!(
                    "partition {} indexes '{}', which no version of {} declares",
                    settings.name, index.field, settings.canonical_name
                )));
            }
        }
        Ok(())
    }

    /// Names of the open partitions, sorted.
    pub fn partition_names(&self) -> StoreResult<Vec<String>> {
        let partitions = self
            .partitions
            .read()
            .map_err(|_| lock_err("store.partitions"))?;
        let mut names: Vec<String> = partitions.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn partition(&self, name: &str) -> StoreResult<Arc<Partition>> {
        self.partitions
            .read()
            .map_err(|_| lock_err("store.partitions"))?
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("partition {name} is not open")))
    }

    fn authorize(&self, credentials: &VerifyKey, action: Action, partition: &str) -> StoreResult<()> {
        if self.policy.has_permission(credentials, action, partition) {
            return Ok(());
        }
        Err(StoreError::permission_denied(format!(
            "key {} may not {action} partition {partition}",
            credentials.fingerprint()
        )))
    }

    fn write_op<T>(
        &self,
        credentials: &VerifyKey,
        partition: &str,
        op: StoreOp,
        uid: Option<Uid>,
        f: impl FnOnce(&Partition) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let started = Instant::now();
        let result = self
            .authorize(credentials, Action::Write, partition)
            .and_then(|()| self.partition(partition))
            .and_then(|p| {
                let out = f(p.as_ref());
                match &out {
                    Ok(_) => p.stats().record_write(op),
                    Err(_) => p.stats().record_failure(),
                }
                out
            });
        let latency = started.elapsed();

        #[allow(clippy::cast_possible_truncation)]
        let latency_us = latency.as_micros() as u64;
        match &result {
            Ok(_) => tracing::debug!(partition, ?op, ?uid, latency_us, "store write"),
            Err(e) => tracing::debug!(partition, ?op, ?uid, latency_us, error = %e, "store write failed"),
        }
        self.events.publish(StoreEvent {
            partition: partition.to_string(),
            op,
            uid,
            latency,
            error: result.as_ref().err().map(StoreError::kind),
            at: Utc::now(),
        });

        if result.is_ok() && self.journal.needs_compaction() {
            if let Err(e) = self.compact() {
                tracing::warn!(error = %e, "automatic compaction failed");
            }
        }
        result
    }

    fn read_op<T>(
        &self,
        credentials: &VerifyKey,
        partition: &str,
        f: impl FnOnce(&Partition) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let started = Instant::now();
        self.authorize(credentials, Action::Read, partition)?;
        let p = self.partition(partition)?;
        let out = f(p.as_ref());
        p.stats().record_read();

        #[allow(clippy::cast_possible_truncation)]
        let latency_us = started.elapsed().as_micros() as u64;
        tracing::debug!(partition, latency_us, ok = out.is_ok(), "store read");
        out
    }

    /// Inserts `obj`.
    ///
    /// With `ignore_duplicates`, a collision on the id or a unique index
    /// returns the record already holding it instead of failing.
    pub fn set(
        &self,
        credentials: &VerifyKey,
        partition: &str,
        obj: VersionedObject,
        ignore_duplicates: bool,
    ) -> StoreResult<VersionedObject> {
        let uid = obj.id;
        self.write_op(credentials, partition, StoreOp::Set, Some(uid), |p| {
            p.insert(obj, ignore_duplicates, credentials)
        })
    }

    /// Returns the record at its stored version.
    pub fn get_by_uid(
        &self,
        credentials: &VerifyKey,
        partition: &str,
        uid: Uid,
    ) -> StoreResult<VersionedObject> {
        self.read_op(credentials, partition, |p| p.get(uid))
    }

    /// Returns the side metadata of a record.
    pub fn get_meta(
        &self,
        credentials: &VerifyKey,
        partition: &str,
        uid: Uid,
    ) -> StoreResult<RecordMeta> {
        self.read_op(credentials, partition, |p| p.meta(uid))
    }

    /// Merges the fields of `update` into the stored record.
    ///
    /// The update must name the record's stored version. Unique indexes are
    /// re-checked only for fields whose value changes.
    pub fn update(
        &self,
        credentials: &VerifyKey,
        partition: &str,
        update: ObjectUpdate,
    ) -> StoreResult<VersionedObject> {
        let uid = update.id;
        self.write_op(credentials, partition, StoreOp::Update, Some(uid), |p| {
            p.update(update)
        })
    }

    /// Removes a record and its index entries.
    pub fn delete_by_uid(&self, credentials: &VerifyKey, partition: &str, uid: Uid) -> StoreResult<()> {
        self.write_op(credentials, partition, StoreOp::Delete, Some(uid), |p| {
            p.delete(uid)
        })
    }

    /// Returns the single record matching `keys`.
    ///
    /// # Errors
    /// - `NotFound` if nothing matches
    /// - `AmbiguousResult` if more than one record matches
    pub fn query_one(
        &self,
        credentials: &VerifyKey,
        partition: &str,
        keys: &QueryKeys,
    ) -> StoreResult<VersionedObject> {
        self.read_op(credentials, partition, |p| {
            let mut hits = p.query(keys)?;
            match hits.len() {
                0 => Err(StoreError::not_found(format!(
                    "{partition}: no record matches {}",
                    describe(keys)
                ))),
                1 => Ok(hits.remove(0)),
                n => Err(StoreError::ambiguous_result(format!(
                    "{partition}: {n} records match {}",
                    describe(keys)
                ))),
            }
        })
    }

    /// Returns every record matching `filter` (all records when `None`), in
    /// insertion order.
    pub fn get_all(
        &self,
        credentials: &VerifyKey,
        partition: &str,
        filter: Option<&QueryKeys>,
    ) -> StoreResult<Vec<VersionedObject>> {
        let everything = QueryKeys::default();
        self.read_op(credentials, partition, |p| p.query(filter.unwrap_or(&everything)))
    }

    /// Stores `obj` in place of the records sharing its `key_field` value.
    ///
    /// Search, delete and insert happen under one partition write lock, so
    /// concurrent replacements at the same key leave exactly one record. If a
    /// record with identical content is already stored it is returned
    /// unchanged; if another unique index is held by an unrelated record,
    /// that record is returned.
    pub fn replace(
        &self,
        credentials: &VerifyKey,
        partition: &str,
        obj: VersionedObject,
        key_field: &str,
    ) -> StoreResult<VersionedObject> {
        let uid = obj.id;
        self.write_op(credentials, partition, StoreOp::Replace, Some(uid), |p| {
            p.replace(obj, key_field, credentials)
        })
    }

    /// Migrates a stored record to `target_version` and persists the result.
    pub fn migrate_record(
        &self,
        credentials: &VerifyKey,
        partition: &str,
        uid: Uid,
        target_version: u32,
        ctx: Option<&MigrationContext>,
    ) -> StoreResult<VersionedObject> {
        self.write_op(credentials, partition, StoreOp::Migrate, Some(uid), |p| {
            p.migrate_record(uid, target_version, ctx)
        })
    }

    /// Ids of the records not stored at `version`, in insertion order.
    pub fn uids_not_at(
        &self,
        credentials: &VerifyKey,
        partition: &str,
        version: u32,
    ) -> StoreResult<Vec<Uid>> {
        self.read_op(credentials, partition, |p| p.uids_not_at(version))
    }

    /// Counters of an open partition.
    pub fn stats(&self, partition: &str) -> StoreResult<StatsSnapshot> {
        Ok(self.partition(partition)?.stats().snapshot())
    }

    /// Subscribes to store events. The queue is bounded; events that do not
    /// fit are dropped.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Events dropped because a subscriber queue was full.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.events.dropped()
    }

    /// Rewrites the journal with only the live records.
    ///
    /// Writers on every partition wait until the rewrite finishes; readers do
    /// not.
    pub fn compact(&self) -> StoreResult<()> {
        let started = Instant::now();
        let partitions = self
            .partitions
            .read()
            .map_err(|_| lock_err("store.partitions"))?;
        let mut names: Vec<&String> = partitions.keys().collect();
        names.sort();

        let mut frozen = Vec::with_capacity(names.len());
        for name in names {
            if let Some(p) = partitions.get(name) {
                frozen.push(p.freeze()?);
            }
        }
        let parked = self
            .recovered
            .lock()
            .map_err(|_| lock_err("store.recovered"))?;

        let mut live: Vec<JournalEntry> = frozen.iter().flat_map(|f| f.entries()).collect();
        let mut parked_names: Vec<&String> = parked.keys().collect();
        parked_names.sort();
        for name in parked_names {
            if let Some(records) = parked.get(name) {
                live.extend(records.iter().map(|record| JournalEntry::Put {
                    partition: name.clone(),
                    record: record.clone(),
                }));
            }
        }

        let records = live.len();
        self.journal.compact(live)?;
        tracing::info!(
            records,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "journal compacted"
        );
        Ok(())
    }
}

fn describe(keys: &QueryKeys) -> String {
    let parts: Vec<String> = keys
        .keys()
        .iter()
        .map(|k| format!("{}={}", k.field, k.value))
        .collect();
    if parts.is_empty() {
        "<all>".to_string()
    } else {
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::object::{Fields, TypeKey};
    use crate::permission::{AllowAll, KeyGrantPolicy};
    use crate::schema::ObjectSchema;
    use crate::storage::partition::IndexSpec;
    use crate::value::FieldKind;

    fn registry() -> Arc<MigrationRegistry> {
        let mut builder = MigrationRegistry::builder();
        builder
            .register_version(
                ObjectSchema::builder("Dataset", 1)
                    .field("name", FieldKind::String)
                    .field("size", FieldKind::Int)
                    .build()
                    .unwrap(),
            )
            .unwrap();
        Arc::new(builder.finish())
    }

    fn settings() -> PartitionSettings {
        PartitionSettings::new("Dataset").with_index(IndexSpec::unique("name"))
    }

    fn store() -> DocumentStore {
        let store = DocumentStore::new(registry(), Arc::new(AllowAll)).unwrap();
        store.open_partition(settings()).unwrap();
        store
    }

    fn dataset(name: &str, size: i64) -> VersionedObject {
        VersionedObject::new(
            &TypeKey::new("Dataset", 1),
            Uid::new(),
            Fields::new().with("name", name).with("size", size),
        )
    }

    fn key() -> VerifyKey {
        VerifyKey::derive("alice")
    }

    #[test]
    fn test_config_validation() {
        let bad = StoreConfig {
            event_queue_capacity: 0,
        };
        assert_eq!(bad.validate().unwrap_err().kind(), ErrorKind::InvalidConfig);
        let parsed: StoreConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed, StoreConfig::default());
    }

    #[test]
    fn test_set_then_get_returns_same_object() {
        let store = store();
        let obj = dataset("mnist", 10);
        store.set(&key(), "Dataset", obj.clone(), false).unwrap();
        assert_eq!(store.get_by_uid(&key(), "Dataset", obj.id).unwrap(), obj);
    }

    #[test]
    fn test_open_partition_rejects_unknown_and_conflicting_settings() {
        let store = store();
        let err = store.open_partition(PartitionSettings::new("Model")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownVersion);

        let err = store
            .open_partition(PartitionSettings::new("Dataset"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);

        let err = store
            .open_partition(
                PartitionSettings::new("Dataset")
                    .with_name("Other")
                    .with_index(IndexSpec::unique("color")),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);

        assert!(store.open_partition(settings()).is_ok());
    }

    #[test]
    fn test_unopened_partition_is_not_found() {
        let store = store();
        let err = store.get_all(&key(), "Missing", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_permission_checked_before_data() {
        let owner = VerifyKey::derive("owner");
        let reader = VerifyKey::derive("reader");
        let policy = KeyGrantPolicy::new(owner).grant(reader, "Dataset", Action::Read);
        let store = DocumentStore::new(registry(), Arc::new(policy)).unwrap();
        store.open_partition(settings()).unwrap();

        let obj = dataset("mnist", 1);
        let err = store.set(&reader, "Dataset", obj.clone(), false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        store.set(&owner, "Dataset", obj.clone(), false).unwrap();
        assert_eq!(store.get_by_uid(&reader, "Dataset", obj.id).unwrap(), obj);

        let stranger = VerifyKey::derive("stranger");
        let err = store.delete_by_uid(&stranger, "Dataset", obj.id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert_eq!(store.stats("Dataset").unwrap().failures, 0);
    }

    #[test]
    fn test_query_one_outcomes() {
        let store = store();
        store.set(&key(), "Dataset", dataset("a", 1), false).unwrap();
        store.set(&key(), "Dataset", dataset("b", 1), false).unwrap();

        let one = store
            .query_one(&key(), "Dataset", &QueryKeys::default().and("name", "a"))
            .unwrap();
        assert_eq!(one.get("name"), Some(&"a".into()));

        let err = store
            .query_one(&key(), "Dataset", &QueryKeys::default().and("size", 1))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AmbiguousResult);

        let err = store
            .query_one(&key(), "Dataset", &QueryKeys::default().and("name", "zzz"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_mutations_emit_events_and_stats() {
        let store = store();
        let rx = store.subscribe();
        let obj = dataset("a", 1);
        store.set(&key(), "Dataset", obj.clone(), false).unwrap();
        let _ = store.set(&key(), "Dataset", dataset("a", 2), false);

        let ok = rx.try_recv().unwrap();
        assert_eq!(ok.op, StoreOp::Set);
        assert_eq!(ok.uid, Some(obj.id));
        assert!(ok.error.is_none());
        let failed = rx.try_recv().unwrap();
        assert_eq!(failed.error, Some(ErrorKind::DuplicateKey));

        let snap = store.stats("Dataset").unwrap();
        assert_eq!(snap.sets, 1);
        assert_eq!(snap.failures, 1);
    }

    #[test]
    fn test_meta_records_creator() {
        let store = store();
        let obj = dataset("a", 1);
        store.set(&key(), "Dataset", obj.clone(), false).unwrap();
        let meta = store.get_meta(&key(), "Dataset", obj.id).unwrap();
        assert_eq!(meta.created_by, Some(key().fingerprint()));
    }

    #[test]
    fn test_replay_keeps_first_insert_order_and_drops_deleted() {
        let a = StoredRecord {
            uid: Uid::new(),
            version: 1,
            bytes: vec![1],
            meta: RecordMeta::created(None),
        };
        let b = StoredRecord {
            uid: Uid::new(),
            ..a.clone()
        };
        let put = |r: &StoredRecord| JournalEntry::Put {
            partition: "Dataset".into(),
            record: r.clone(),
        };
        let mut a2 = a.clone();
        a2.bytes = vec![2];
        let entries = vec![
            put(&a),
            put(&b),
            put(&a2),
            JournalEntry::Delete {
                partition: "Dataset".into(),
                uid: b.uid,
            },
        ];
        let live = replay(entries);
        assert_eq!(live["Dataset"], vec![a2]);
    }
}
