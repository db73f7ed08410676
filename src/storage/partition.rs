//! Partitions: homogeneous record collections with maintained indexes.
//!
//! A partition holds every stored version of one canonical name. Records and
//! index entries live behind a single `RwLock`, so a write (journal append,
//! record change, index change) is all-or-nothing for readers, writers on one
//! partition are serialized, and unrelated partitions never contend.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::credentials::VerifyKey;
use crate::error::{lock_err, StoreError, StoreResult};
use crate::migration::{MigrationContext, MigrationRegistry};
use crate::object::{ObjectUpdate, Uid, VersionedObject, ID_FIELD};
use crate::value::IndexKey;

use super::events::PartitionStats;
use super::query::QueryKeys;
use super::traits::{JournalEntry, ObjectSerializer, RecordJournal, RecordMeta, StoredRecord};

/// A maintained `value -> id` lookup on one field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Indexed field.
    pub field: String,
    /// At most one record per value.
    pub unique: bool,
}

impl IndexSpec {
    /// Index rejecting a second record with the same value.
    #[must_use]
    pub fn unique(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            unique: true,
        }
    }

    /// Lookup-only index.
    #[must_use]
    pub fn non_unique(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            unique: false,
        }
    }
}

/// Name, entity type and indexes of a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSettings {
    /// Partition name; defaults to the canonical name.
    pub name: String,
    /// Entity type stored in the partition.
    pub canonical_name: String,
    /// Declared indexes.
    pub indexes: Vec<IndexSpec>,
}

impl PartitionSettings {
    /// Partition named after its canonical type, without indexes.
    #[must_use]
    pub fn new(canonical_name: impl Into<String>) -> Self {
        let canonical_name = canonical_name.into();
        Self {
            name: canonical_name.clone(),
            canonical_name,
            indexes: Vec::new(),
        }
    }

    /// Overrides the partition name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Adds one index.
    #[must_use]
    pub fn with_index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    /// Adds several indexes.
    #[must_use]
    pub fn with_indexes(mut self, indexes: impl IntoIterator<Item = IndexSpec>) -> Self {
        self.indexes.extend(indexes);
        self
    }

    /// Index declared on `field`.
    #[must_use]
    pub fn index(&self, field: &str) -> Option<&IndexSpec> {
        self.indexes.iter().find(|i| i.field == field)
    }
}

type KeyList = Vec<(String, IndexKey)>;

#[derive(Debug)]
struct Slot {
    record: StoredRecord,
    seq: u64,
    keys: KeyList,
}

#[derive(Debug)]
struct Index {
    unique: bool,
    entries: HashMap<IndexKey, BTreeSet<Uid>>,
}

#[derive(Debug)]
struct PartitionState {
    records: HashMap<Uid, Slot>,
    indexes: HashMap<String, Index>,
    next_seq: u64,
}

impl PartitionState {
    fn new(settings: &PartitionSettings) -> Self {
        let indexes = settings
            .indexes
            .iter()
            .map(|spec| {
                (
                    spec.field.clone(),
                    Index {
                        unique: spec.unique,
                        entries: HashMap::new(),
                    },
                )
            })
            .collect();
        Self {
            records: HashMap::new(),
            indexes,
            next_seq: 0,
        }
    }

    fn unindex(&mut self, uid: Uid, keys: &KeyList) {
        for (field, key) in keys {
            if let Some(index) = self.indexes.get_mut(field) {
                if let Some(owners) = index.entries.get_mut(key) {
                    owners.remove(&uid);
                    if owners.is_empty() {
                        index.entries.remove(key);
                    }
                }
            }
        }
    }

    fn apply_put(&mut self, record: StoredRecord, keys: KeyList) {
        let uid = record.uid;
        let seq = match self.records.remove(&uid) {
            Some(old) => {
                self.unindex(uid, &old.keys);
                old.seq
            }
            None => {
                self.next_seq += 1;
                self.next_seq
            }
        };
        for (field, key) in &keys {
            if let Some(index) = self.indexes.get_mut(field) {
                index.entries.entry(key.clone()).or_default().insert(uid);
            }
        }
        self.records.insert(uid, Slot { record, seq, keys });
    }

    fn apply_delete(&mut self, uid: Uid) -> Option<Slot> {
        let slot = self.records.remove(&uid)?;
        self.unindex(uid, &slot.keys);
        Some(slot)
    }

    /// First record other than those in `exclude` that owns one of `keys` in a
    /// unique index. `only` restricts the check to the named fields.
    fn unique_conflict(
        &self,
        keys: &KeyList,
        exclude: &[Uid],
        only: Option<&HashSet<String>>,
    ) -> Option<(String, IndexKey, Uid)> {
        for (field, key) in keys {
            if only.is_some_and(|f| !f.contains(field)) {
                continue;
            }
            let Some(index) = self.indexes.get(field) else {
                continue;
            };
            if !index.unique {
                continue;
            }
            if let Some(owner) = index
                .entries
                .get(key)
                .and_then(|owners| owners.iter().find(|u| !exclude.contains(u)))
            {
                return Some((field.clone(), key.clone(), *owner));
            }
        }
        None
    }

    fn owners(&self, field: &str, key: &IndexKey) -> Option<&BTreeSet<Uid>> {
        self.indexes.get(field).and_then(|i| i.entries.get(key))
    }
}

/// One partition of a [`crate::DocumentStore`].
pub struct Partition {
    settings: PartitionSettings,
    state: RwLock<PartitionState>,
    stats: PartitionStats,
    registry: Arc<MigrationRegistry>,
    serializer: Arc<dyn ObjectSerializer>,
    journal: Arc<dyn RecordJournal>,
}

impl std::fmt::Debug for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Partition")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Partition {
    pub(crate) fn new(
        settings: PartitionSettings,
        registry: Arc<MigrationRegistry>,
        serializer: Arc<dyn ObjectSerializer>,
        journal: Arc<dyn RecordJournal>,
    ) -> Self {
        let state = PartitionState::new(&settings);
        Self {
            settings,
            state: RwLock::new(state),
            stats: PartitionStats::default(),
            registry,
            serializer,
            journal,
        }
    }

    /// Settings the partition was opened with.
    #[must_use]
    pub fn settings(&self) -> &PartitionSettings {
        &self.settings
    }

    /// Partition name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.settings.name
    }

    /// Operation counters.
    #[must_use]
    pub fn stats(&self) -> &PartitionStats {
        &self.stats
    }

    /// Number of stored records.
    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.read()?.records.len())
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, PartitionState>> {
        self.state.read().map_err(|_| lock_err("partition.read"))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, PartitionState>> {
        self.state.write().map_err(|_| lock_err("partition.write"))
    }

    fn decode(&self, record: &StoredRecord) -> StoreResult<VersionedObject> {
        self.serializer.deserialize(&record.bytes, record.version)
    }

    fn index_keys(&self, obj: &VersionedObject) -> KeyList {
        self.settings
            .indexes
            .iter()
            .filter_map(|spec| {
                let value = obj.lookup(&spec.field)?;
                IndexKey::from_value(&value).map(|key| (spec.field.clone(), key))
            })
            .collect()
    }

    /// Checks canonical name and the payload's own version schema.
    fn check_payload(&self, obj: &VersionedObject) -> StoreResult<()> {
        if obj.canonical_name != self.settings.canonical_name {
            return Err(StoreError::type_mismatch(format!(
                "partition {} stores {}, got {}",
                self.settings.name,
                self.settings.canonical_name,
                obj.type_key()
            )));
        }
        let schema = self.registry.schema_for(&obj.type_key())?;
        schema.check_fields(&obj.fields)
    }

    fn duplicate(&self, field: &str, key: &IndexKey, owner: Uid) -> StoreError {
        StoreError::duplicate_key(format!(
            "{}: {field}={key} is already owned by {owner}",
            self.settings.name
        ))
    }

    fn stored(&self, obj: &VersionedObject, meta: RecordMeta) -> StoreResult<StoredRecord> {
        Ok(StoredRecord {
            uid: obj.id,
            version: obj.version,
            bytes: self.serializer.serialize(obj)?,
            meta,
        })
    }

    fn put_entry(&self, record: StoredRecord) -> JournalEntry {
        JournalEntry::Put {
            partition: self.settings.name.clone(),
            record,
        }
    }

    fn delete_entry(&self, uid: Uid) -> JournalEntry {
        JournalEntry::Delete {
            partition: self.settings.name.clone(),
            uid,
        }
    }

    pub(crate) fn insert(
        &self,
        obj: VersionedObject,
        ignore_duplicates: bool,
        actor: &VerifyKey,
    ) -> StoreResult<VersionedObject> {
        self.check_payload(&obj)?;
        let keys = self.index_keys(&obj);

        let mut state = self.write()?;
        if let Some(existing) = state.records.get(&obj.id) {
            if ignore_duplicates {
                return self.decode(&existing.record);
            }
            return Err(StoreError::duplicate_key(format!(
                "{}: record {} already exists",
                self.settings.name, obj.id
            )));
        }
        if let Some((field, key, owner)) = state.unique_conflict(&keys, &[], None) {
            if ignore_duplicates {
                let slot = state.records.get(&owner).ok_or_else(|| index_drift(owner))?;
                return self.decode(&slot.record);
            }
            return Err(self.duplicate(&field, &key, owner));
        }

        let record = self.stored(&obj, RecordMeta::created(Some(actor.fingerprint())))?;
        self.journal.append(vec![self.put_entry(record.clone())])?;
        state.apply_put(record, keys);
        Ok(obj)
    }

    pub(crate) fn get(&self, uid: Uid) -> StoreResult<VersionedObject> {
        let state = self.read()?;
        let slot = state.records.get(&uid).ok_or_else(|| self.not_found(uid))?;
        self.decode(&slot.record)
    }

    pub(crate) fn meta(&self, uid: Uid) -> StoreResult<RecordMeta> {
        let state = self.read()?;
        state
            .records
            .get(&uid)
            .map(|slot| slot.record.meta.clone())
            .ok_or_else(|| self.not_found(uid))
    }

    fn not_found(&self, uid: Uid) -> StoreError {
        StoreError::not_found(format!("{}: no record {uid}", self.settings.name))
    }

    pub(crate) fn update(&self, update: ObjectUpdate) -> StoreResult<VersionedObject> {
        let key = update.type_key();
        if key.canonical_name != self.settings.canonical_name {
            return Err(StoreError::type_mismatch(format!(
                "partition {} stores {}, got {key}",
                self.settings.name, self.settings.canonical_name
            )));
        }
        let schema = self.registry.schema_for(&key)?;
        schema.check_partial(&update.fields)?;

        let mut state = self.write()?;
        let slot = state
            .records
            .get(&update.id)
            .ok_or_else(|| self.not_found(update.id))?;
        if slot.record.version != update.version {
            return Err(StoreError::type_mismatch(format!(
                "{}: record {} is stored at v{}, update is for {key}; migrate it first",
                self.settings.name, update.id, slot.record.version
            )));
        }

        let mut merged = self.decode(&slot.record)?;
        let mut touched = HashSet::new();
        for (name, value) in update.fields {
            if merged.fields.get(&name) != Some(&value) {
                touched.insert(name.clone());
                merged.fields.insert(name, value);
            }
        }
        if touched.is_empty() {
            return Ok(merged);
        }

        let keys = self.index_keys(&merged);
        if let Some((field, key, owner)) = state.unique_conflict(&keys, &[merged.id], Some(&touched)) {
            return Err(self.duplicate(&field, &key, owner));
        }

        let record = self.stored(&merged, slot.record.meta.touched())?;
        self.journal.append(vec![self.put_entry(record.clone())])?;
        state.apply_put(record, keys);
        Ok(merged)
    }

    pub(crate) fn delete(&self, uid: Uid) -> StoreResult<()> {
        let mut state = self.write()?;
        if !state.records.contains_key(&uid) {
            return Err(self.not_found(uid));
        }
        self.journal.append(vec![self.delete_entry(uid)])?;
        state.apply_delete(uid);
        Ok(())
    }

    /// Replaces whatever records hold `obj`'s value of `key_field` with `obj`,
    /// as one write. Returns the surviving record.
    pub(crate) fn replace(
        &self,
        obj: VersionedObject,
        key_field: &str,
        actor: &VerifyKey,
    ) -> StoreResult<VersionedObject> {
        self.check_payload(&obj)?;
        let lookup = obj.lookup(key_field).ok_or_else(|| {
            StoreError::type_mismatch(format!(
                "{}: replace key '{key_field}' is not set on {}",
                self.settings.name,
                obj.type_key()
            ))
        })?;
        let keys = self.index_keys(&obj);
        let query = QueryKeys::default().and(key_field, lookup);

        let mut state = self.write()?;
        let previous = self.matching(&state, &query)?;

        if let Some((_, same)) = previous
            .iter()
            .find(|(_, old)| old.version == obj.version && old.fields.same_content(&obj.fields))
        {
            return Ok(same.clone());
        }

        let mut superseded: Vec<Uid> = previous.iter().map(|(_, old)| old.id).collect();
        if !superseded.contains(&obj.id) && state.records.contains_key(&obj.id) {
            superseded.push(obj.id);
        }
        if let Some((_, _, owner)) = state.unique_conflict(&keys, &superseded, None) {
            let slot = state.records.get(&owner).ok_or_else(|| index_drift(owner))?;
            return self.decode(&slot.record);
        }

        let created_by = Some(actor.fingerprint());
        let record = self.stored(&obj, RecordMeta::created(created_by))?;
        let mut batch: Vec<JournalEntry> = superseded.iter().map(|u| self.delete_entry(*u)).collect();
        batch.push(self.put_entry(record.clone()));
        self.journal.append(batch)?;

        for uid in superseded {
            state.apply_delete(uid);
        }
        state.apply_put(record, keys);
        Ok(obj)
    }

    /// Moves a stored record to `target_version` and persists it.
    pub(crate) fn migrate_record(
        &self,
        uid: Uid,
        target_version: u32,
        ctx: Option<&MigrationContext>,
    ) -> StoreResult<VersionedObject> {
        let mut state = self.write()?;
        let slot = state.records.get(&uid).ok_or_else(|| self.not_found(uid))?;
        let current = self.decode(&slot.record)?;
        if current.version == target_version {
            return Ok(current);
        }

        let migrated = self.registry.migrate(&current, target_version, ctx)?;
        let keys = self.index_keys(&migrated);
        if let Some((field, key, owner)) = state.unique_conflict(&keys, &[uid], None) {
            return Err(self.duplicate(&field, &key, owner));
        }

        let record = self.stored(&migrated, slot.record.meta.touched())?;
        self.journal.append(vec![self.put_entry(record.clone())])?;
        state.apply_put(record, keys);
        Ok(migrated)
    }

    pub(crate) fn query(&self, query: &QueryKeys) -> StoreResult<Vec<VersionedObject>> {
        let state = self.read()?;
        Ok(self.matching(&state, query)?.into_iter().map(|(_, obj)| obj).collect())
    }

    pub(crate) fn uids_not_at(&self, version: u32) -> StoreResult<Vec<Uid>> {
        let state = self.read()?;
        let mut stale: Vec<(u64, Uid)> = state
            .records
            .values()
            .filter(|slot| slot.record.version != version)
            .map(|slot| (slot.seq, slot.record.uid))
            .collect();
        stale.sort_unstable();
        Ok(stale.into_iter().map(|(_, uid)| uid).collect())
    }

    /// Records matching every key, in insertion order. Indexed keys and `id`
    /// narrow the candidates; the rest are checked by equality on each
    /// candidate.
    fn matching(
        &self,
        state: &PartitionState,
        query: &QueryKeys,
    ) -> StoreResult<Vec<(u64, VersionedObject)>> {
        let mut candidates: Option<BTreeSet<Uid>> = None;
        let mut residual = Vec::new();

        for qk in query.keys() {
            let narrowed: BTreeSet<Uid> = if qk.field == ID_FIELD {
                qk.value
                    .as_str()
                    .and_then(|s| Uid::parse(s).ok())
                    .filter(|uid| state.records.contains_key(uid))
                    .into_iter()
                    .collect()
            } else if state.indexes.contains_key(&qk.field) {
                IndexKey::from_value(&qk.value)
                    .and_then(|key| state.owners(&qk.field, &key).cloned())
                    .unwrap_or_default()
            } else {
                residual.push(qk);
                continue;
            };
            candidates = Some(match candidates {
                Some(current) => current.intersection(&narrowed).copied().collect(),
                None => narrowed,
            });
        }

        let slots: Vec<&Slot> = match &candidates {
            Some(uids) => uids.iter().filter_map(|uid| state.records.get(uid)).collect(),
            None => {
                if !residual.is_empty() {
                    tracing::debug!(
                        partition = %self.settings.name,
                        records = state.records.len(),
                        "query has no indexed key; scanning partition"
                    );
                }
                state.records.values().collect()
            }
        };

        let mut out = Vec::with_capacity(slots.len());
        for slot in slots {
            let obj = self.decode(&slot.record)?;
            // Index keys for null values are absent, so re-check every key.
            if query.matches(&obj) {
                out.push((slot.seq, obj));
            }
        }
        out.sort_by_key(|(seq, _)| *seq);
        Ok(out)
    }

    /// Loads recovered records and rebuilds indexes. On failure the
    /// partition is left as it was.
    pub(crate) fn hydrate(&self, records: &[StoredRecord]) -> StoreResult<()> {
        let mut state = self.write()?;
        let mut staged = PartitionState::new(&self.settings);
        for record in records {
            let obj = self.decode(record)?;
            let keys = self.index_keys(&obj);
            if let Some((field, key, owner)) = staged.unique_conflict(&keys, &[record.uid], None) {
                return Err(StoreError::storage(format!(
                    "{}: recovered records {owner} and {} share unique {field}={key}",
                    self.settings.name, record.uid
                )));
            }
            staged.apply_put(record.clone(), keys);
        }
        *state = staged;
        Ok(())
    }

    /// Blocks writers until the returned guard is dropped.
    pub(crate) fn freeze(&self) -> StoreResult<FrozenPartition<'_>> {
        Ok(FrozenPartition {
            partition: self,
            state: self.read()?,
        })
    }
}

/// Read-locked view of a partition used while the journal is compacted.
pub(crate) struct FrozenPartition<'a> {
    partition: &'a Partition,
    state: RwLockReadGuard<'a, PartitionState>,
}

impl FrozenPartition<'_> {
    /// One `Put` per live record, in insertion order.
    pub(crate) fn entries(&self) -> Vec<JournalEntry> {
        let mut slots: Vec<&Slot> = self.state.records.values().collect();
        slots.sort_by_key(|slot| slot.seq);
        slots
            .into_iter()
            .map(|slot| self.partition.put_entry(slot.record.clone()))
            .collect()
    }
}

fn index_drift(uid: Uid) -> StoreError {
    StoreError::storage(format!("index references missing record {uid}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::migration::TransformOp;
    use crate::object::{Fields, TypeKey};
    use crate::schema::ObjectSchema;
    use crate::storage::codec::JsonSerializer;
    use crate::storage::traits::NullJournal;
    use crate::value::FieldKind;
    use serde_json::json;

    fn registry() -> Arc<MigrationRegistry> {
        let mut builder = MigrationRegistry::builder();
        builder
            .register_version(
                ObjectSchema::builder("Endpoint", 1)
                    .field("name", FieldKind::String)
                    .field("path", FieldKind::String)
                    .build()
                    .unwrap(),
            )
            .unwrap()
            .register_version(
                ObjectSchema::builder("Endpoint", 2)
                    .field("name", FieldKind::String)
                    .field("path", FieldKind::String)
                    .field("tag", FieldKind::Optional(Box::new(FieldKind::String)))
                    .build()
                    .unwrap(),
            )
            .unwrap()
            .declare_migration("Endpoint", 1, 2, vec![TransformOp::set_default("tag", json!(null))])
            .unwrap();
        Arc::new(builder.finish())
    }

    fn partition() -> Partition {
        let settings = PartitionSettings::new("Endpoint")
            .with_index(IndexSpec::unique("name"))
            .with_index(IndexSpec::non_unique("path"));
        Partition::new(settings, registry(), Arc::new(JsonSerializer), Arc::new(NullJournal))
    }

    fn endpoint(name: &str, path: &str) -> VersionedObject {
        VersionedObject::new(
            &TypeKey::new("Endpoint", 1),
            Uid::new(),
            Fields::new().with("name", name).with("path", path),
        )
    }

    fn actor() -> VerifyKey {
        VerifyKey::derive("tests")
    }

    #[test]
    fn test_unique_index_rejects_second_owner() {
        let p = partition();
        p.insert(endpoint("a", "/x"), false, &actor()).unwrap();
        let err = p.insert(endpoint("a", "/y"), false, &actor()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateKey);
        assert_eq!(p.len().unwrap(), 1);
    }

    #[test]
    fn test_ignore_duplicates_returns_first_record() {
        let p = partition();
        let first = p.insert(endpoint("a", "/x"), false, &actor()).unwrap();
        let got = p.insert(endpoint("a", "/y"), true, &actor()).unwrap();
        assert_eq!(got, first);
    }

    #[test]
    fn test_query_uses_non_unique_index_in_insert_order() {
        let p = partition();
        let a = p.insert(endpoint("a", "/x"), false, &actor()).unwrap();
        p.insert(endpoint("b", "/y"), false, &actor()).unwrap();
        let c = p.insert(endpoint("c", "/x"), false, &actor()).unwrap();
        let hits = p.query(&QueryKeys::default().and("path", "/x")).unwrap();
        assert_eq!(hits, vec![a, c]);
    }

    #[test]
    fn test_update_reindexes_touched_fields() {
        let p = partition();
        let a = p.insert(endpoint("a", "/x"), false, &actor()).unwrap();
        p.insert(endpoint("b", "/y"), false, &actor()).unwrap();

        let clash = ObjectUpdate::new(&a.type_key(), a.id).set("name", "b");
        assert_eq!(p.update(clash).unwrap_err().kind(), ErrorKind::DuplicateKey);

        let ok = ObjectUpdate::new(&a.type_key(), a.id).set("name", "z");
        p.update(ok).unwrap();
        assert!(p.query(&QueryKeys::default().and("name", "a")).unwrap().is_empty());
        assert_eq!(p.query(&QueryKeys::default().and("name", "z")).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_frees_unique_key() {
        let p = partition();
        let a = p.insert(endpoint("a", "/x"), false, &actor()).unwrap();
        p.delete(a.id).unwrap();
        assert_eq!(p.delete(a.id).unwrap_err().kind(), ErrorKind::NotFound);
        p.insert(endpoint("a", "/y"), false, &actor()).unwrap();
    }

    #[test]
    fn test_replace_supersedes_record_with_same_key() {
        let p = partition();
        let old = p.insert(endpoint("a", "/x"), false, &actor()).unwrap();
        let new = p.replace(endpoint("a", "/y"), "name", &actor()).unwrap();
        assert_ne!(new.id, old.id);
        assert_eq!(p.len().unwrap(), 1);
        assert_eq!(p.get(old.id).unwrap_err().kind(), ErrorKind::NotFound);

        let again = p.replace(endpoint("a", "/y"), "name", &actor()).unwrap();
        assert_eq!(again.id, new.id);
    }

    #[test]
    fn test_migrate_record_rewrites_version() {
        let p = partition();
        let a = p.insert(endpoint("a", "/x"), false, &actor()).unwrap();
        assert_eq!(p.uids_not_at(2).unwrap(), vec![a.id]);
        let migrated = p.migrate_record(a.id, 2, None).unwrap();
        assert_eq!(migrated.version, 2);
        assert_eq!(p.get(a.id).unwrap().version, 2);
        assert!(p.uids_not_at(2).unwrap().is_empty());
    }

    #[test]
    fn test_foreign_canonical_name_is_rejected() {
        let p = partition();
        let obj = VersionedObject::new(&TypeKey::new("Dataset", 1), Uid::new(), Fields::new());
        assert_eq!(p.insert(obj, false, &actor()).unwrap_err().kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_frozen_entries_follow_insert_order() {
        let p = partition();
        let a = p.insert(endpoint("a", "/x"), false, &actor()).unwrap();
        let b = p.insert(endpoint("b", "/x"), false, &actor()).unwrap();
        let entries = p.freeze().unwrap().entries();
        let uids: Vec<Uid> = entries
            .iter()
            .filter_map(|e| match e {
                JournalEntry::Put { record, .. } => Some(record.uid),
                JournalEntry::Delete { .. } => None,
            })
            .collect();
        assert_eq!(uids, vec![a.id, b.id]);
    }
}
