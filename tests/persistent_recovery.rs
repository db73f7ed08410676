//! Crash recovery tests for the durable backend.
//!
//! These tests verify that a reopened store:
//! - Sees every acknowledged write, including deletes and migrations
//! - Rebuilds unique indexes from the log
//! - Survives a torn final frame
//! - Compacts without losing live records

#![cfg(feature = "persistent")]

use std::fs;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stashdb::storage::persistent::{PersistentConfig, WAL_FILE};
use stashdb::{
    AllowAll, DocumentStore, ErrorKind, FieldKind, FieldSpec, IndexSpec, MigrationRegistry,
    PartitionSettings, Stash, TransformOp, Uid, VerifyKey, Versioned,
};
use tempfile::tempdir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DatasetV1 {
    id: Uid,
    name: String,
}

impl Versioned for DatasetV1 {
    const CANONICAL_NAME: &'static str = "Dataset";
    const VERSION: u32 = 1;

    fn fields() -> Vec<FieldSpec> {
        vec![FieldSpec::new("name", FieldKind::String)]
    }

    fn uid(&self) -> Uid {
        self.id
    }

    fn indexes() -> Vec<IndexSpec> {
        vec![IndexSpec::unique("name")]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DatasetV2 {
    id: Uid,
    name: String,
    owner: String,
}

impl Versioned for DatasetV2 {
    const CANONICAL_NAME: &'static str = "Dataset";
    const VERSION: u32 = 2;

    fn fields() -> Vec<FieldSpec> {
        vec![
            FieldSpec::new("name", FieldKind::String),
            FieldSpec::new("owner", FieldKind::String),
        ]
    }

    fn uid(&self) -> Uid {
        self.id
    }

    fn indexes() -> Vec<IndexSpec> {
        vec![IndexSpec::unique("name")]
    }
}

fn registry() -> Arc<MigrationRegistry> {
    let mut builder = MigrationRegistry::builder();
    builder
        .declare_version::<DatasetV1>()
        .unwrap()
        .declare_version::<DatasetV2>()
        .unwrap()
        .declare_migration_between::<DatasetV1, DatasetV2>(vec![TransformOp::set_default(
            "owner", "unknown",
        )])
        .unwrap();
    Arc::new(builder.finish())
}

fn open(dir: &std::path::Path, config: Option<PersistentConfig>) -> Arc<DocumentStore> {
    Arc::new(DocumentStore::open(dir, registry(), Arc::new(AllowAll), config).unwrap())
}

fn key() -> VerifyKey {
    VerifyKey::derive("ops")
}

fn v1(name: &str) -> DatasetV1 {
    DatasetV1 {
        id: Uid::new(),
        name: name.into(),
    }
}

#[test]
fn test_reopen_replays_acknowledged_writes() {
    let dir = tempdir().unwrap();
    let (kept, deleted, migrated);
    {
        let stash: Stash<DatasetV1> = Stash::new(open(dir.path(), None)).unwrap();
        kept = stash.set(&key(), &v1("kept"), false).unwrap();
        deleted = stash.set(&key(), &v1("deleted"), false).unwrap();
        migrated = stash.set(&key(), &v1("migrated"), false).unwrap();
        stash.delete_by_uid(&key(), deleted.id).unwrap();
        stash
            .store()
            .migrate_record(&key(), "Dataset", migrated.id, 2, None)
            .unwrap();
    }

    let store = open(dir.path(), None);
    let old: Stash<DatasetV1> = Stash::new(Arc::clone(&store)).unwrap();
    let new: Stash<DatasetV2> = Stash::new(Arc::clone(&store)).unwrap();

    assert_eq!(old.get_by_uid(&key(), kept.id).unwrap(), kept);
    assert_eq!(
        old.get_by_uid(&key(), deleted.id).unwrap_err().kind(),
        ErrorKind::NotFound
    );
    let m = new.get_by_uid(&key(), migrated.id).unwrap();
    assert_eq!(m.owner, "unknown");

    let err = old.set(&key(), &v1("kept"), false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateKey);
}

#[test]
fn test_second_open_is_locked_out() {
    let dir = tempdir().unwrap();
    let _first = open(dir.path(), None);
    let err = DocumentStore::open(dir.path(), registry(), Arc::new(AllowAll), None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);
}

#[test]
fn test_torn_tail_keeps_earlier_writes() {
    let dir = tempdir().unwrap();
    let first;
    {
        let stash: Stash<DatasetV1> = Stash::new(open(dir.path(), None)).unwrap();
        first = stash.set(&key(), &v1("first"), false).unwrap();
        stash.set(&key(), &v1("second"), false).unwrap();
    }

    let wal = dir.path().join(WAL_FILE);
    let size = fs::metadata(&wal).unwrap().len();
    let file = fs::OpenOptions::new().write(true).open(&wal).unwrap();
    file.set_len(size - 3).unwrap();
    drop(file);

    let stash: Stash<DatasetV1> = Stash::new(open(dir.path(), None)).unwrap();
    assert_eq!(stash.get_all(&key()).unwrap(), vec![first]);
    stash.set(&key(), &v1("third"), false).unwrap();
    assert_eq!(stash.get_all(&key()).unwrap().len(), 2);
}

#[test]
fn test_replace_batch_is_atomic_on_disk() {
    let dir = tempdir().unwrap();
    let newest;
    {
        let stash: Stash<DatasetV1> = Stash::new(open(dir.path(), None)).unwrap();
        stash.replace(&key(), &v1("ep"), "name").unwrap();
        newest = stash.replace(&key(), &v1("ep"), "name").unwrap();
    }
    let stash: Stash<DatasetV1> = Stash::new(open(dir.path(), None)).unwrap();
    assert_eq!(stash.get_all(&key()).unwrap(), vec![newest]);
}

#[test]
fn test_compaction_shrinks_log_and_keeps_live_records() {
    let dir = tempdir().unwrap();
    let config = PersistentConfig {
        max_wal_size: 4 * 1024,
        sync_on_write: false,
    };
    let survivors;
    {
        let stash: Stash<DatasetV1> = Stash::new(open(dir.path(), Some(config.clone()))).unwrap();
        for i in 0..200 {
            let ds = stash.set(&key(), &v1(&format!("tmp-{i}")), false).unwrap();
            stash.delete_by_uid(&key(), ds.id).unwrap();
        }
        survivors = vec![
            stash.set(&key(), &v1("a"), false).unwrap(),
            stash.set(&key(), &v1("b"), false).unwrap(),
        ];
        stash.store().compact().unwrap();
    }

    assert!(fs::metadata(dir.path().join(WAL_FILE)).unwrap().len() < 4 * 1024);
    let stash: Stash<DatasetV1> = Stash::new(open(dir.path(), Some(config))).unwrap();
    assert_eq!(stash.get_all(&key()).unwrap(), survivors);
}

#[test]
fn test_compaction_keeps_unopened_partitions() {
    let dir = tempdir().unwrap();
    let ds;
    {
        let stash: Stash<DatasetV1> = Stash::new(open(dir.path(), None)).unwrap();
        ds = stash.set(&key(), &v1("parked"), false).unwrap();
    }
    {
        let store = open(dir.path(), None);
        store.compact().unwrap();
    }
    let stash: Stash<DatasetV1> = Stash::new(open(dir.path(), None)).unwrap();
    assert_eq!(stash.get_by_uid(&key(), ds.id).unwrap(), ds);
}

#[test]
fn test_failed_partition_open_keeps_recovered_records() {
    let dir = tempdir().unwrap();
    let loose = PartitionSettings::new("Dataset");
    {
        let stash: Stash<DatasetV1> =
            Stash::with_settings(open(dir.path(), None), loose.clone()).unwrap();
        stash.set(&key(), &v1("dup"), false).unwrap();
        stash.set(&key(), &v1("dup"), false).unwrap();
    }

    let store = open(dir.path(), None);
    let strict = loose.clone().with_index(IndexSpec::unique("name"));
    let err = store.open_partition(strict).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);

    let stash: Stash<DatasetV1> = Stash::with_settings(Arc::clone(&store), loose.clone()).unwrap();
    assert_eq!(stash.get_all(&key()).unwrap().len(), 2);
    store.compact().unwrap();
    drop(stash);
    drop(store);

    let stash: Stash<DatasetV1> = Stash::with_settings(open(dir.path(), None), loose).unwrap();
    assert_eq!(stash.get_all(&key()).unwrap().len(), 2);
}
