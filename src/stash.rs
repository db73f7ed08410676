//! Typed façade over one partition of a [`DocumentStore`].
//!
//! A [`Stash<T>`] holds nothing but a store handle and the name of the
//! partition it is bound to. Every payload is checked against `T`'s type key
//! before the store is touched, and every record read back is decoded into
//! `T`, so a stash never hands out a record of another version.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::credentials::VerifyKey;
use crate::error::{StoreError, StoreResult};
use crate::migration::MigrationContext;
use crate::object::{Fields, ObjectUpdate, Uid, Versioned, VersionedObject};
use crate::storage::{DocumentStore, PartitionSettings, QueryKey, QueryKeys, RecordMeta};
use crate::value::Value;

/// Typed access to the records of `T`.
pub struct Stash<T: Versioned> {
    store: Arc<DocumentStore>,
    partition: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Versioned> Clone for Stash<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            partition: self.partition.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Versioned> fmt::Debug for Stash<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stash")
            .field("type", &T::type_key())
            .field("partition", &self.partition)
            .finish()
    }
}

impl<T: Versioned> Stash<T> {
    /// Binds `T` to the partition described by [`Versioned::partition_settings`].
    pub fn new(store: Arc<DocumentStore>) -> StoreResult<Self> {
        Self::with_settings(store, T::partition_settings())
    }

    /// Binds `T` to an explicitly described partition.
    ///
    /// # Errors
    /// - `TypeMismatch` if `settings` names another canonical name, or `T`'s
    ///   declared fields differ from the registered schema of its version
    /// - `UnknownVersion` if `T`'s version was never registered
    pub fn with_settings(store: Arc<DocumentStore>, settings: PartitionSettings) -> StoreResult<Self> {
        let key = T::type_key();
        if settings.canonical_name != key.canonical_name {
            return Err(StoreError::type_mismatch(format!(
                "partition {} stores {}, stash is for {key}",
                settings.name, settings.canonical_name
            )));
        }
        let identity = store.registry().identity(&key).ok_or_else(|| {
            StoreError::unknown_version(format!("{key} is not registered"))
        })?;
        if identity.fingerprint != T::schema().fingerprint() {
            return Err(StoreError::type_mismatch(format!(
                "{} declares different fields than the registered {key} ({})",
                std::any::type_name::<T>(),
                identity.type_name
            )));
        }

        let partition = store.open_partition(settings)?;
        Ok(Self {
            partition: partition.name().to_string(),
            store,
            _marker: PhantomData,
        })
    }

    /// Name of the bound partition.
    #[must_use]
    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// Underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    /// Fails with `TypeMismatch` unless `obj` is a `T`.
    pub fn check_type(&self, obj: &VersionedObject) -> StoreResult<()> {
        let expected = T::type_key();
        if obj.canonical_name == expected.canonical_name && obj.version == expected.version {
            return Ok(());
        }
        Err(StoreError::type_mismatch(format!(
            "stash {} holds {expected}, got {}",
            self.partition,
            obj.type_key()
        )))
    }

    fn decode(&self, obj: VersionedObject) -> StoreResult<T> {
        if let Err(e) = self.check_type(&obj) {
            return Err(StoreError::type_mismatch(format!(
                "{}; record {} needs migrating (see Stash::migrate_all)",
                e.message(),
                obj.id
            )));
        }
        T::from_object(obj)
    }

    fn decode_all(&self, objs: Vec<VersionedObject>) -> StoreResult<Vec<T>> {
        objs.into_iter().map(|obj| self.decode(obj)).collect()
    }

    /// Inserts `value`. See [`DocumentStore::set`].
    ///
    /// With `ignore_duplicates`, the existing record is returned in place of
    /// `value`. If that record is stored at another version it cannot be
    /// returned as a `T`, and the call fails with `TypeMismatch` without
    /// writing anything. Use [`Stash::set_object`] to get the existing
    /// record at its stored version.
    pub fn set(&self, credentials: &VerifyKey, value: &T, ignore_duplicates: bool) -> StoreResult<T> {
        let stored = self.set_object(credentials, value.to_object()?, ignore_duplicates)?;
        if stored.version != T::VERSION {
            return Err(StoreError::type_mismatch(format!(
                "{}: duplicate of record {} stored as {}; read it with Stash::set_object or migrate it with Stash::migrate_all",
                self.partition,
                stored.id,
                stored.type_key()
            )));
        }
        self.decode(stored)
    }

    /// Inserts a dynamic object after checking it is a `T`.
    pub fn set_object(
        &self,
        credentials: &VerifyKey,
        obj: VersionedObject,
        ignore_duplicates: bool,
    ) -> StoreResult<VersionedObject> {
        self.check_type(&obj)?;
        self.store.set(credentials, &self.partition, obj, ignore_duplicates)
    }

    /// Returns the record as a `T`; fails with `TypeMismatch` if it is
    /// stored at another version.
    pub fn get_by_uid(&self, credentials: &VerifyKey, uid: Uid) -> StoreResult<T> {
        self.decode(self.get_object_by_uid(credentials, uid)?)
    }

    /// Returns the record at whatever version it is stored.
    pub fn get_object_by_uid(&self, credentials: &VerifyKey, uid: Uid) -> StoreResult<VersionedObject> {
        self.store.get_by_uid(credentials, &self.partition, uid)
    }

    /// Returns the record migrated to `T`'s version without persisting the
    /// migration.
    pub fn get_migrated(
        &self,
        credentials: &VerifyKey,
        uid: Uid,
        ctx: Option<&MigrationContext>,
    ) -> StoreResult<T> {
        let stored = self.get_object_by_uid(credentials, uid)?;
        let migrated = self.store.registry().migrate(&stored, T::VERSION, ctx)?;
        T::from_object(migrated)
    }

    /// Side metadata of a record.
    pub fn get_meta(&self, credentials: &VerifyKey, uid: Uid) -> StoreResult<RecordMeta> {
        self.store.get_meta(credentials, &self.partition, uid)
    }

    /// Every record, in insertion order.
    pub fn get_all(&self, credentials: &VerifyKey) -> StoreResult<Vec<T>> {
        self.decode_all(self.store.get_all(credentials, &self.partition, None)?)
    }

    /// The single record matching `keys`. See [`DocumentStore::query_one`].
    pub fn query_one(&self, credentials: &VerifyKey, keys: impl Into<QueryKeys>) -> StoreResult<T> {
        let keys = keys.into();
        self.decode(self.store.query_one(credentials, &self.partition, &keys)?)
    }

    /// Every record matching `keys`.
    pub fn query_all(&self, credentials: &VerifyKey, keys: impl Into<QueryKeys>) -> StoreResult<Vec<T>> {
        let keys = keys.into();
        self.decode_all(self.store.get_all(credentials, &self.partition, Some(&keys))?)
    }

    /// The single record whose `field` equals `value`.
    pub fn find_one_by(
        &self,
        credentials: &VerifyKey,
        field: &str,
        value: impl Into<Value>,
    ) -> StoreResult<T> {
        self.query_one(credentials, QueryKey::new(field, value))
    }

    /// Every record whose `field` equals `value`.
    pub fn find_all_by(
        &self,
        credentials: &VerifyKey,
        field: &str,
        value: impl Into<Value>,
    ) -> StoreResult<Vec<T>> {
        self.query_all(credentials, QueryKey::new(field, value))
    }

    /// Overwrites every declared field of the stored record with `value`'s.
    pub fn update(&self, credentials: &VerifyKey, value: &T) -> StoreResult<T> {
        let update = ObjectUpdate::from(value.to_object()?);
        let merged = self.store.update(credentials, &self.partition, update)?;
        self.decode(merged)
    }

    /// Overwrites only `fields` of the stored record.
    pub fn update_fields(&self, credentials: &VerifyKey, uid: Uid, fields: Fields) -> StoreResult<T> {
        let mut update = ObjectUpdate::new(&T::type_key(), uid);
        update.fields = fields;
        let merged = self.store.update(credentials, &self.partition, update)?;
        self.decode(merged)
    }

    /// Stores `value` in place of the records sharing its `key_field`. See
    /// [`DocumentStore::replace`].
    pub fn replace(&self, credentials: &VerifyKey, value: &T, key_field: &str) -> StoreResult<T> {
        let obj = value.to_object()?;
        self.check_type(&obj)?;
        let stored = self.store.replace(credentials, &self.partition, obj, key_field)?;
        self.decode(stored)
    }

    /// Removes the record with `uid`, whatever version it is stored at.
    pub fn delete_by_uid(&self, credentials: &VerifyKey, uid: Uid) -> StoreResult<()> {
        self.store.delete_by_uid(credentials, &self.partition, uid)
    }

    /// Migrates every record stored at another version to `T`'s version.
    /// Returns the number of records migrated.
    ///
    /// Each record is migrated and persisted on its own; on error the
    /// records already migrated stay migrated.
    pub fn migrate_all(
        &self,
        credentials: &VerifyKey,
        ctx: Option<&MigrationContext>,
    ) -> StoreResult<usize> {
        let stale = self.store.uids_not_at(credentials, &self.partition, T::VERSION)?;
        for uid in &stale {
            self.store
                .migrate_record(credentials, &self.partition, *uid, T::VERSION, ctx)?;
        }
        if !stale.is_empty() {
            tracing::info!(
                partition = %self.partition,
                target = %T::type_key(),
                migrated = stale.len(),
                "migrated stash records"
            );
        }
        Ok(stale.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::migration::MigrationRegistry;
    use crate::object::TypeKey;
    use crate::permission::AllowAll;
    use crate::schema::FieldSpec;
    use crate::storage::IndexSpec;
    use crate::value::FieldKind;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Model {
        id: Uid,
        name: String,
        layers: i64,
    }

    impl Versioned for Model {
        const CANONICAL_NAME: &'static str = "Model";
        const VERSION: u32 = 1;

        fn fields() -> Vec<FieldSpec> {
            vec![
                FieldSpec::new("name", FieldKind::String),
                FieldSpec::new("layers", FieldKind::Int),
            ]
        }

        fn uid(&self) -> Uid {
            self.id
        }

        fn indexes() -> Vec<IndexSpec> {
            vec![IndexSpec::unique("name")]
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Impostor {
        id: Uid,
        title: String,
    }

    impl Versioned for Impostor {
        const CANONICAL_NAME: &'static str = "Model";
        const VERSION: u32 = 1;

        fn fields() -> Vec<FieldSpec> {
            vec![FieldSpec::new("title", FieldKind::String)]
        }

        fn uid(&self) -> Uid {
            self.id
        }
    }

    fn stash() -> Stash<Model> {
        let mut builder = MigrationRegistry::builder();
        builder.declare_version::<Model>().unwrap();
        let store = DocumentStore::new(Arc::new(builder.finish()), Arc::new(AllowAll)).unwrap();
        Stash::new(Arc::new(store)).unwrap()
    }

    fn key() -> VerifyKey {
        VerifyKey::derive("ops")
    }

    fn model(name: &str) -> Model {
        Model {
            id: Uid::new(),
            name: name.into(),
            layers: 3,
        }
    }

    #[test]
    fn test_set_and_find() {
        let stash = stash();
        let m = model("resnet");
        stash.set(&key(), &m, false).unwrap();
        assert_eq!(stash.get_by_uid(&key(), m.id).unwrap(), m);
        assert_eq!(stash.find_one_by(&key(), "name", "resnet").unwrap(), m);
        assert_eq!(stash.find_all_by(&key(), "layers", 3).unwrap(), vec![m]);
    }

    #[test]
    fn test_check_type_rejects_before_store() {
        let stash = stash();
        let foreign = VersionedObject::new(&TypeKey::new("Model", 2), Uid::new(), Fields::new());
        let err = stash.set_object(&key(), foreign, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert_eq!(stash.store().stats("Model").unwrap().failures, 0);
    }

    #[test]
    fn test_stash_for_unregistered_shape_fails() {
        let store = stash().store().clone();
        let err = Stash::<Impostor>::new(store).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_update_fields_and_delete() {
        let stash = stash();
        let m = stash.set(&key(), &model("vit"), false).unwrap();
        let updated = stash
            .update_fields(&key(), m.id, Fields::new().with("layers", 12))
            .unwrap();
        assert_eq!(updated.layers, 12);
        assert_eq!(updated.name, "vit");

        stash.delete_by_uid(&key(), m.id).unwrap();
        let err = stash.get_by_uid(&key(), m.id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_update_with_wrong_kind_is_type_mismatch() {
        let stash = stash();
        let m = stash.set(&key(), &model("vit"), false).unwrap();
        let err = stash
            .update_fields(&key(), m.id, Fields::new().with("layers", "many"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    }
}
