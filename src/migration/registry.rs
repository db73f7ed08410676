//! Migration registry.
//!
//! Registration happens on a [`RegistryBuilder`] owned by the startup routine.
//! [`RegistryBuilder::finish`] freezes it into a [`MigrationRegistry`], which is
//! read-only and shared by reference with every store. A store can only be
//! built from a finished registry, so schema registration can never race live
//! traffic.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::{StoreError, StoreResult};
use crate::object::{TypeKey, Versioned, VersionedObject};
use crate::schema::{validate_canonical_name, ObjectSchema, SchemaFingerprint};

use super::transform::{build_transform, MigrationContext, Transform, TransformOp};

/// Identity recorded for a registered version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeIdentity {
    /// Name of the declaring type.
    pub type_name: String,
    /// Shape digest of the declared schema.
    pub fingerprint: SchemaFingerprint,
}

#[derive(Debug, Clone)]
struct VersionEntry {
    identity: TypeIdentity,
    schema: Arc<ObjectSchema>,
}

type VersionTable = HashMap<String, BTreeMap<u32, VersionEntry>>;
type TransformTable = HashMap<String, HashMap<(u32, u32), Arc<Transform>>>;

/// Write phase of the registry.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    versions: VersionTable,
    transforms: TransformTable,
}

impl RegistryBuilder {
    /// Empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `schema`'s version exists for its canonical name.
    ///
    /// Re-registering an identical schema is a no-op. Registering the same
    /// canonical name and version with a different identity fails with
    /// `InvalidMigrationSpec`, since data written under the first shape would
    /// be reinterpreted.
    pub fn register_version(&mut self, schema: ObjectSchema) -> StoreResult<&mut Self> {
        schema.validate()?;
        let identity = TypeIdentity {
            type_name: schema.type_name().to_string(),
            fingerprint: schema.fingerprint(),
        };
        let existing = self
            .versions
            .get(schema.canonical_name())
            .and_then(|v| v.get(&schema.version()));
        if let Some(existing) = existing {
            if existing.identity != identity {
                return Err(StoreError::invalid_migration_spec(format!(
                    "{} is already registered as {} ({}); refusing {} ({})",
                    schema.type_key(),
                    existing.identity.type_name,
                    existing.identity.fingerprint,
                    identity.type_name,
                    identity.fingerprint
                )));
            }
            return Ok(self);
        }

        self.versions
            .entry(schema.canonical_name().to_string())
            .or_default()
            .insert(
                schema.version(),
                VersionEntry {
                    identity,
                    schema: Arc::new(schema),
                },
            );
        Ok(self)
    }

    /// Registers the schema declared by `T`.
    pub fn declare_version<T: Versioned>(&mut self) -> StoreResult<&mut Self> {
        self.register_version(T::schema())
    }

    /// Stores `transform` for the ordered pair `(version_from, version_to)`.
    ///
    /// # Errors
    /// - `UnknownVersion` if either version is not registered for
    ///   `canonical_name`.
    /// - `InvalidMigrationSpec` if the transform was built for another pair.
    pub fn register_transform(
        &mut self,
        canonical_name: &str,
        version_from: u32,
        version_to: u32,
        transform: Transform,
    ) -> StoreResult<&mut Self> {
        validate_canonical_name(canonical_name)?;
        let Some(available) = self.versions.get(canonical_name) else {
            return Err(StoreError::unknown_version(format!(
                "{canonical_name} is not registered"
            )));
        };
        for v in [version_from, version_to] {
            if !available.contains_key(&v) {
                return Err(StoreError::unknown_version(format!(
                    "{canonical_name}@v{v} is not registered (available: {:?})",
                    available.keys().collect::<Vec<_>>()
                )));
            }
        }

        let expected = (
            TypeKey::new(canonical_name, version_from),
            TypeKey::new(canonical_name, version_to),
        );
        if (transform.from_key(), transform.to_key()) != expected {
            return Err(StoreError::invalid_migration_spec(format!(
                "transform {} -> {} registered under {} -> {}",
                transform.from_key(),
                transform.to_key(),
                expected.0,
                expected.1
            )));
        }

        let slot = self
            .transforms
            .entry(canonical_name.to_string())
            .or_default();
        if slot
            .insert((version_from, version_to), Arc::new(transform))
            .is_some()
        {
            tracing::warn!(
                canonical_name,
                version_from,
                version_to,
                "replacing previously registered transform"
            );
        }
        Ok(self)
    }

    /// Builds a transform from declarative steps and registers it.
    pub fn declare_migration(
        &mut self,
        canonical_name: &str,
        version_from: u32,
        version_to: u32,
        ops: Vec<TransformOp>,
    ) -> StoreResult<&mut Self> {
        let from = self.schema(canonical_name, version_from)?;
        let to = self.schema(canonical_name, version_to)?;
        let transform = build_transform(from, to, ops)?;
        self.register_transform(canonical_name, version_from, version_to, transform)
    }

    /// Typed form of [`RegistryBuilder::declare_migration`].
    ///
    /// # Errors
    /// - `CrossTypeMigration` if `A` and `B` have different canonical names.
    pub fn declare_migration_between<A: Versioned, B: Versioned>(
        &mut self,
        ops: Vec<TransformOp>,
    ) -> StoreResult<&mut Self> {
        if A::CANONICAL_NAME != B::CANONICAL_NAME {
            return Err(StoreError::cross_type_migration(format!(
                "cannot migrate {} to {}",
                A::type_key(),
                B::type_key()
            )));
        }
        self.declare_migration(A::CANONICAL_NAME, A::VERSION, B::VERSION, ops)
    }

    fn schema(&self, canonical_name: &str, version: u32) -> StoreResult<Arc<ObjectSchema>> {
        lookup_schema(&self.versions, canonical_name, version)
    }

    /// Freezes the registry. No further registration is possible.
    #[must_use]
    pub fn finish(self) -> MigrationRegistry {
        let version_count: usize = self.versions.values().map(BTreeMap::len).sum();
        let transform_count: usize = self.transforms.values().map(HashMap::len).sum();
        tracing::info!(
            canonical_names = self.versions.len(),
            versions = version_count,
            transforms = transform_count,
            "migration registry ready"
        );
        MigrationRegistry {
            versions: self.versions,
            transforms: self.transforms,
        }
    }
}

fn lookup_schema(
    versions: &VersionTable,
    canonical_name: &str,
    version: u32,
) -> StoreResult<Arc<ObjectSchema>> {
    versions
        .get(canonical_name)
        .and_then(|v| v.get(&version))
        .map(|entry| Arc::clone(&entry.schema))
        .ok_or_else(|| {
            StoreError::unknown_version(format!("{canonical_name}@v{version} is not registered"))
        })
}

/// Read phase of the registry: immutable, safe for unlimited concurrent
/// readers.
#[derive(Debug)]
pub struct MigrationRegistry {
    versions: VersionTable,
    transforms: TransformTable,
}

impl MigrationRegistry {
    /// Starts a new registration phase.
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Schema of one registered version.
    pub fn schema(&self, canonical_name: &str, version: u32) -> StoreResult<Arc<ObjectSchema>> {
        lookup_schema(&self.versions, canonical_name, version)
    }

    /// Schema for a type key.
    pub fn schema_for(&self, key: &TypeKey) -> StoreResult<Arc<ObjectSchema>> {
        self.schema(&key.canonical_name, key.version)
    }

    /// Identity recorded for a registered version.
    #[must_use]
    pub fn identity(&self, key: &TypeKey) -> Option<&TypeIdentity> {
        self.versions
            .get(&key.canonical_name)
            .and_then(|v| v.get(&key.version))
            .map(|entry| &entry.identity)
    }

    /// Registered versions of a canonical name, ascending.
    #[must_use]
    pub fn versions(&self, canonical_name: &str) -> Vec<u32> {
        self.versions
            .get(canonical_name)
            .map(|v| v.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Highest registered version of a canonical name.
    #[must_use]
    pub fn latest_version(&self, canonical_name: &str) -> Option<u32> {
        self.versions
            .get(canonical_name)
            .and_then(|v| v.keys().next_back().copied())
    }

    /// True if `key` names a registered version.
    #[must_use]
    pub fn is_registered(&self, key: &TypeKey) -> bool {
        self.identity(key).is_some()
    }

    /// Directly registered transform for `type_from -> type_to`.
    ///
    /// Multi-hop chains are never composed implicitly: every pair that needs
    /// support must have its own registered transform.
    ///
    /// # Errors
    /// - `CrossTypeMigration` if the canonical names differ.
    /// - `UnknownVersion` if either version is not registered.
    /// - `NoMigrationPath` if no transform is registered for the pair.
    pub fn get_migration(&self, type_from: &TypeKey, type_to: &TypeKey) -> StoreResult<Arc<Transform>> {
        if type_from.canonical_name != type_to.canonical_name {
            return Err(StoreError::cross_type_migration(format!(
                "cannot migrate {type_from} to {type_to}"
            )));
        }
        self.schema_for(type_from)?;
        self.schema_for(type_to)?;

        self.transforms
            .get(&type_from.canonical_name)
            .and_then(|t| t.get(&(type_from.version, type_to.version)))
            .cloned()
            .ok_or_else(|| {
                StoreError::no_migration_path(format!(
                    "no migration registered for {type_from} -> {type_to}"
                ))
            })
    }

    /// Typed form of [`MigrationRegistry::get_migration`].
    pub fn get_migration_for<A: Versioned, B: Versioned>(&self) -> StoreResult<Arc<Transform>> {
        self.get_migration(&A::type_key(), &B::type_key())
    }

    /// Migrates `obj` to `target_version` of its canonical name. Returns a
    /// clone when the object is already at that version.
    pub fn migrate(
        &self,
        obj: &VersionedObject,
        target_version: u32,
        ctx: Option<&MigrationContext>,
    ) -> StoreResult<VersionedObject> {
        let target = TypeKey::new(obj.canonical_name.clone(), target_version);
        if obj.version == target_version {
            self.schema_for(&target)?;
            return Ok(obj.clone());
        }
        self.get_migration(&obj.type_key(), &target)?.apply(obj, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::object::{Fields, Uid};
    use crate::value::FieldKind;
    use serde_json::json;

    fn dataset(version: u32, fields: &[&str]) -> ObjectSchema {
        let mut b = ObjectSchema::builder("Dataset", version);
        for f in fields {
            b = b.field(*f, FieldKind::String);
        }
        b.build().unwrap()
    }

    fn registry() -> MigrationRegistry {
        let mut builder = MigrationRegistry::builder();
        builder.register_version(dataset(1, &["name"])).unwrap();
        builder.register_version(dataset(2, &["name", "owner"])).unwrap();
        builder.register_version(dataset(3, &["name", "owner", "license"])).unwrap();
        builder
            .declare_migration("Dataset", 1, 2, vec![TransformOp::set_default("owner", "unknown")])
            .unwrap()
            .declare_migration("Dataset", 2, 1, vec![TransformOp::drop(["owner"])])
            .unwrap()
            .declare_migration("Dataset", 2, 3, vec![TransformOp::set_default("license", "cc0")])
            .unwrap();
        builder.finish()
    }

    #[test]
    fn test_idempotent_version_registration() {
        let mut builder = RegistryBuilder::new();
        builder.register_version(dataset(1, &["name"])).unwrap();
        builder.register_version(dataset(1, &["name"])).unwrap();
        assert_eq!(builder.finish().versions("Dataset"), vec![1]);
    }

    #[test]
    fn test_conflicting_version_registration_fails() {
        let mut builder = RegistryBuilder::new();
        builder.register_version(dataset(1, &["name"])).unwrap();
        let err = builder.register_version(dataset(1, &["title"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidMigrationSpec);
    }

    #[test]
    fn test_transform_for_unknown_version_fails() {
        let mut builder = RegistryBuilder::new();
        builder.register_version(dataset(1, &["name"])).unwrap();
        let err = builder
            .declare_migration("Dataset", 1, 2, vec![])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownVersion);

        let err = builder
            .declare_migration("Unknown", 1, 2, vec![])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownVersion);
    }

    #[test]
    fn test_register_transform_checks_pair() {
        let mut builder = RegistryBuilder::new();
        builder.register_version(dataset(1, &["name"])).unwrap();
        builder.register_version(dataset(2, &["name", "owner"])).unwrap();
        builder.register_version(dataset(3, &["name", "owner"])).unwrap();
        let t = build_transform(
            Arc::new(dataset(1, &["name"])),
            Arc::new(dataset(2, &["name", "owner"])),
            vec![TransformOp::set_default("owner", "x")],
        )
        .unwrap();
        let err = builder.register_transform("Dataset", 1, 3, t).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidMigrationSpec);
    }

    #[test]
    fn test_get_migration_direct_pair() {
        let reg = registry();
        let t = reg
            .get_migration(&TypeKey::new("Dataset", 1), &TypeKey::new("Dataset", 2))
            .unwrap();
        let obj = VersionedObject::new(&TypeKey::new("Dataset", 1), Uid::new(), Fields::new().with("name", "x"));
        let out = t.apply(&obj, None).unwrap();
        assert_eq!(out.get("owner"), Some(&json!("unknown")));
    }

    #[test]
    fn test_no_implicit_chaining() {
        let reg = registry();
        let err = reg
            .get_migration(&TypeKey::new("Dataset", 1), &TypeKey::new("Dataset", 3))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoMigrationPath);
    }

    #[test]
    fn test_unknown_and_cross_type() {
        let reg = registry();
        let err = reg
            .get_migration(&TypeKey::new("Dataset", 1), &TypeKey::new("Dataset", 9))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownVersion);

        let err = reg
            .get_migration(&TypeKey::new("Dataset", 1), &TypeKey::new("Endpoint", 1))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CrossTypeMigration);
    }

    #[test]
    fn test_migrate_same_version_is_clone() {
        let reg = registry();
        let obj = VersionedObject::new(&TypeKey::new("Dataset", 1), Uid::new(), Fields::new().with("name", "x"));
        assert_eq!(reg.migrate(&obj, 1, None).unwrap(), obj);
    }

    #[test]
    fn test_downgrade_transform() {
        let reg = registry();
        let obj = VersionedObject::new(
            &TypeKey::new("Dataset", 2),
            Uid::new(),
            Fields::new().with("name", "x").with("owner", "o"),
        );
        let down = reg.migrate(&obj, 1, None).unwrap();
        assert_eq!(down.version, 1);
        assert!(!down.fields.contains("owner"));
    }

    #[test]
    fn test_latest_version() {
        let reg = registry();
        assert_eq!(reg.latest_version("Dataset"), Some(3));
        assert_eq!(reg.latest_version("Nope"), None);
        assert_eq!(reg.versions("Dataset"), vec![1, 2, 3]);
    }
}
