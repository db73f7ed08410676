//! Versioned objects: the unit that is persisted and migrated.
//!
//! A [`VersionedObject`] is the dynamic form every store operation works on: a
//! canonical name, a version, a stable [`Uid`] and an ordered field list.
//! Application structs opt in through the [`Versioned`] trait, which converts
//! them to and from the dynamic form via `serde_json`.

use std::fmt;

use serde::de::{DeserializeOwned, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::migration::{MigrationContext, MigrationRegistry};
use crate::schema::{FieldSpec, ObjectSchema};
use crate::storage::{IndexSpec, PartitionSettings};
use crate::value::Value;

/// Name of the identity field in the serialized form of a typed object.
pub const ID_FIELD: &str = "id";

/// Globally unique record identifier, stable across versions of the same
/// logical record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(Uuid);

impl Uid {
    /// Creates a new random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parses the hyphenated string form.
    pub fn parse(s: &str) -> StoreResult<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| StoreError::type_mismatch(format!("invalid uid '{s}': {e}")))
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Nil identifier, for sentinels in tests.
    #[must_use]
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }
}

impl Default for Uid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for Uid {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Identity of one version of a logical entity type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeKey {
    /// Stable name shared by all versions.
    pub canonical_name: String,
    /// Version number, starting at 1.
    pub version: u32,
}

impl TypeKey {
    /// Key for `version` of `canonical_name`.
    #[must_use]
    pub fn new(canonical_name: impl Into<String>, version: u32) -> Self {
        Self {
            canonical_name: canonical_name.into(),
            version,
        }
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@v{}", self.canonical_name, self.version)
    }
}

/// Ordered mapping of field name to value.
///
/// Insertion order is preserved and [`Fields::rename`] keeps the renamed field
/// at its original position, so stored shapes diff cleanly between versions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields(Vec<(String, Value)>);

impl Fields {
    /// Empty field list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Value of `name`, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// True if `name` is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Position of a field in declaration order.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|(k, _)| k == name)
    }

    /// Sets a field, replacing in place if present, appending otherwise.
    /// Returns the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(idx) => Some(std::mem::replace(&mut self.0[idx].1, value)),
            None => {
                self.0.push((name, value));
                None
            }
        }
    }

    /// Removes a field, preserving the order of the rest.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.position(name).map(|idx| self.0.remove(idx).1)
    }

    /// Renames a field in place. Returns false if `from` is absent.
    pub fn rename(&mut self, from: &str, to: impl Into<String>) -> bool {
        let to = to.into();
        if from == to {
            return self.contains(from);
        }
        if !self.contains(from) {
            return false;
        }
        self.remove(&to);
        if let Some(idx) = self.position(from) {
            self.0[idx].0 = to;
        }
        true
    }

    /// Iterates fields in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Field names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    /// Same names and values, ignoring order.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl FromIterator<(String, Value)> for Fields {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut fields = Self::new();
        for (k, v) in iter {
            fields.insert(k, v);
        }
        fields
    }
}

impl IntoIterator for Fields {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl Serialize for Fields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Fields {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FieldsVisitor;

        impl<'de> Visitor<'de> for FieldsVisitor {
            type Value = Fields;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of field names to values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Fields, A::Error> {
                let mut out = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((k, v)) = access.next_entry::<String, Value>()? {
                    out.push((k, v));
                }
                Ok(Fields(out))
            }
        }

        deserializer.deserialize_map(FieldsVisitor)
    }
}

/// A record in its dynamic, version-tagged form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedObject {
    /// Stable name of the logical entity.
    pub canonical_name: String,
    /// Schema version the fields conform to.
    pub version: u32,
    /// Record identity.
    pub id: Uid,
    /// Business fields, in declaration order.
    pub fields: Fields,
}

impl VersionedObject {
    /// Builds an object of type `key`.
    #[must_use]
    pub fn new(key: &TypeKey, id: Uid, fields: Fields) -> Self {
        Self {
            canonical_name: key.canonical_name.clone(),
            version: key.version,
            id,
            fields,
        }
    }

    /// The (canonical name, version) pair of this object.
    #[must_use]
    pub fn type_key(&self) -> TypeKey {
        TypeKey::new(self.canonical_name.clone(), self.version)
    }

    /// Value of `field`, if present.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Looks up a field by name, treating `id` as the identity field.
    #[must_use]
    pub fn lookup(&self, field: &str) -> Option<Value> {
        if field == ID_FIELD {
            return Some(Value::String(self.id.to_string()));
        }
        self.fields.get(field).cloned()
    }

    /// Migrates this object to `target_version` through the registry.
    pub fn migrate_to(
        &self,
        registry: &MigrationRegistry,
        target_version: u32,
        ctx: Option<&MigrationContext>,
    ) -> StoreResult<Self> {
        registry.migrate(self, target_version, ctx)
    }
}

/// A partial or full set of field changes for an existing record.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectUpdate {
    /// Canonical name of the payload type.
    pub canonical_name: String,
    /// Version of the payload type.
    pub version: u32,
    /// Record to update.
    pub id: Uid,
    /// Fields to overwrite; absent fields are left unchanged.
    pub fields: Fields,
}

impl ObjectUpdate {
    /// Empty update for record `id` of type `key`.
    #[must_use]
    pub fn new(key: &TypeKey, id: Uid) -> Self {
        Self {
            canonical_name: key.canonical_name.clone(),
            version: key.version,
            id,
            fields: Fields::new(),
        }
    }

    /// Builder-style field change.
    #[must_use]
    pub fn set(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name, value);
        self
    }

    /// Type the update targets.
    #[must_use]
    pub fn type_key(&self) -> TypeKey {
        TypeKey::new(self.canonical_name.clone(), self.version)
    }
}

impl From<VersionedObject> for ObjectUpdate {
    fn from(obj: VersionedObject) -> Self {
        Self {
            canonical_name: obj.canonical_name,
            version: obj.version,
            id: obj.id,
            fields: obj.fields,
        }
    }
}

/// An application type persisted through a [`crate::Stash`].
///
/// Implementors serialize to a JSON object with an `id` field holding their
/// [`Uid`] plus one entry per declared field.
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use stashdb::{FieldKind, FieldSpec, Uid, Versioned};
///
/// #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// struct Dataset {
///     id: Uid,
///     name: String,
/// }
///
/// impl Versioned for Dataset {
///     const CANONICAL_NAME: &'static str = "Dataset";
///     const VERSION: u32 = 1;
///
///     fn fields() -> Vec<FieldSpec> {
///         vec![FieldSpec::new("name", FieldKind::String)]
///     }
///
///     fn uid(&self) -> Uid {
///         self.id
///     }
/// }
///
/// let ds = Dataset { id: Uid::new(), name: "x".into() };
/// let obj = ds.to_object().unwrap();
/// assert_eq!(obj.version, 1);
/// assert_eq!(Dataset::from_object(obj).unwrap(), ds);
/// ```
pub trait Versioned: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable name shared by every version of this entity.
    const CANONICAL_NAME: &'static str;
    /// Version of this particular struct.
    const VERSION: u32;

    /// Business fields of this version, in declaration order.
    fn fields() -> Vec<FieldSpec>;

    /// Record identity.
    fn uid(&self) -> Uid;

    /// Indexed fields of the partition this type is stored in.
    fn indexes() -> Vec<IndexSpec> {
        Vec::new()
    }

    /// (canonical name, version) of this type.
    fn type_key() -> TypeKey {
        TypeKey::new(Self::CANONICAL_NAME, Self::VERSION)
    }

    /// The schema declared by this type.
    fn schema() -> ObjectSchema {
        ObjectSchema::from_parts(
            Self::CANONICAL_NAME,
            Self::VERSION,
            std::any::type_name::<Self>(),
            Self::fields(),
        )
    }

    /// Partition settings a stash for this type opens.
    fn partition_settings() -> PartitionSettings {
        PartitionSettings::new(Self::CANONICAL_NAME).with_indexes(Self::indexes())
    }

    /// Converts to the dynamic form, ordering fields as declared.
    fn to_object(&self) -> StoreResult<VersionedObject> {
        let Value::Object(mut map) = serde_json::to_value(self)? else {
            return Err(StoreError::type_mismatch(format!(
                "{} does not serialize to an object",
                Self::type_key()
            )));
        };

        let id = match map.remove(ID_FIELD) {
            Some(Value::String(s)) => Uid::parse(&s)?,
            _ => {
                return Err(StoreError::type_mismatch(format!(
                    "{} has no string '{ID_FIELD}' field",
                    Self::type_key()
                )))
            }
        };
        if id != self.uid() {
            return Err(StoreError::type_mismatch(format!(
                "{}: serialized id {id} differs from uid() {}",
                Self::type_key(),
                self.uid()
            )));
        }

        let mut fields = Fields::new();
        for spec in Self::fields() {
            let value = map.remove(&spec.name).unwrap_or(Value::Null);
            fields.insert(spec.name, value);
        }
        if let Some(extra) = map.keys().next() {
            return Err(StoreError::type_mismatch(format!(
                "{}: serialized field '{extra}' is not declared",
                Self::type_key()
            )));
        }

        Ok(VersionedObject::new(&Self::type_key(), id, fields))
    }

    /// Converts from the dynamic form; fails if the type key differs.
    fn from_object(obj: VersionedObject) -> StoreResult<Self> {
        let expected = Self::type_key();
        if obj.canonical_name != expected.canonical_name || obj.version != expected.version {
            return Err(StoreError::type_mismatch(format!(
                "expected {expected}, got {}",
                obj.type_key()
            )));
        }

        let mut map = serde_json::Map::with_capacity(obj.fields.len() + 1);
        map.insert(ID_FIELD.to_string(), Value::String(obj.id.to_string()));
        for (k, v) in obj.fields {
            map.insert(k, v);
        }
        serde_json::from_value(Value::Object(map))
            .map_err(|e| StoreError::type_mismatch(format!("{expected}: {e}")))
    }

    /// Migrates this instance to another version of the same entity.
    fn migrate_to<U: Versioned>(
        &self,
        registry: &MigrationRegistry,
        ctx: Option<&MigrationContext>,
    ) -> StoreResult<U> {
        let transform = registry.get_migration(&Self::type_key(), &U::type_key())?;
        let migrated = transform.apply(&self.to_object()?, ctx)?;
        U::from_object(migrated)
    }
}
