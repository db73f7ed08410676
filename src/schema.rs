//! Per-version schemas.
//!
//! Each version of an entity declares a closed list of fields. The list is
//! fixed once shipped: two declarations of the same canonical name and version
//! must agree, which the registry checks through [`ObjectSchema::fingerprint`].

use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::object::{Fields, TypeKey, ID_FIELD};
use crate::value::{json_type_name, FieldKind};

static CANONICAL_NAME_RE: OnceLock<Regex> = OnceLock::new();
static FIELD_NAME_RE: OnceLock<Regex> = OnceLock::new();

fn canonical_name_re() -> &'static Regex {
    CANONICAL_NAME_RE
        .get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]{0,127}$").expect("static regex"))
}

fn field_name_re() -> &'static Regex {
    FIELD_NAME_RE
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,127}$").expect("static regex"))
}

/// Validates a canonical name (also used for partition names).
pub fn validate_canonical_name(name: &str) -> StoreResult<()> {
    if canonical_name_re().is_match(name) {
        Ok(())
    } else {
        Err(StoreError::invalid_migration_spec(format!(
            "invalid canonical name '{name}'"
        )))
    }
}

/// One declared field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name.
    pub name: String,
    /// Declared kind.
    pub kind: FieldKind,
}

impl FieldSpec {
    /// Required field of `kind`.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// blake3 digest identifying a schema's shape.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchemaFingerprint([u8; 32]);

impl SchemaFingerprint {
    /// Raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SchemaFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SchemaFingerprint({self})")
    }
}

impl fmt::Display for SchemaFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0[..8]))
    }
}

/// The closed field list of one version of an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSchema {
    canonical_name: String,
    version: u32,
    type_name: String,
    fields: Vec<FieldSpec>,
}

impl ObjectSchema {
    /// Starts a schema declaration.
    ///
    /// ```
    /// use stashdb::{FieldKind, ObjectSchema};
    ///
    /// let schema = ObjectSchema::builder("Dataset", 2)
    ///     .field("name", FieldKind::String)
    ///     .field("owner", FieldKind::String)
    ///     .build()
    ///     .unwrap();
    /// assert!(schema.has_field("owner"));
    /// ```
    #[must_use]
    pub fn builder(canonical_name: impl Into<String>, version: u32) -> SchemaBuilder {
        let canonical_name = canonical_name.into();
        SchemaBuilder {
            type_name: canonical_name.clone(),
            canonical_name,
            version,
            fields: Vec::new(),
        }
    }

    /// Assembles a schema without validation; [`ObjectSchema::validate`] runs
    /// when it is registered.
    #[must_use]
    pub fn from_parts(
        canonical_name: impl Into<String>,
        version: u32,
        type_name: impl Into<String>,
        fields: Vec<FieldSpec>,
    ) -> Self {
        Self {
            canonical_name: canonical_name.into(),
            version,
            type_name: type_name.into(),
            fields,
        }
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn canonical_name(&self) -> &str {
        &self.canonical_name
    }

    #[allow(missing_docs)]
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Name of the type that declared this schema.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// `(canonical_name, version)` of this schema.
    #[must_use]
    pub fn type_key(&self) -> TypeKey {
        TypeKey::new(self.canonical_name.clone(), self.version)
    }

    /// Declared fields, in order.
    #[must_use]
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Descriptor for `name`.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// True if `name` is declared.
    #[must_use]
    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Checks names, version and field uniqueness.
    pub fn validate(&self) -> StoreResult<()> {
        validate_canonical_name(&self.canonical_name)?;
        if self.version == 0 {
            return Err(StoreError::invalid_migration_spec(format!(
                "{}: versions start at 1",
                self.canonical_name
            )));
        }

        let mut seen = HashSet::new();
        for spec in &self.fields {
            if !field_name_re().is_match(&spec.name) {
                return Err(StoreError::invalid_migration_spec(format!(
                    "{}: invalid field name '{}'",
                    self.type_key(),
                    spec.name
                )));
            }
            if spec.name == ID_FIELD {
                return Err(StoreError::invalid_migration_spec(format!(
                    "{}: '{ID_FIELD}' is the record identity and cannot be declared",
                    self.type_key()
                )));
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(StoreError::invalid_migration_spec(format!(
                    "{}: field '{}' declared twice",
                    self.type_key(),
                    spec.name
                )));
            }
        }
        Ok(())
    }

    /// Digest over canonical name, version and the ordered (name, kind) list.
    #[must_use]
    pub fn fingerprint(&self) -> SchemaFingerprint {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.canonical_name.as_bytes());
        hasher.update(&[0]);
        hasher.update(&self.version.to_le_bytes());
        for spec in &self.fields {
            hasher.update(spec.name.as_bytes());
            hasher.update(&[0]);
            hasher.update(spec.kind.to_string().as_bytes());
            hasher.update(&[0]);
        }
        SchemaFingerprint(*hasher.finalize().as_bytes())
    }

    /// Checks a complete field set: every field declared, every value of the
    /// declared kind, every non-optional field present.
    pub fn check_fields(&self, fields: &Fields) -> StoreResult<()> {
        self.check_partial(fields)?;
        for spec in &self.fields {
            if !fields.contains(&spec.name) && !spec.kind.is_optional() {
                return Err(StoreError::type_mismatch(format!(
                    "{}: missing field '{}'",
                    self.type_key(),
                    spec.name
                )));
            }
        }
        Ok(())
    }

    /// Checks a subset of fields: each must be declared and of its kind.
    pub fn check_partial(&self, fields: &Fields) -> StoreResult<()> {
        for (name, value) in fields.iter() {
            let Some(spec) = self.field(name) else {
                return Err(StoreError::type_mismatch(format!(
                    "{}: unknown field '{name}'",
                    self.type_key()
                )));
            };
            if !spec.kind.matches(value) {
                return Err(StoreError::type_mismatch(format!(
                    "{}: field '{name}' expects {}, got {}",
                    self.type_key(),
                    spec.kind,
                    json_type_name(value)
                )));
            }
        }
        Ok(())
    }
}

/// Builder returned by [`ObjectSchema::builder`].
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    canonical_name: String,
    version: u32,
    type_name: String,
    fields: Vec<FieldSpec>,
}

impl SchemaBuilder {
    /// Appends a field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec::new(name, kind));
        self
    }

    /// Overrides the declaring type name (defaults to the canonical name).
    #[must_use]
    pub fn type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = type_name.into();
        self
    }

    /// Validates and returns the schema.
    pub fn build(self) -> StoreResult<ObjectSchema> {
        let schema = ObjectSchema::from_parts(
            self.canonical_name,
            self.version,
            self.type_name,
            self.fields,
        );
        schema.validate()?;
        Ok(schema)
    }
}
