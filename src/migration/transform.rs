//! Transform composer.
//!
//! Builds an executable [`Transform`] between two adjacent schema versions from
//! an ordered list of declarative [`TransformOp`]s. All structural checks run
//! in [`build_transform`], so a malformed migration fails at startup instead of
//! on the first record that needs it.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::credentials::VerifyKey;
use crate::error::{StoreError, StoreResult};
use crate::object::{Fields, TypeKey, VersionedObject};
use crate::schema::ObjectSchema;
use crate::value::Value;

/// Execution context handed to transforms.
#[derive(Debug, Clone)]
pub struct MigrationContext {
    /// Key of the caller driving the migration, if any.
    pub credentials: Option<VerifyKey>,
    /// Wall-clock time of the migration.
    pub now: DateTime<Utc>,
}

impl MigrationContext {
    /// Context for `credentials`, stamped with the current time.
    #[must_use]
    pub fn new(credentials: Option<VerifyKey>) -> Self {
        Self {
            credentials,
            now: Utc::now(),
        }
    }
}

impl Default for MigrationContext {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Signature of a custom migration step.
pub type CustomFn = dyn Fn(&mut Fields, Option<&MigrationContext>) -> StoreResult<()> + Send + Sync;

/// One declarative migration step.
#[derive(Clone)]
pub enum TransformOp {
    /// Populate a target-version field with a constant.
    SetDefault {
        /// Target field.
        field: String,
        /// Value stored when the field is absent.
        value: Value,
    },
    /// Remove source-version fields.
    Drop {
        /// Source fields to remove.
        fields: Vec<String>,
    },
    /// Rename a field, keeping its position.
    Rename {
        /// Source field name.
        from: String,
        /// Target field name.
        to: String,
    },
    /// Arbitrary field rewrite.
    Custom(Arc<CustomFn>),
}

impl TransformOp {
    /// Builds a [`TransformOp::SetDefault`].
    #[must_use]
    pub fn set_default(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::SetDefault {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Builds a [`TransformOp::Drop`].
    #[must_use]
    pub fn drop<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Drop {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Builds a [`TransformOp::Rename`].
    #[must_use]
    pub fn rename(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::Rename {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Wraps a closure as a [`TransformOp::Custom`].
    #[must_use]
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&mut Fields, Option<&MigrationContext>) -> StoreResult<()> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    fn apply(&self, fields: &mut Fields, ctx: Option<&MigrationContext>) -> StoreResult<()> {
        match self {
            Self::SetDefault { field, value } => {
                fields.insert(field.clone(), value.clone());
            }
            Self::Drop { fields: names } => {
                for name in names {
                    fields.remove(name);
                }
            }
            Self::Rename { from, to } => {
                fields.rename(from, to.clone());
            }
            Self::Custom(f) => f(fields, ctx)?,
        }
        Ok(())
    }
}

impl fmt::Debug for TransformOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetDefault { field, value } => write!(f, "set_default({field}, {value})"),
            Self::Drop { fields } => write!(f, "drop({})", fields.join(", ")),
            Self::Rename { from, to } => write!(f, "rename({from} -> {to})"),
            Self::Custom(_) => write!(f, "custom(..)"),
        }
    }
}

/// A validated, executable migration between two versions.
#[derive(Debug, Clone)]
pub struct Transform {
    from: Arc<ObjectSchema>,
    to: Arc<ObjectSchema>,
    ops: Vec<TransformOp>,
}

impl Transform {
    /// Source version.
    #[must_use]
    pub fn from_key(&self) -> TypeKey {
        self.from.type_key()
    }

    /// Target version.
    #[must_use]
    pub fn to_key(&self) -> TypeKey {
        self.to.type_key()
    }

    /// The declared steps, in order.
    #[must_use]
    pub fn ops(&self) -> &[TransformOp] {
        &self.ops
    }

    /// Runs the steps in declaration order against a copy of `obj`.
    ///
    /// # Errors
    /// - `TypeMismatch` if `obj` is not an instance of the source version, or
    ///   the produced fields do not satisfy the target schema.
    pub fn apply(
        &self,
        obj: &VersionedObject,
        ctx: Option<&MigrationContext>,
    ) -> StoreResult<VersionedObject> {
        if obj.canonical_name != self.from.canonical_name() || obj.version != self.from.version() {
            return Err(StoreError::type_mismatch(format!(
                "transform {} -> {} cannot apply to {}",
                self.from_key(),
                self.to_key(),
                obj.type_key()
            )));
        }

        let mut fields = obj.fields.clone();
        for op in &self.ops {
            op.apply(&mut fields, ctx)?;
        }
        self.to.check_fields(&fields)?;

        Ok(VersionedObject::new(&self.to.type_key(), obj.id, fields))
    }
}

/// Validates `ops` against both schemas and returns the executable transform.
///
/// # Errors
/// - `CrossTypeMigration` if the schemas have different canonical names.
/// - `InvalidMigrationSpec` if a `drop`/`rename` source is not a field of
///   `from`, a `rename`/`set_default` target is not a field of `to`, a
///   `set_default` target was already populated by an earlier step, a default
///   value has the wrong kind, or (when no `custom` step is present) the
///   resulting field set is not exactly the target's.
pub fn build_transform(
    from: Arc<ObjectSchema>,
    to: Arc<ObjectSchema>,
    ops: Vec<TransformOp>,
) -> StoreResult<Transform> {
    if from.canonical_name() != to.canonical_name() {
        return Err(StoreError::cross_type_migration(format!(
            "cannot migrate {} to {}",
            from.type_key(),
            to.type_key()
        )));
    }
    let label = format!("{} -> {}", from.type_key(), to.type_key());
    let invalid = |msg: String| StoreError::invalid_migration_spec(format!("{label}: {msg}"));

    let mut present: Vec<String> = from.fields().iter().map(|f| f.name.clone()).collect();
    let mut assigned: HashSet<String> = HashSet::new();
    let mut opaque = false;

    for (idx, op) in ops.iter().enumerate() {
        match op {
            TransformOp::Drop { fields } => {
                for name in fields {
                    if !from.has_field(name) {
                        return Err(invalid(format!("step {idx}: drop of unknown field '{name}'")));
                    }
                    let pos = present.iter().position(|p| p == name);
                    match pos {
                        Some(pos) => {
                            present.remove(pos);
                        }
                        None if !opaque => {
                            return Err(invalid(format!(
                                "step {idx}: field '{name}' was already removed"
                            )));
                        }
                        None => {}
                    }
                    assigned.remove(name);
                }
            }
            TransformOp::Rename { from: old, to: new } => {
                if !from.has_field(old) {
                    return Err(invalid(format!("step {idx}: rename of unknown field '{old}'")));
                }
                if !to.has_field(new) {
                    return Err(invalid(format!(
                        "step {idx}: rename target '{new}' is not a field of {}",
                        to.type_key()
                    )));
                }
                if !opaque && present.iter().any(|p| p == new) {
                    return Err(invalid(format!(
                        "step {idx}: rename target '{new}' is already populated"
                    )));
                }
                match present.iter().position(|p| p == old) {
                    Some(pos) => present[pos] = new.clone(),
                    None if !opaque => {
                        return Err(invalid(format!(
                            "step {idx}: field '{old}' was already removed"
                        )));
                    }
                    None => present.push(new.clone()),
                }
                assigned.insert(new.clone());
            }
            TransformOp::SetDefault { field, value } => {
                let Some(spec) = to.field(field) else {
                    return Err(invalid(format!(
                        "step {idx}: default for '{field}' which is not a field of {}",
                        to.type_key()
                    )));
                };
                if assigned.contains(field) {
                    return Err(invalid(format!(
                        "step {idx}: '{field}' is already populated by an earlier step"
                    )));
                }
                if !spec.kind.matches(value) {
                    return Err(invalid(format!(
                        "step {idx}: default for '{field}' is not a {}",
                        spec.kind
                    )));
                }
                if !present.iter().any(|p| p == field) {
                    present.push(field.clone());
                }
                assigned.insert(field.clone());
            }
            TransformOp::Custom(_) => opaque = true,
        }
    }

    if !opaque {
        let produced: HashSet<&str> = present.iter().map(String::as_str).collect();
        if let Some(extra) = present.iter().find(|p| !to.has_field(p)) {
            return Err(invalid(format!(
                "field '{extra}' is neither dropped nor declared in {}",
                to.type_key()
            )));
        }
        if let Some(missing) = to
            .fields()
            .iter()
            .find(|f| !produced.contains(f.name.as_str()) && !f.kind.is_optional())
        {
            return Err(invalid(format!(
                "field '{}' of {} is never populated",
                missing.name,
                to.type_key()
            )));
        }
    }

    Ok(Transform { from, to, ops })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::object::Uid;
    use crate::value::FieldKind;
    use serde_json::json;

    fn schema(version: u32, fields: &[(&str, FieldKind)]) -> Arc<ObjectSchema> {
        let mut b = ObjectSchema::builder("Dataset", version);
        for (name, kind) in fields {
            b = b.field(*name, kind.clone());
        }
        Arc::new(b.build().unwrap())
    }

    fn v1() -> Arc<ObjectSchema> {
        schema(1, &[("name", FieldKind::String), ("url", FieldKind::String)])
    }

    fn v2() -> Arc<ObjectSchema> {
        schema(2, &[("name", FieldKind::String), ("link", FieldKind::String), ("owner", FieldKind::String)])
    }

    fn instance() -> VersionedObject {
        VersionedObject::new(
            &TypeKey::new("Dataset", 1),
            Uid::new(),
            Fields::new().with("name", "x").with("url", "http://a"),
        )
    }

    #[test]
    fn test_rename_and_default() {
        let t = build_transform(
            v1(),
            v2(),
            vec![TransformOp::rename("url", "link"), TransformOp::set_default("owner", "unknown")],
        )
        .unwrap();

        let src = instance();
        let out = t.apply(&src, None).unwrap();
        assert_eq!(out.version, 2);
        assert_eq!(out.id, src.id);
        assert_eq!(out.fields.names().collect::<Vec<_>>(), vec!["name", "link", "owner"]);
        assert_eq!(out.get("link"), Some(&json!("http://a")));
        assert_eq!(out.get("owner"), Some(&json!("unknown")));
    }

    #[test]
    fn test_apply_is_deterministic() {
        let t = build_transform(
            v1(),
            v2(),
            vec![TransformOp::rename("url", "link"), TransformOp::set_default("owner", "unknown")],
        )
        .unwrap();
        let src = instance();
        assert_eq!(t.apply(&src, None).unwrap(), t.apply(&src, None).unwrap());
    }

    #[test]
    fn test_drop_unknown_field_fails_at_build() {
        let err = build_transform(v1(), v2(), vec![TransformOp::drop(["nope"])]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidMigrationSpec);
    }

    #[test]
    fn test_default_for_unknown_target_field_fails() {
        let err = build_transform(v1(), v2(), vec![TransformOp::set_default("color", "red")])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidMigrationSpec);
    }

    #[test]
    fn test_double_assignment_fails() {
        let err = build_transform(
            v1(),
            v2(),
            vec![
                TransformOp::rename("url", "link"),
                TransformOp::set_default("link", "x"),
                TransformOp::set_default("owner", "unknown"),
            ],
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidMigrationSpec);
        assert!(err.message().contains("already populated"));
    }

    #[test]
    fn test_default_kind_checked() {
        let err = build_transform(
            v1(),
            v2(),
            vec![TransformOp::rename("url", "link"), TransformOp::set_default("owner", 5)],
        )
        .unwrap_err();
        assert!(err.message().contains("is not a string"));
    }

    #[test]
    fn test_incomplete_migration_fails() {
        let err = build_transform(v1(), v2(), vec![TransformOp::rename("url", "link")]).unwrap_err();
        assert!(err.message().contains("never populated"));

        let err = build_transform(v1(), v2(), vec![TransformOp::set_default("owner", "o")])
            .unwrap_err();
        assert!(err.message().contains("neither dropped"));
    }

    #[test]
    fn test_cross_type_rejected() {
        let other = Arc::new(ObjectSchema::builder("Endpoint", 2).build().unwrap());
        let err = build_transform(v1(), other, vec![]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CrossTypeMigration);
    }

    #[test]
    fn test_custom_defers_shape_check_to_execution() {
        let t = build_transform(
            v1(),
            v2(),
            vec![TransformOp::custom(|fields, ctx| {
                let owner = ctx
                    .and_then(|c| c.credentials)
                    .map_or_else(|| "unknown".to_string(), |k| k.fingerprint());
                let url = fields.remove("url").unwrap_or(Value::Null);
                fields.insert("link", url);
                fields.insert("owner", owner);
                Ok(())
            })],
        )
        .unwrap();

        let key = VerifyKey::derive("alice");
        let ctx = MigrationContext::new(Some(key));
        let out = t.apply(&instance(), Some(&ctx)).unwrap();
        assert_eq!(out.get("owner"), Some(&json!(key.fingerprint())));

        let broken = build_transform(v1(), v2(), vec![TransformOp::custom(|_, _| Ok(()))]).unwrap();
        let err = broken.apply(&instance(), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_apply_rejects_wrong_source_version() {
        let t = build_transform(
            v1(),
            v2(),
            vec![TransformOp::rename("url", "link"), TransformOp::set_default("owner", "o")],
        )
        .unwrap();
        let mut obj = instance();
        obj.version = 2;
        assert_eq!(t.apply(&obj, None).unwrap_err().kind(), ErrorKind::TypeMismatch);
    }
}
