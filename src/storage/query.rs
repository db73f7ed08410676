//! Equality queries over partition fields.

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::object::{VersionedObject, ID_FIELD};
use crate::value::{json_type_name, FieldKind, Value};

/// A named, typed field of a partition that lookups are built from.
///
/// ```
/// use stashdb::{FieldKind, PartitionKey};
///
/// let by_name = PartitionKey::new("name", FieldKind::String);
/// let qk = by_name.with_obj("mnist").unwrap();
/// assert_eq!(qk.field, "name");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionKey {
    key: String,
    kind: FieldKind,
}

impl PartitionKey {
    /// Lookup helper for `key` holding values of `kind`.
    #[must_use]
    pub fn new(key: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            key: key.into(),
            kind,
        }
    }

    /// The identity key.
    #[must_use]
    pub fn uid() -> Self {
        Self::new(ID_FIELD, FieldKind::Uid)
    }

    /// Field this helper queries.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Binds a value, checking it against the key's kind.
    pub fn with_obj(&self, value: impl Into<Value>) -> StoreResult<QueryKey> {
        let value = value.into();
        if !self.kind.matches(&value) {
            return Err(StoreError::type_mismatch(format!(
                "query key '{}' expects {}, got {}",
                self.key,
                self.kind,
                json_type_name(&value)
            )));
        }
        Ok(QueryKey {
            field: self.key.clone(),
            value,
        })
    }
}

/// One `field == value` condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryKey {
    /// Field name (`id` addresses the record identity).
    pub field: String,
    /// Value to match.
    pub value: Value,
}

impl QueryKey {
    /// Equality on `field`.
    #[must_use]
    pub fn new(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Returns true if `obj` satisfies this condition.
    #[must_use]
    pub fn matches(&self, obj: &VersionedObject) -> bool {
        obj.lookup(&self.field).as_ref() == Some(&self.value)
    }
}

/// Conjunction of equality conditions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryKeys(Vec<QueryKey>);

impl QueryKeys {
    /// Lookup helper for `key` holding values of `kind`.
    #[must_use]
    pub fn new(keys: Vec<QueryKey>) -> Self {
        Self(keys)
    }

    /// Single-condition query.
    #[must_use]
    pub fn one(key: QueryKey) -> Self {
        Self(vec![key])
    }

    /// Builder-style condition.
    #[must_use]
    pub fn and(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.push(QueryKey::new(field, value));
        self
    }

    /// Field this helper queries.
    #[must_use]
    pub fn keys(&self) -> &[QueryKey] {
        &self.0
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if `obj` satisfies every condition.
    #[must_use]
    pub fn matches(&self, obj: &VersionedObject) -> bool {
        self.0.iter().all(|k| k.matches(obj))
    }
}

impl From<QueryKey> for QueryKeys {
    fn from(key: QueryKey) -> Self {
        Self::one(key)
    }
}
