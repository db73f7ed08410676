//! Field values and field kinds.
//!
//! Field values are plain JSON values. A [`FieldKind`] is the typed descriptor a
//! schema attaches to each field, so payloads can be checked against the
//! declared shape of their version before they reach storage.

use std::fmt;

use serde::{Deserialize, Serialize};
pub use serde_json::Value;
use uuid::Uuid;

/// Declared type of a field.
///
/// # Examples
///
/// ```
/// use stashdb::{FieldKind, Value};
///
/// let kind = FieldKind::Optional(Box::new(FieldKind::String));
/// assert!(kind.matches(&Value::Null));
/// assert!(kind.matches(&Value::from("owner")));
/// assert!(!kind.matches(&Value::from(3)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "of", rename_all = "snake_case")]
pub enum FieldKind {
    /// `true` or `false`.
    Bool,
    /// A number without a fractional part.
    Int,
    /// Any number; integers are accepted.
    Float,
    /// A string.
    String,
    /// A string holding a UUID.
    Uid,
    /// An array whose items all match the inner kind.
    List(Box<FieldKind>),
    /// A JSON object with arbitrary keys.
    Map,
    /// The inner kind, or null.
    Optional(Box<FieldKind>),
    /// Any value, including null.
    Any,
}

impl FieldKind {
    /// Returns true if `value` is an instance of this kind.
    #[must_use]
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::Bool => value.is_boolean(),
            Self::Int => value.is_i64() || value.is_u64(),
            Self::Float => value.is_number(),
            Self::String => value.is_string(),
            Self::Uid => value
                .as_str()
                .is_some_and(|s| Uuid::parse_str(s).is_ok()),
            Self::List(inner) => value
                .as_array()
                .is_some_and(|items| items.iter().all(|v| inner.matches(v))),
            Self::Map => value.is_object(),
            Self::Optional(inner) => value.is_null() || inner.matches(value),
            Self::Any => true,
        }
    }

    /// Returns true if a missing value is acceptable for this kind.
    #[must_use]
    pub const fn is_optional(&self) -> bool {
        matches!(self, Self::Optional(_) | Self::Any)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Int => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::String => write!(f, "string"),
            Self::Uid => write!(f, "uid"),
            Self::List(inner) => write!(f, "list<{inner}>"),
            Self::Map => write!(f, "map"),
            Self::Optional(inner) => write!(f, "optional<{inner}>"),
            Self::Any => write!(f, "any"),
        }
    }
}

/// Returns a short name for the JSON type of `value`, for error messages.
#[must_use]
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

/// Canonical, hashable form of a field value used as an index key.
///
/// Null values produce no key: a record with a null indexed field has no
/// index entry, so unique indexes admit any number of nulls.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexKey(String);

impl IndexKey {
    /// Derives the index key for a value.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        if value.is_null() {
            return None;
        }
        // Scalars render canonically; objects are key-sorted by serde_json's map.
        Some(Self(value.to_string()))
    }

    /// The canonical rendering.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_kinds() {
        assert!(FieldKind::Bool.matches(&json!(true)));
        assert!(FieldKind::Int.matches(&json!(7)));
        assert!(!FieldKind::Int.matches(&json!(7.5)));
        assert!(FieldKind::Float.matches(&json!(7)));
        assert!(FieldKind::Float.matches(&json!(7.5)));
        assert!(FieldKind::String.matches(&json!("x")));
        assert!(!FieldKind::String.matches(&Value::Null));
    }

    #[test]
    fn test_uid_kind_requires_uuid_string() {
        let id = Uuid::new_v4().to_string();
        assert!(FieldKind::Uid.matches(&json!(id)));
        assert!(!FieldKind::Uid.matches(&json!("not-a-uuid")));
    }

    #[test]
    fn test_list_kind_checks_elements() {
        let kind = FieldKind::List(Box::new(FieldKind::String));
        assert!(kind.matches(&json!(["a", "b"])));
        assert!(kind.matches(&json!([])));
        assert!(!kind.matches(&json!(["a", 1])));
    }

    #[test]
    fn test_display_nested() {
        let kind = FieldKind::Optional(Box::new(FieldKind::List(Box::new(FieldKind::Int))));
        assert_eq!(kind.to_string(), "optional<list<int>>");
    }

    #[test]
    fn test_index_key_distinguishes_types() {
        let a = IndexKey::from_value(&json!("1")).unwrap();
        let b = IndexKey::from_value(&json!(1)).unwrap();
        assert_ne!(a, b);
        assert!(IndexKey::from_value(&Value::Null).is_none());
    }

    #[test]
    fn test_index_key_map_is_order_insensitive() {
        let a = IndexKey::from_value(&json!({"a": 1, "b": 2})).unwrap();
        let b = IndexKey::from_value(&json!({"b": 2, "a": 1})).unwrap();
        assert_eq!(a, b);
    }
}
