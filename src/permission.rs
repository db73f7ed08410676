//! Access policy seam.
//!
//! The store never decides authorization itself. Every operation asks the
//! configured [`PermissionPolicy`] whether the caller's key may perform an
//! [`Action`] on a partition before any data is touched.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::credentials::VerifyKey;

/// Capability requested by a store operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// `get_by_uid`, `query_one`, `get_all`.
    Read,
    /// `set`, `update`, `delete_by_uid`, `replace`, `migrate_record`.
    Write,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// Pluggable authorization decision.
pub trait PermissionPolicy: Send + Sync {
    /// Returns true if `credentials` may perform `action` on `partition`.
    fn has_permission(&self, credentials: &VerifyKey, action: Action, partition: &str) -> bool;
}

/// Grants everything. For embedded single-tenant use and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PermissionPolicy for AllowAll {
    fn has_permission(&self, _credentials: &VerifyKey, _action: Action, _partition: &str) -> bool {
        true
    }
}

const ANY_PARTITION: &str = "*";

/// Root key plus explicit per-key grants.
///
/// The root key may do anything. Other keys need a grant for the partition
/// (or for every partition); a `Write` grant implies `Read`.
///
/// ```
/// use stashdb::{Action, KeyGrantPolicy, PermissionPolicy, VerifyKey};
///
/// let root = VerifyKey::derive("root");
/// let guest = VerifyKey::derive("guest");
/// let policy = KeyGrantPolicy::new(root).grant(guest, "Dataset", Action::Read);
///
/// assert!(policy.has_permission(&guest, Action::Read, "Dataset"));
/// assert!(!policy.has_permission(&guest, Action::Write, "Dataset"));
/// assert!(policy.has_permission(&root, Action::Write, "Dataset"));
/// ```
#[derive(Debug, Clone)]
pub struct KeyGrantPolicy {
    root: VerifyKey,
    grants: HashMap<VerifyKey, HashMap<String, HashSet<Action>>>,
}

impl KeyGrantPolicy {
    /// Policy where `root` may do anything and nobody else may do anything yet.
    #[must_use]
    pub fn new(root: VerifyKey) -> Self {
        Self {
            root,
            grants: HashMap::new(),
        }
    }

    /// Grants `action` on one partition.
    #[must_use]
    pub fn grant(mut self, key: VerifyKey, partition: impl Into<String>, action: Action) -> Self {
        self.grants
            .entry(key)
            .or_default()
            .entry(partition.into())
            .or_default()
            .insert(action);
        self
    }

    /// Grants `action` on every partition.
    #[must_use]
    pub fn grant_all(self, key: VerifyKey, action: Action) -> Self {
        self.grant(key, ANY_PARTITION, action)
    }

    /// The root key.
    #[must_use]
    pub const fn root(&self) -> &VerifyKey {
        &self.root
    }

    fn allows(actions: Option<&HashSet<Action>>, action: Action) -> bool {
        actions.is_some_and(|set| {
            set.contains(&action) || (action == Action::Read && set.contains(&Action::Write))
        })
    }
}

impl PermissionPolicy for KeyGrantPolicy {
    fn has_permission(&self, credentials: &VerifyKey, action: Action, partition: &str) -> bool {
        if *credentials == self.root {
            return true;
        }
        let Some(by_partition) = self.grants.get(credentials) else {
            return false;
        };
        Self::allows(by_partition.get(partition), action)
            || Self::allows(by_partition.get(ANY_PARTITION), action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_all() {
        let key = VerifyKey::derive("anyone");
        assert!(AllowAll.has_permission(&key, Action::Write, "X"));
    }

    #[test]
    fn test_unknown_key_denied() {
        let policy = KeyGrantPolicy::new(VerifyKey::derive("root"));
        let stranger = VerifyKey::derive("stranger");
        assert!(!policy.has_permission(&stranger, Action::Read, "Dataset"));
    }

    #[test]
    fn test_write_implies_read() {
        let writer = VerifyKey::derive("writer");
        let policy = KeyGrantPolicy::new(VerifyKey::derive("root")).grant(writer, "Dataset", Action::Write);
        assert!(policy.has_permission(&writer, Action::Read, "Dataset"));
        assert!(policy.has_permission(&writer, Action::Write, "Dataset"));
        assert!(!policy.has_permission(&writer, Action::Read, "Endpoint"));
    }

    #[test]
    fn test_wildcard_grant() {
        let reader = VerifyKey::derive("reader");
        let policy = KeyGrantPolicy::new(VerifyKey::derive("root")).grant_all(reader, Action::Read);
        assert!(policy.has_permission(&reader, Action::Read, "Anything"));
        assert!(!policy.has_permission(&reader, Action::Write, "Anything"));
    }
}
