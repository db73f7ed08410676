//! Error types for StashDB.
//!
//! Every failure that crosses the store boundary is a [`StoreError`] carrying a
//! machine-checkable [`ErrorKind`] and a human-readable message. Callers branch
//! on the kind; the message is for logs and operators.

use std::fmt;

use thiserror::Error;

/// Closed enumeration of failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The credential failed the partition's policy check.
    PermissionDenied,
    /// No record matched the id or query.
    NotFound,
    /// A unique index already owns the value.
    DuplicateKey,
    /// The payload does not match the expected object type or schema.
    TypeMismatch,
    /// The canonical name or version was never registered.
    UnknownVersion,
    /// No transform is registered for the requested version pair.
    NoMigrationPath,
    /// A migration was requested between two different canonical names.
    CrossTypeMigration,
    /// A migration declaration is malformed.
    InvalidMigrationSpec,
    /// `query_one` matched more than one record.
    AmbiguousResult,
    /// Storage medium failure (I/O, lock, corrupted journal).
    Storage,
    /// The serializer collaborator failed.
    Serialization,
    /// Configuration or partition settings are invalid.
    InvalidConfig,
}

impl ErrorKind {
    /// Stable snake_case name, used in log fields and events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission_denied",
            Self::NotFound => "not_found",
            Self::DuplicateKey => "duplicate_key",
            Self::TypeMismatch => "type_mismatch",
            Self::UnknownVersion => "unknown_version",
            Self::NoMigrationPath => "no_migration_path",
            Self::CrossTypeMigration => "cross_type_migration",
            Self::InvalidMigrationSpec => "invalid_migration_spec",
            Self::AmbiguousResult => "ambiguous_result",
            Self::Storage => "storage",
            Self::Serialization => "serialization",
            Self::InvalidConfig => "invalid_config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by every fallible StashDB operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct StoreError {
    kind: ErrorKind,
    message: String,
}

impl StoreError {
    /// Creates an error of the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The machine-checkable kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Credentials lack the needed capability.
    #[must_use]
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, message)
    }

    /// No record or partition under the given name.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// A unique id or index value is already taken.
    #[must_use]
    pub fn duplicate_key(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DuplicateKey, message)
    }

    /// Payload does not match the expected type or schema.
    #[must_use]
    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeMismatch, message)
    }

    /// Version not registered for its canonical name.
    #[must_use]
    pub fn unknown_version(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownVersion, message)
    }

    /// No transform declared for a version pair.
    #[must_use]
    pub fn no_migration_path(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoMigrationPath, message)
    }

    /// Migration between two canonical names.
    #[must_use]
    pub fn cross_type_migration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CrossTypeMigration, message)
    }

    /// Rejected version or transform declaration.
    #[must_use]
    pub fn invalid_migration_spec(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidMigrationSpec, message)
    }

    /// `query_one` matched several records.
    #[must_use]
    pub fn ambiguous_result(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AmbiguousResult, message)
    }

    /// I/O, lock or journal corruption failure.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, message)
    }

    /// Serializer collaborator failure.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    /// Bad configuration or partition settings.
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidConfig, message)
    }

    /// Returns true if the caller can reasonably act on this error
    /// (insert-if-absent, update-instead-of-insert, tighten the query).
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::NotFound | ErrorKind::DuplicateKey | ErrorKind::AmbiguousResult
        )
    }

    /// Returns true if this error came from the migration registry.
    #[must_use]
    pub const fn is_migration(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::UnknownVersion
                | ErrorKind::NoMigrationPath
                | ErrorKind::CrossTypeMigration
                | ErrorKind::InvalidMigrationSpec
        )
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::storage(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

/// Result type alias for StashDB operations.
pub type StoreResult<T> = Result<T, StoreError>;

pub(crate) fn lock_err(context: &'static str) -> StoreError {
    StoreError::storage(format!("poisoned lock: {context}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_kind_and_message() {
        let err = StoreError::duplicate_key("name=alpha");
        let msg = err.to_string();
        assert!(msg.contains("duplicate_key"));
        assert!(msg.contains("name=alpha"));
    }

    #[test]
    fn test_kind_is_preserved() {
        let err = StoreError::no_migration_path("Dataset 1x3");
        assert_eq!(err.kind(), ErrorKind::NoMigrationPath);
        assert_eq!(err.message(), "Dataset 1x3");
    }

    #[test]
    fn test_recoverable_kinds() {
        assert!(StoreError::not_found("x").is_recoverable());
        assert!(StoreError::duplicate_key("x").is_recoverable());
        assert!(StoreError::ambiguous_result("x").is_recoverable());
        assert!(!StoreError::permission_denied("x").is_recoverable());
        assert!(!StoreError::type_mismatch("x").is_recoverable());
    }

    #[test]
    fn test_migration_kinds() {
        assert!(StoreError::unknown_version("x").is_migration());
        assert!(StoreError::cross_type_migration("x").is_migration());
        assert!(!StoreError::storage("x").is_migration());
    }

    #[test]
    fn test_io_error_maps_to_storage() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err: StoreError = io.into();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(err.message().contains("disk gone"));
    }
}
