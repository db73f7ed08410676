//! Caller identity.
//!
//! A [`VerifyKey`] is the public half of a caller's signing key. The store
//! treats it as an opaque capability token and hands it to the configured
//! [`crate::PermissionPolicy`]; it is never written into business fields.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{StoreError, StoreResult};

/// 32-byte public verification key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VerifyKey([u8; 32]);

impl VerifyKey {
    /// Length of the raw key in bytes.
    pub const LEN: usize = 32;

    /// Wraps raw public-key bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parses the lowercase hex form produced by `Display`.
    pub fn from_hex(s: &str) -> StoreResult<Self> {
        let raw = hex::decode(s.trim())
            .map_err(|e| StoreError::type_mismatch(format!("invalid verify key hex: {e}")))?;
        let bytes: [u8; 32] = raw.try_into().map_err(|raw: Vec<u8>| {
            StoreError::type_mismatch(format!(
                "verify key must be {} bytes, got {}",
                Self::LEN,
                raw.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Deterministic key derived from a seed string. Intended for tests and
    /// fixtures, not for real identities.
    #[must_use]
    pub fn derive(seed: &str) -> Self {
        Self(*blake3::hash(seed.as_bytes()).as_bytes())
    }

    /// Raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Short stable identifier recorded in record metadata.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        hex::encode(&blake3::hash(&self.0).as_bytes()[..8])
    }
}

impl fmt::Display for VerifyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for VerifyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VerifyKey({})", self.fingerprint())
    }
}

impl Serialize for VerifyKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for VerifyKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
