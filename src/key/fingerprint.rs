//! SHA-256 fingerprints over canonical key material.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use super::canonical::{KeyValue, canonicalize};
use crate::{Result, VellumError};

/// Length of a fingerprint in bytes.
pub const FINGERPRINT_LEN: usize = 32;

/// Number of hex characters used by [`Fingerprint::short()`].
const SHORT_HEX_LEN: usize = 12;

/// Fixed-length digest of a canonicalized value.
///
/// Serializes as a lowercase hex string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    /// Digest an already-canonical byte sequence.
    pub fn digest(canonical: &[u8]) -> Self {
        Self(Sha256::digest(canonical).into())
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Leading hex characters, for logs.
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(SHORT_HEX_LEN);
        hex
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

impl FromStr for Fingerprint {
    type Err = VellumError;

    fn from_str(s: &str) -> Result<Self> {
        let mut bytes = [0u8; FINGERPRINT_LEN];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| VellumError::InvalidInput(format!("invalid fingerprint {s:?}: {e}")))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Fingerprint a structured value.
///
/// Semantically equal values (same fields in any order, absent fields
/// ignored) always produce the same fingerprint.
pub fn fingerprint(value: &KeyValue) -> Fingerprint {
    Fingerprint::digest(&canonicalize(value))
}

/// Fingerprint any serde-serializable value.
///
/// Errors only if the value has no JSON representation.
pub fn fingerprint_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Fingerprint> {
    Ok(fingerprint(&KeyValue::from_serialize(value)?))
}

/// Composite cache key: who is asking, and what they asked for.
///
/// Both halves feed the final fingerprint, so identical payloads from two
/// users never share an entry and two payloads from one user never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    user: Fingerprint,
    payload: Fingerprint,
}

impl CacheKey {
    /// Build a key from a raw user id and the normalized request payload.
    pub fn new(user_id: &str, payload: &KeyValue) -> Self {
        Self {
            user: user_fingerprint(user_id),
            payload: fingerprint(payload),
        }
    }

    pub fn from_parts(user: Fingerprint, payload: Fingerprint) -> Self {
        Self { user, payload }
    }

    pub fn user(&self) -> Fingerprint {
        self.user
    }

    pub fn payload(&self) -> Fingerprint {
        self.payload
    }

    /// The lookup fingerprint for this key.
    pub fn fingerprint(&self) -> Fingerprint {
        fingerprint(&KeyValue::array([self.user.to_hex(), self.payload.to_hex()]))
    }
}

/// Fingerprint of a user id, domain-separated from payload fingerprints.
pub fn user_fingerprint(user_id: &str) -> Fingerprint {
    fingerprint(&KeyValue::object([("user", user_id)]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        let v = KeyValue::object([("jobTitle", "Engineer")]);
        assert_eq!(fingerprint(&v), fingerprint(&v.clone()));
    }

    #[test]
    fn hex_round_trip() {
        let fp = fingerprint(&"hello".into());
        let parsed: Fingerprint = fp.to_hex().parse().unwrap();
        assert_eq!(parsed, fp);
        assert_eq!(fp.to_hex().len(), FINGERPRINT_LEN * 2);
    }

    #[test]
    fn invalid_hex_rejected() {
        assert!("not-hex".parse::<Fingerprint>().is_err());
        assert!("abcd".parse::<Fingerprint>().is_err());
    }

    #[test]
    fn short_is_prefix() {
        let fp = fingerprint(&"hello".into());
        assert_eq!(fp.short().len(), SHORT_HEX_LEN);
        assert!(fp.to_hex().starts_with(&fp.short()));
    }

    #[test]
    fn serializes_as_hex_string() {
        let fp = fingerprint(&"hello".into());
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, format!("\"{}\"", fp.to_hex()));
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fp);
    }

    #[test]
    fn user_fingerprint_differs_from_plain_string() {
        assert_ne!(user_fingerprint("u1"), fingerprint(&"u1".into()));
    }

    #[test]
    fn cache_key_separates_users() {
        let payload = KeyValue::object([("jobTitle", "Engineer")]);
        let a = CacheKey::new("u1", &payload);
        let b = CacheKey::new("u2", &payload);
        assert_eq!(a.payload(), b.payload());
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn cache_key_separates_payloads() {
        let a = CacheKey::new("u1", &KeyValue::object([("jobTitle", "Engineer")]));
        let b = CacheKey::new("u1", &KeyValue::object([("jobTitle", "Designer")]));
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
