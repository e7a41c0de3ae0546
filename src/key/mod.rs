//! Cache key material: canonical serialization and fingerprints.
//!
//! - [`canonical`]: order-independent, cycle-safe serialization of
//!   [`KeyValue`] trees.
//! - [`fingerprint`]: SHA-256 digests over canonical bytes, and the
//!   per-user [`CacheKey`] built from them.

pub mod canonical;
pub mod fingerprint;

pub use canonical::{CIRCULAR_MARKER, KeyValue, SharedNode, canonicalize};
pub use fingerprint::{
    CacheKey, FINGERPRINT_LEN, Fingerprint, fingerprint, fingerprint_serialize, user_fingerprint,
};
