//! A read-only, pre-built lookup table: `{sha256(canon(key)) -> value}`.
//!
//! Built offline from a full set of `(key, value)` pairs and never written
//! to afterward, so it can drop the exact key bytes the durable
//! [`crate::store::Store`] keeps and rely on the 256-bit hash alone —
//! collisions are checked once, at build time, rather than resolved per
//! lookup.

use crate::canon::{canon_bytes, Canonicalize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// A 256-bit digest of a canonicalized key, used as a [`ReadOnlyShelve`]'s
/// lookup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyDigest([u8; 32]);

fn digest_of<K: Canonicalize>(key: &K) -> KeyDigest {
    let bytes = canon_bytes(key);
    let mut hasher = Sha256::new();
    hasher.update(bytes.as_slice());
    let out = hasher.finalize();
    KeyDigest(out.into())
}

/// Raised when two distinct keys supplied to [`ReadOnlyShelve::build`]
/// digest to the same [`KeyDigest`]. Since exact key bytes are not
/// retained, such a collision cannot be resolved after the fact, so it is
/// fatal at build time rather than silently dropping an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigestCollision;

impl std::fmt::Display for DigestCollision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "two distinct keys collided under sha256(canon(key))")
    }
}

impl std::error::Error for DigestCollision {}

/// A read-only `{sha256(canon(key)) -> value}` table built once from a
/// complete set of entries. Not wired into [`crate::cache::Cache`]; it
/// exists as a separate, simpler collaborator exercising the same
/// canonicalization and hashing machinery from a second call site.
#[derive(Debug, Clone)]
pub struct ReadOnlyShelve<V> {
    entries: HashMap<KeyDigest, V>,
}

impl<V> ReadOnlyShelve<V> {
    /// Build a shelve from a complete iterator of `(key, value)` pairs.
    /// Fails if any two keys collide under `sha256(canon(key))`.
    pub fn build<K, I>(pairs: I) -> Result<Self, DigestCollision>
    where
        K: Canonicalize,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut entries = HashMap::new();
        for (key, value) in pairs {
            let digest = digest_of(&key);
            if entries.insert(digest, value).is_some() {
                return Err(DigestCollision);
            }
        }
        Ok(ReadOnlyShelve { entries })
    }

    /// Look up `query`'s canonical digest directly; no key-equality
    /// resolution is possible since exact key bytes were never retained.
    pub fn get<K: Canonicalize>(&self, query: &K) -> Option<&V> {
        self.entries.get(&digest_of(query))
    }

    /// Number of entries in the shelve.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the shelve holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_then_get_round_trips() {
        let shelve = ReadOnlyShelve::build(vec![("a", 1), ("b", 2), ("c", 3)]).unwrap();
        assert_eq!(shelve.get(&"b"), Some(&2));
        assert_eq!(shelve.get(&"z"), None);
        assert_eq!(shelve.len(), 3);
    }

    #[test]
    fn duplicate_key_is_a_collision() {
        let result = ReadOnlyShelve::build(vec![("a", 1), ("a", 2)]);
        assert_eq!(result.err(), Some(DigestCollision));
    }
}
