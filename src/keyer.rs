//! Translate a hierarchical key into a chain of row lookups, rooted at a
//! cache instance's pinned environment row, filling in missing inner rows
//! on the insertion path.
//!
//! Composing each level as `(Partial(parent_row_id), subkey)` makes
//! inner-level deduplication automatic: two chains sharing a prefix share
//! the same inner rows, and since `row_id` is stable, chains are stable
//! across processes once the environment row is pinned.

use crate::canon::{canon_bytes, hash64, CanonValue, Canonicalize};
use crate::error::BackendError;
use crate::store::{Store, StoredValue};

/// An opaque chaining token wrapping a backing-store `row_id`. Its
/// canonical form (`CanonValue::Partial`) is a distinct enum variant from
/// any user-supplied integer, so chaining can never collide with a
/// legitimate key value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partial(pub i64);

impl Canonicalize for Partial {
    fn to_canon(&self) -> CanonValue {
        CanonValue::Partial(self.0)
    }
}

fn composite(parent: Partial, subkey: &CanonValue) -> CanonValue {
    CanonValue::Seq(vec![parent.to_canon(), subkey.clone()])
}

/// Result of walking a hierarchical key chain as far as it currently
/// exists.
pub enum Traversal {
    /// The full chain resolved; `row_id`/`value` belong to the leaf.
    Hit { row_id: i64, value: StoredValue },
    /// Resolution stopped at `depth` (0-indexed into the subkey slice);
    /// `parent` is the last successfully resolved prefix token, which a
    /// fill pass can continue from.
    Miss { depth: usize, parent: Partial },
}

/// Walk `subkeys` from `env_row_id`, stopping at the first row that does
/// not exist.
pub fn traverse(
    store: &Store,
    env_row_id: i64,
    subkeys: &[CanonValue],
) -> Result<Traversal, BackendError> {
    assert!(!subkeys.is_empty(), "hierarchical key must be non-empty");

    let mut parent = Partial(env_row_id);
    for (depth, subkey) in subkeys[..subkeys.len() - 1].iter().enumerate() {
        let bytes = canon_bytes(&composite(parent, subkey));
        let h = hash64(&bytes);
        match store.get_row_id(h, &bytes)? {
            Some(row_id) => parent = Partial(row_id),
            None => return Ok(Traversal::Miss { depth, parent }),
        }
    }

    let leaf_depth = subkeys.len() - 1;
    let bytes = canon_bytes(&composite(parent, &subkeys[leaf_depth]));
    let h = hash64(&bytes);
    match store.get_value(h, &bytes)? {
        Some((row_id, value)) => Ok(Traversal::Hit { row_id, value }),
        None => Ok(Traversal::Miss { depth: leaf_depth, parent }),
    }
}

/// Continue a chain from a recorded miss: insert `Placeholder` rows for any
/// missing inner levels, then insert (or, if a racing writer already filled
/// it, reuse) a `Deferred` leaf stamped `now`. Returns the leaf's `row_id`.
///
/// Each insertion goes through [`Store::insert_or_replace`], which is
/// idempotent on an existing exact `(hash, key)` match — so if another
/// process filled part of this chain between our read probe and acquiring
/// `L_file`, we simply reuse what they wrote rather than duplicating rows.
pub fn fill(
    store: &Store,
    subkeys: &[CanonValue],
    mut parent: Partial,
    from_depth: usize,
    now: u64,
) -> Result<i64, BackendError> {
    let leaf_depth = subkeys.len() - 1;

    for depth in from_depth..leaf_depth {
        let bytes = canon_bytes(&composite(parent, &subkeys[depth]));
        let h = hash64(&bytes);
        let row_id = store.insert_or_replace(h, &bytes, StoredValue::Placeholder)?;
        parent = Partial(row_id);
    }

    let bytes = canon_bytes(&composite(parent, &subkeys[leaf_depth]));
    let h = hash64(&bytes);
    store.insert_or_replace(h, &bytes, StoredValue::Deferred { timestamp: now })
}

/// Overwrite the leaf at `subkeys` (rooted at `env_row_id`) with its
/// materialized payload. The leaf's row must already exist (as a
/// `Deferred` claim); `insert_or_replace` preserves its `row_id`.
pub fn materialize(
    store: &Store,
    env_row_id: i64,
    subkeys: &[CanonValue],
    payload: Vec<u8>,
) -> Result<i64, BackendError> {
    let mut parent = Partial(env_row_id);
    for subkey in &subkeys[..subkeys.len() - 1] {
        let bytes = canon_bytes(&composite(parent, subkey));
        let h = hash64(&bytes);
        let row_id = store
            .get_row_id(h, &bytes)?
            .expect("inner row must exist before materializing its leaf");
        parent = Partial(row_id);
    }
    let bytes = canon_bytes(&composite(parent, subkeys.last().unwrap()));
    let h = hash64(&bytes);
    store.insert_or_replace(h, &bytes, StoredValue::Materialized { payload })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("db.sqlite")).unwrap();
        (dir, store)
    }

    fn subkeys(values: &[&str]) -> Vec<CanonValue> {
        values.iter().map(|v| v.to_canon()).collect()
    }

    #[test]
    fn scenario_argument_ordering_distinguishes_keys() {
        let (_dir, store) = temp_store();
        let env_row = store
            .insert_or_replace(1, &canon_bytes(&"env"), StoredValue::Placeholder)
            .unwrap();

        let ab = subkeys(&["a", "b"]);
        let ba = subkeys(&["b", "a"]);

        let miss_ab = match traverse(&store, env_row, &ab).unwrap() {
            Traversal::Miss { depth, parent } => (depth, parent),
            Traversal::Hit { .. } => panic!("expected miss"),
        };
        fill(&store, &ab, miss_ab.1, miss_ab.0, 1_000).unwrap();
        materialize(&store, env_row, &ab, b"first".to_vec()).unwrap();

        let miss_ba = match traverse(&store, env_row, &ba).unwrap() {
            Traversal::Miss { depth, parent } => (depth, parent),
            Traversal::Hit { .. } => panic!("expected miss"),
        };
        fill(&store, &ba, miss_ba.1, miss_ba.0, 1_000).unwrap();
        materialize(&store, env_row, &ba, b"second".to_vec()).unwrap();

        match traverse(&store, env_row, &ab).unwrap() {
            Traversal::Hit { value, .. } => {
                assert_eq!(value, StoredValue::Materialized { payload: b"first".to_vec() })
            }
            Traversal::Miss { .. } => panic!("expected hit"),
        }
        match traverse(&store, env_row, &ba).unwrap() {
            Traversal::Hit { value, .. } => {
                assert_eq!(value, StoredValue::Materialized { payload: b"second".to_vec() })
            }
            Traversal::Miss { .. } => panic!("expected hit"),
        }
    }

    #[test]
    fn shared_prefix_dedupes_inner_rows() {
        let (_dir, store) = temp_store();
        let env_row = store
            .insert_or_replace(1, &canon_bytes(&"env"), StoredValue::Placeholder)
            .unwrap();

        let k1 = subkeys(&["shared", "one"]);
        let k2 = subkeys(&["shared", "two"]);

        let m1 = match traverse(&store, env_row, &k1).unwrap() {
            Traversal::Miss { depth, parent } => (depth, parent),
            _ => panic!(),
        };
        let leaf1 = fill(&store, &k1, m1.1, m1.0, 1).unwrap();

        let m2 = match traverse(&store, env_row, &k2).unwrap() {
            Traversal::Miss { depth, parent } => (depth, parent),
            _ => panic!(),
        };
        // Both chains should have resolved the same inner "shared" row
        // before failing at the leaf, i.e. the second traversal's miss
        // depth is the leaf depth (1), not the inner depth (0).
        assert_eq!(m2.0, 1);
        let leaf2 = fill(&store, &k2, m2.1, m2.0, 1).unwrap();
        assert_ne!(leaf1, leaf2);
    }
}
