//! Deterministic serialization ("canonicalization") of arbitrary key values.
//!
//! The core guarantee: for any two semantically equal keys `a == b`,
//! `canon_bytes(a) == canon_bytes(b)` byte for byte, across processes
//! sharing the same build. This does not require the mapping to be
//! invertible, cycle-safe, or to preserve reference identity — see
//! `Canonicalize`'s contract below.
//!
//! Rust has no runtime reflection to enumerate a struct's fields, so
//! user-defined record types must opt in by implementing [`Canonicalize`]
//! themselves (directly, or via the [`crate::canonicalize_record`] macro for
//! plain field-list structs).

mod impls;
mod macros;

pub use impls::{NumericBuffer, OperationFingerprint, RawBytes};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A deterministic byte representation of a key, produced by
/// [`canon_bytes`]. Two `CBytes` are equal if and only if their producing
/// values were semantically equal under the domain's equivalences (mapping
/// order, set order, and sequence order as described by [`CanonValue`]).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CBytes(pub Vec<u8>);

impl CBytes {
    /// Borrow the underlying bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Consume and return the underlying bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }
}

/// The normalized tree a value reduces to before final encoding. Construct
/// one via [`Canonicalize::to_canon`]; do not hand-roll one outside of a
/// `Canonicalize` impl unless you are building a chaining key (see
/// [`crate::keyer`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CanonValue {
    /// Absence of a value.
    Null,
    /// A boolean scalar.
    Bool(bool),
    /// A signed integer scalar, widened to `i128` so all Rust integer
    /// widths share one canonical representation.
    Int(i128),
    /// An unsigned integer scalar, widened to `u128`.
    UInt(u128),
    /// A floating point scalar, stored as its IEEE-754 bit pattern so the
    /// encoding is deterministic. All NaN payloads collapse to a single
    /// canonical NaN bit pattern.
    Float(u64),
    /// A raw byte string (distinct from an ordered sequence of integers —
    /// see [`crate::RawBytes`]).
    Bytes(Vec<u8>),
    /// A text string.
    Text(String),
    /// An ordered sequence (tuple, list). Sequence order is significant:
    /// two sequences with the same elements in different orders canonicalize
    /// differently.
    Seq(Vec<CanonValue>),
    /// A set or multiset with no relevant order. Contents are sorted by
    /// their own canonical bytes before encoding, so shuffled sets
    /// canonicalize identically.
    Set(Vec<CanonValue>),
    /// A mapping. Entries are sorted by the canonical bytes of their key
    /// before encoding, so permuted-key mappings canonicalize identically.
    Map(Vec<(CanonValue, CanonValue)>),
    /// A user-defined record: its data members as a mapping (sorted the
    /// same way `Map` is), tagged with a type identity so that two
    /// different record types with coincidentally identical fields do not
    /// collide.
    Record {
        /// Type identity tag (by convention, the type's name/path).
        type_tag: String,
        /// Field name/value pairs.
        fields: Vec<(CanonValue, CanonValue)>,
    },
    /// A fingerprint of a function or method: its qualified name plus a
    /// digest of its source text. Not required to be invertible.
    Function {
        /// Fully-qualified name of the function/method.
        qualified_name: String,
        /// SHA-256 digest of the function's source text or bytecode.
        source_digest: Vec<u8>,
    },
    /// A multi-dimensional numeric buffer: shape, element type, strides,
    /// and the raw bytes of its storage. Strides are included so a view
    /// and its owner, or two views with different windows over shared
    /// storage, canonicalize distinctly rather than aliasing together.
    Buffer {
        /// Extent along each dimension.
        shape: Vec<u64>,
        /// Element type tag (e.g. `"f64"`, `"i32"`).
        dtype: String,
        /// Byte stride along each dimension.
        strides: Vec<i64>,
        /// Raw bytes of the buffer's storage window.
        bytes: Vec<u8>,
    },
    /// An opaque chaining token wrapping a backing-store `row_id`, used by
    /// the hierarchical keyer as a key prefix (see [`crate::keyer::Partial`]).
    /// Tagged as its own variant so it can never collide with a legitimate
    /// user-supplied integer.
    Partial(i64),
}

/// Capability trait for types that can be reduced to a [`CanonValue`].
///
/// Implement this directly for user-defined record types (Rust has no
/// runtime reflection to do it for you), or use
/// [`crate::canonicalize_record`] for simple field-list structs. Cyclic
/// structures are not supported; implementations that would need to
/// traverse a cycle should panic rather than loop.
pub trait Canonicalize {
    /// Reduce `self` to its canonical tree form.
    fn to_canon(&self) -> CanonValue;
}

impl Canonicalize for CanonValue {
    fn to_canon(&self) -> CanonValue {
        self.clone()
    }
}

/// Recursively sort `Set`/`Map`/`Record` contents by the canonical bytes of
/// their sort key, bottom-up, so the final encoding is order-independent
/// exactly where the domain requires it.
fn normalize(value: CanonValue) -> CanonValue {
    match value {
        CanonValue::Seq(items) => CanonValue::Seq(items.into_iter().map(normalize).collect()),
        CanonValue::Set(items) => {
            let mut items: Vec<CanonValue> = items.into_iter().map(normalize).collect();
            items.sort_by(|a, b| encode(a).cmp(&encode(b)));
            CanonValue::Set(items)
        }
        CanonValue::Map(entries) => CanonValue::Map(sort_entries(entries)),
        CanonValue::Record { type_tag, fields } => CanonValue::Record {
            type_tag,
            fields: sort_entries(fields),
        },
        other => other,
    }
}

fn sort_entries(entries: Vec<(CanonValue, CanonValue)>) -> Vec<(CanonValue, CanonValue)> {
    let mut entries: Vec<(CanonValue, CanonValue)> = entries
        .into_iter()
        .map(|(k, v)| (normalize(k), normalize(v)))
        .collect();
    entries.sort_by(|a, b| encode(&a.0).cmp(&encode(&b.0)));
    entries
}

/// Encode an already-normalized `CanonValue` tree deterministically.
/// `bincode`'s fixed, non-self-describing encoding is deterministic for a
/// given input tree, which is exactly what we need once order-independent
/// nodes have been sorted.
fn encode(value: &CanonValue) -> Vec<u8> {
    bincode::serialize(value).expect("CanonValue encoding is infallible")
}

/// Reduce `value` to deterministic canonical bytes.
///
/// For any two inputs that are semantically equal under the equivalences
/// described on [`CanonValue`] (mapping order, set order), this returns
/// identical bytes. For ordered sequences, changing element order changes
/// the output.
pub fn canon_bytes<T: Canonicalize + ?Sized>(value: &T) -> CBytes {
    CBytes(encode(&normalize(value.to_canon())))
}

/// Fold a SHA-256 digest of `bytes` into a nonzero 64-bit lookup hash.
///
/// This is a lookup accelerator only — correctness of the backing store
/// derives from exact `CBytes` comparison, not from this hash being
/// collision-free. The `+ 1` keeps the result nonzero, since `0` is reserved
/// as a sentinel.
pub fn hash64(bytes: &CBytes) -> u64 {
    let digest = Sha256::digest(&bytes.0);
    let lanes: [u64; 4] = [
        u64::from_le_bytes(digest[0..8].try_into().unwrap()),
        u64::from_le_bytes(digest[8..16].try_into().unwrap()),
        u64::from_le_bytes(digest[16..24].try_into().unwrap()),
        u64::from_le_bytes(digest[24..32].try_into().unwrap()),
    ];
    (lanes[0] ^ lanes[1] ^ lanes[2] ^ lanes[3]).wrapping_add(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashMap, HashSet};

    #[test]
    fn mapping_order_independence() {
        let mut a = HashMap::new();
        a.insert("x".to_string(), 1i64);
        a.insert("y".to_string(), 2i64);
        let mut b = BTreeMap::new();
        b.insert("y".to_string(), 2i64);
        b.insert("x".to_string(), 1i64);
        assert_eq!(canon_bytes(&a), canon_bytes(&b));
    }

    #[test]
    fn set_order_independence() {
        let a: HashSet<i64> = [1, 2, 3].into_iter().collect();
        let b: HashSet<i64> = [3, 1, 2].into_iter().collect();
        assert_eq!(canon_bytes(&a), canon_bytes(&b));
    }

    #[test]
    fn sequence_order_sensitivity() {
        let a = vec![1i64, 2, 3];
        let mut b = a.clone();
        b.reverse();
        assert_ne!(canon_bytes(&a), canon_bytes(&b));
    }

    #[test]
    fn determinism() {
        let value = (1i64, "hello".to_string(), vec![true, false]);
        assert_eq!(canon_bytes(&value), canon_bytes(&value));
    }

    #[test]
    fn hash64_is_never_zero() {
        for sample in [b"".as_slice(), b"a", b"the quick brown fox"] {
            let h = hash64(&CBytes(sample.to_vec()));
            assert_ne!(h, 0);
        }
    }

    #[test]
    fn partial_does_not_collide_with_uint() {
        let partial = CanonValue::Partial(7);
        let uint = CanonValue::UInt(7);
        assert_ne!(canon_bytes(&partial), canon_bytes(&uint));
    }

    #[test]
    fn byte_strings_distinct_from_int_sequences() {
        let raw = crate::RawBytes(vec![1, 2, 3]);
        let seq = vec![1i64, 2, 3];
        assert_ne!(canon_bytes(&raw), canon_bytes(&seq));
    }
}
