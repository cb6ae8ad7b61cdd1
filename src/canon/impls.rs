//! `Canonicalize` implementations for common Rust types.

use super::{CanonValue, Canonicalize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::Hash;

macro_rules! impl_int {
    ($($t:ty),+ $(,)?) => {
        $(
            impl Canonicalize for $t {
                fn to_canon(&self) -> CanonValue {
                    CanonValue::Int(*self as i128)
                }
            }
        )+
    };
}

macro_rules! impl_uint {
    ($($t:ty),+ $(,)?) => {
        $(
            impl Canonicalize for $t {
                fn to_canon(&self) -> CanonValue {
                    CanonValue::UInt(*self as u128)
                }
            }
        )+
    };
}

impl_int!(i8, i16, i32, i64, i128, isize);
impl_uint!(u16, u32, u64, u128, usize);

impl Canonicalize for bool {
    fn to_canon(&self) -> CanonValue {
        CanonValue::Bool(*self)
    }
}

impl Canonicalize for f32 {
    fn to_canon(&self) -> CanonValue {
        (*self as f64).to_canon()
    }
}

impl Canonicalize for f64 {
    fn to_canon(&self) -> CanonValue {
        if self.is_nan() {
            CanonValue::Float(f64::NAN.to_bits())
        } else {
            CanonValue::Float(self.to_bits())
        }
    }
}

impl Canonicalize for () {
    fn to_canon(&self) -> CanonValue {
        CanonValue::Null
    }
}

impl Canonicalize for String {
    fn to_canon(&self) -> CanonValue {
        CanonValue::Text(self.clone())
    }
}

impl Canonicalize for str {
    fn to_canon(&self) -> CanonValue {
        CanonValue::Text(self.to_string())
    }
}

impl<T: Canonicalize + ?Sized> Canonicalize for &T {
    fn to_canon(&self) -> CanonValue {
        (**self).to_canon()
    }
}

impl<T: Canonicalize> Canonicalize for Option<T> {
    fn to_canon(&self) -> CanonValue {
        match self {
            None => CanonValue::Seq(vec![CanonValue::Bool(false)]),
            Some(v) => CanonValue::Seq(vec![CanonValue::Bool(true), v.to_canon()]),
        }
    }
}

impl<T: Canonicalize> Canonicalize for Vec<T> {
    fn to_canon(&self) -> CanonValue {
        CanonValue::Seq(self.iter().map(Canonicalize::to_canon).collect())
    }
}

impl<T: Canonicalize> Canonicalize for [T] {
    fn to_canon(&self) -> CanonValue {
        CanonValue::Seq(self.iter().map(Canonicalize::to_canon).collect())
    }
}

impl<T: Canonicalize + Eq + Hash> Canonicalize for HashSet<T> {
    fn to_canon(&self) -> CanonValue {
        CanonValue::Set(self.iter().map(Canonicalize::to_canon).collect())
    }
}

impl<T: Canonicalize + Ord> Canonicalize for BTreeSet<T> {
    fn to_canon(&self) -> CanonValue {
        CanonValue::Set(self.iter().map(Canonicalize::to_canon).collect())
    }
}

impl<K: Canonicalize + Eq + Hash, V: Canonicalize> Canonicalize for HashMap<K, V> {
    fn to_canon(&self) -> CanonValue {
        CanonValue::Map(
            self.iter()
                .map(|(k, v)| (k.to_canon(), v.to_canon()))
                .collect(),
        )
    }
}

impl<K: Canonicalize + Ord, V: Canonicalize> Canonicalize for BTreeMap<K, V> {
    fn to_canon(&self) -> CanonValue {
        CanonValue::Map(
            self.iter()
                .map(|(k, v)| (k.to_canon(), v.to_canon()))
                .collect(),
        )
    }
}

macro_rules! impl_tuple {
    ($($name:ident),+) => {
        impl<$($name: Canonicalize),+> Canonicalize for ($($name,)+) {
            #[allow(non_snake_case)]
            fn to_canon(&self) -> CanonValue {
                let ($($name,)+) = self;
                CanonValue::Seq(vec![$($name.to_canon()),+])
            }
        }
    };
}

impl_tuple!(A);
impl_tuple!(A, B);
impl_tuple!(A, B, C);
impl_tuple!(A, B, C, D);
impl_tuple!(A, B, C, D, E);
impl_tuple!(A, B, C, D, E, F);
impl_tuple!(A, B, C, D, E, F, G);
impl_tuple!(A, B, C, D, E, F, G, H);

/// A raw byte string, canonicalized as `CanonValue::Bytes` rather than as an
/// ordered sequence of small integers. Use this wrapper instead of
/// `Vec<u8>` directly whenever `u8` values stand for raw bytes rather than
/// for a list of small numbers — the blanket `Vec<T>` impl treats `Vec<u8>`
/// as an ordered sequence like any other `Vec<T>`, since Rust lacks
/// specialization to tell the two apart automatically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBytes(pub Vec<u8>);

impl Canonicalize for RawBytes {
    fn to_canon(&self) -> CanonValue {
        CanonValue::Bytes(self.0.clone())
    }
}

/// A multi-dimensional numeric buffer: shape, element type, strides, and a
/// window over shared storage. Strides are part of the canonical form so a
/// view and its owner — or two views with different windows over the same
/// storage — canonicalize distinctly rather than aliasing together.
#[derive(Debug, Clone)]
pub struct NumericBuffer {
    /// Extent along each dimension.
    pub shape: Vec<usize>,
    /// Element type tag (e.g. `"f64"`, `"i32"`).
    pub dtype: &'static str,
    /// Byte stride along each dimension.
    pub strides: Vec<isize>,
    /// Raw bytes of the buffer's storage window.
    pub data: std::sync::Arc<[u8]>,
}

impl Canonicalize for NumericBuffer {
    fn to_canon(&self) -> CanonValue {
        CanonValue::Buffer {
            shape: self.shape.iter().map(|&s| s as u64).collect(),
            dtype: self.dtype.to_string(),
            strides: self.strides.iter().map(|&s| s as i64).collect(),
            bytes: self.data.to_vec(),
        }
    }
}

/// A fingerprint of a function or method used as part of an environment
/// descriptor: its qualified name plus a digest of its source text. Not
/// required to be invertible.
#[derive(Debug, Clone)]
pub struct OperationFingerprint {
    /// Fully-qualified name of the function/method.
    pub qualified_name: String,
    /// Source text (or a stable textual representation of compiled code).
    pub source: String,
}

impl Canonicalize for OperationFingerprint {
    fn to_canon(&self) -> CanonValue {
        CanonValue::Function {
            qualified_name: self.qualified_name.clone(),
            source_digest: Sha256::digest(self.source.as_bytes()).to_vec(),
        }
    }
}
