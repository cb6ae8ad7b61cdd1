//! Declarative opt-in for canonicalizing simple field-list structs, since
//! Rust has no runtime reflection to enumerate a struct's data members.

/// Implement [`crate::Canonicalize`] for a struct by naming its data
/// members. Equivalent to hand-writing a `Record` variant with one field
/// per name listed; the order fields are listed here does not affect the
/// resulting bytes, since record fields are sorted by field name (like any
/// other mapping) before final encoding.
///
/// ```
/// use memocache::canonicalize_record;
///
/// struct CompilerEnv {
///     version: String,
///     target: String,
/// }
///
/// canonicalize_record!(CompilerEnv { version, target });
/// ```
#[macro_export]
macro_rules! canonicalize_record {
    ($ty:ty { $($field:ident),+ $(,)? }) => {
        impl $crate::Canonicalize for $ty {
            fn to_canon(&self) -> $crate::CanonValue {
                let fields: Vec<($crate::CanonValue, $crate::CanonValue)> = vec![
                    $((
                        $crate::CanonValue::Text(stringify!($field).to_string()),
                        $crate::Canonicalize::to_canon(&self.$field),
                    )),+
                ];
                $crate::CanonValue::Record {
                    type_tag: stringify!($ty).to_string(),
                    fields,
                }
            }
        }
    };
}
