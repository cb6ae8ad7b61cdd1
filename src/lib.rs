//! # memocache
//!
//! A durable, cross-process and cross-thread key/value cache for expensive
//! deterministic compute operations (compiler passes, graph optimization,
//! code generation) whose outputs are small and reusable relative to their
//! inputs.
//!
//! A client registers a pure [`cache::Operation`] together with an
//! environment descriptor capturing everything about the host that affects
//! its result; [`cache::Cache`] memoizes calls against a composite key
//! formed from that environment and the call arguments.
//!
//! ## Architecture
//!
//! - `canon`: deterministic serialization of arbitrary key values
//! - `store`: sqlite-backed durable `(hash64, key_bytes) -> value` mapping
//! - `keyer`: hierarchical key chains over the store, with prefix sharing
//! - `lock`: the inter-process advisory lock the coordinator relies on
//! - `coordinator`: at-most-one-concurrent-computation enforcement
//! - `cache`: the public façade binding an operation and environment
//! - `shelve`: a read-only pre-built `{hash(key) -> value}` collaborator
//! - `error`: the crate's typed error enums

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod canon;
pub mod coordinator;
pub mod error;
pub mod keyer;
pub mod lock;
pub mod shelve;
pub mod store;

pub use cache::{Cache, CacheConfig, HierarchicalKey, Operation};
pub use canon::{
    canon_bytes, hash64, CBytes, CanonValue, Canonicalize, NumericBuffer, OperationFingerprint,
    RawBytes,
};
pub use error::{BackendError, CacheError};
pub use keyer::Partial;
pub use shelve::ReadOnlyShelve;
pub use store::{Store, StoredValue};
