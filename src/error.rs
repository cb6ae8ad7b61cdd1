//! Error types for the cache, the backing store, and the coordination layer.

use thiserror::Error;

/// Errors surfaced by the sqlite-backed [`crate::store::Store`].
#[derive(Error, Debug)]
pub enum BackendError {
    /// No row matched the given `(hash, key)` pair. Internal to the store;
    /// callers above the keyer never see this directly, it is resolved to a
    /// cache miss.
    #[error("no row for given hash/key")]
    NotFound,

    /// The sqlite driver reported a failure (I/O, corruption, constraint).
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Filesystem failure while preparing the cache directory or lock file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transient lock contention surfaced by the file system; not retried
    /// internally.
    #[error("backend busy")]
    Busy,

    /// The worker thread hung up before answering a request.
    #[error("store worker thread is gone")]
    WorkerGone,
}

/// Errors surfaced by [`crate::cache::Cache::call`].
#[derive(Error, Debug)]
pub enum CacheError {
    /// A backend/store failure propagated from the worker thread.
    #[error("cache backend error: {0}")]
    Backend(#[from] BackendError),

    /// `L_file` could not be acquired within the configured `lock_timeout`.
    #[error("timed out acquiring the cache's inter-process lock")]
    LockTimeout,

    /// Validation mode recomputed a hit and the canonical bytes of the old
    /// and new payloads did not match byte-for-byte.
    #[error("validation mismatch for cache key {key}")]
    ValidationFailure {
        /// Debug-formatted hierarchical key that failed validation.
        key: String,
    },

    /// The user operation returned an error. No leaf was committed; the
    /// `Deferred` token left behind will expire and be retried by a later
    /// caller.
    #[error("cached operation failed: {0}")]
    Operation(#[source] Box<dyn std::error::Error + Send + Sync>),
}
