//! The durable, process-safe `(hash64, key_bytes) -> value_bytes` mapping
//! that backs the cache, with stable row-id identity.
//!
//! All SQL is serialized through a single dedicated worker thread driven by
//! a request queue, a single-writer-thread design that avoids contending
//! sqlite connections across threads. The worker owns a small
//! current-thread `tokio` runtime used only to drive the async `sqlx`
//! driver; every public method on [`Store`] is a plain blocking call from
//! the caller's point of view.

mod worker;

use crate::canon::CBytes;
use crate::error::BackendError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::mpsc;

/// The tagged state a row in the backing store can hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoredValue {
    /// An inner node of a hierarchical key chain; carries no data.
    Placeholder,
    /// A computation claim, timestamped in seconds since the Unix epoch.
    Deferred {
        /// When the claim was made.
        timestamp: u64,
    },
    /// The operation's serialized return value.
    Materialized {
        /// Serialized payload bytes.
        payload: Vec<u8>,
    },
}

/// A durable record read back from the store: its stable row identity, the
/// lookup-accelerator hash, the canonical key bytes that produced it, and
/// its current tagged value.
#[derive(Debug, Clone)]
pub struct Row {
    /// Monotonic identifier assigned by the store when the row was first
    /// written. Stable for the life of the database.
    pub row_id: i64,
    /// Nonzero lookup-accelerator hash.
    pub hash64: u64,
    /// The exact canonical bytes that produced this row.
    pub key_bytes: CBytes,
    /// The row's current tagged value.
    pub value: StoredValue,
}

/// Durable, process-safe `(hash64, key_bytes) -> value` mapping. Cheap to
/// clone: all handles share the same worker thread and connection.
#[derive(Clone)]
pub struct Store {
    tx: mpsc::Sender<worker::Request>,
}

impl Store {
    /// Open (creating if necessary) the sqlite-backed store at `path`,
    /// spawning its dedicated worker thread.
    pub fn open(path: &Path) -> Result<Self, BackendError> {
        let tx = worker::spawn(path.to_path_buf())?;
        Ok(Store { tx })
    }

    fn request<T>(
        &self,
        build: impl FnOnce(mpsc::Sender<Result<T, BackendError>>) -> worker::Request,
    ) -> Result<T, BackendError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(build(reply_tx))
            .map_err(|_| BackendError::WorkerGone)?;
        reply_rx.recv().map_err(|_| BackendError::WorkerGone)?
    }

    /// Look up the `row_id` of the row with the exact `(hash64, key_bytes)`
    /// pair, or `None` if no such row exists.
    pub fn get_row_id(&self, hash64: u64, key_bytes: &CBytes) -> Result<Option<i64>, BackendError> {
        let key = key_bytes.as_slice().to_vec();
        self.request(|reply| worker::Request::GetRowId {
            hash: hash64,
            key,
            reply,
        })
    }

    /// Look up the `(row_id, value)` of the row with the exact
    /// `(hash64, key_bytes)` pair, or `None` if no such row exists.
    pub fn get_value(
        &self,
        hash64: u64,
        key_bytes: &CBytes,
    ) -> Result<Option<(i64, StoredValue)>, BackendError> {
        let key = key_bytes.as_slice().to_vec();
        self.request(|reply| worker::Request::GetValue {
            hash: hash64,
            key,
            reply,
        })
    }

    /// Insert a new row, or replace the value of an existing row matched by
    /// exact `(hash64, key_bytes)`. On insert, a new `row_id` is assigned;
    /// on replace, the existing `row_id` is preserved.
    pub fn insert_or_replace(
        &self,
        hash64: u64,
        key_bytes: &CBytes,
        value: StoredValue,
    ) -> Result<i64, BackendError> {
        let key = key_bytes.as_slice().to_vec();
        self.request(|reply| worker::Request::InsertOrReplace {
            hash: hash64,
            key,
            value,
            reply,
        })
    }

    /// Remove every row. Does not reuse or reserve row-ids that could later
    /// confuse callers — any cached `env_row_id` held by a `Cache` instance
    /// must be re-pinned after a clear.
    pub fn clear(&self) -> Result<(), BackendError> {
        self.request(|reply| worker::Request::Clear { reply })
    }

    /// All keys currently stored, in row-insertion order. Diagnostic use
    /// only.
    pub fn iterate_keys(&self) -> Result<Vec<CBytes>, BackendError> {
        let raw = self.request(|reply| worker::Request::IterateKeys { reply })?;
        Ok(raw.into_iter().map(CBytes).collect())
    }

    /// All `(key, value)` pairs currently stored, in row-insertion order.
    /// Diagnostic use only.
    pub fn iterate_items(&self) -> Result<Vec<(CBytes, StoredValue)>, BackendError> {
        let raw = self.request(|reply| worker::Request::IterateItems { reply })?;
        Ok(raw.into_iter().map(|(k, v)| (CBytes(k), v)).collect())
    }
}
