//! The dedicated sqlite worker thread. Owns the only connection to the
//! database and a small current-thread `tokio` runtime used solely to drive
//! `sqlx`; every other thread talks to it by sending a [`Request`] and
//! blocking on a reply channel.

use super::StoredValue;
use crate::error::BackendError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row as _, SqlitePool};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

pub(super) enum Request {
    GetRowId {
        hash: u64,
        key: Vec<u8>,
        reply: mpsc::Sender<Result<Option<i64>, BackendError>>,
    },
    GetValue {
        hash: u64,
        key: Vec<u8>,
        reply: mpsc::Sender<Result<Option<(i64, StoredValue)>, BackendError>>,
    },
    InsertOrReplace {
        hash: u64,
        key: Vec<u8>,
        value: StoredValue,
        reply: mpsc::Sender<Result<i64, BackendError>>,
    },
    Clear {
        reply: mpsc::Sender<Result<(), BackendError>>,
    },
    IterateKeys {
        reply: mpsc::Sender<Result<Vec<Vec<u8>>, BackendError>>,
    },
    IterateItems {
        reply: mpsc::Sender<Result<Vec<(Vec<u8>, StoredValue)>, BackendError>>,
    },
}

/// Spawn the worker thread, blocking the caller until the schema is
/// confirmed ready so `Store::open` can report setup failures synchronously.
pub(super) fn spawn(path: PathBuf) -> Result<mpsc::Sender<Request>, BackendError> {
    let (tx, rx) = mpsc::channel::<Request>();
    let (ready_tx, ready_rx) = mpsc::channel::<Result<(), BackendError>>();

    thread::Builder::new()
        .name("memocache-store".to_string())
        .spawn(move || run(path, rx, ready_tx))
        .expect("failed to spawn store worker thread");

    ready_rx.recv().map_err(|_| BackendError::WorkerGone)??;
    Ok(tx)
}

fn run(path: PathBuf, rx: mpsc::Receiver<Request>, ready_tx: mpsc::Sender<Result<(), BackendError>>) {
    let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            let _ = ready_tx.send(Err(BackendError::Io(e)));
            return;
        }
    };

    let pool = match rt.block_on(connect(&path)) {
        Ok(pool) => pool,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let _ = ready_tx.send(Ok(()));
    log::debug!("store worker ready at {:?}", path);

    while let Ok(req) = rx.recv() {
        rt.block_on(handle(&pool, req));
    }

    log::debug!("store worker for {:?} shutting down", path);
}

async fn connect(path: &std::path::Path) -> Result<SqlitePool, BackendError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .busy_timeout(Duration::from_millis(5_000));

    let pool = SqlitePoolOptions::new()
        .min_connections(1)
        .max_connections(1)
        .connect_with(options)
        .await?;

    // AUTOINCREMENT forces sqlite to track the highest rowid ever assigned in
    // sqlite_sequence rather than reusing the lowest free one, so row_id
    // stays stable and non-reused for the life of the database (I3) even
    // across a `clear()`.
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS dict (\
            rowid INTEGER PRIMARY KEY AUTOINCREMENT, \
            hash INTEGER NOT NULL, \
            key BLOB NOT NULL, \
            value BLOB NOT NULL\
        )",
    )
    .execute(&pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS dict_hash_idx ON dict (hash)")
        .execute(&pool)
        .await?;

    Ok(pool)
}

async fn handle(pool: &SqlitePool, req: Request) {
    match req {
        Request::GetRowId { hash, key, reply } => {
            let _ = reply.send(get_row_id(pool, hash, &key).await);
        }
        Request::GetValue { hash, key, reply } => {
            let _ = reply.send(get_value(pool, hash, &key).await);
        }
        Request::InsertOrReplace { hash, key, value, reply } => {
            let _ = reply.send(insert_or_replace(pool, hash, &key, value).await);
        }
        Request::Clear { reply } => {
            let _ = reply.send(clear(pool).await);
        }
        Request::IterateKeys { reply } => {
            let _ = reply.send(iterate_keys(pool).await);
        }
        Request::IterateItems { reply } => {
            let _ = reply.send(iterate_items(pool).await);
        }
    }
}

fn hash_to_sql(hash: u64) -> i64 {
    hash as i64
}

async fn get_row_id(pool: &SqlitePool, hash: u64, key: &[u8]) -> Result<Option<i64>, BackendError> {
    let row = sqlx::query("SELECT rowid FROM dict WHERE hash = ?1 AND key = ?2")
        .bind(hash_to_sql(hash))
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| r.get::<i64, _>("rowid")))
}

async fn get_value(
    pool: &SqlitePool,
    hash: u64,
    key: &[u8],
) -> Result<Option<(i64, StoredValue)>, BackendError> {
    let row = sqlx::query("SELECT rowid, value FROM dict WHERE hash = ?1 AND key = ?2")
        .bind(hash_to_sql(hash))
        .bind(key)
        .fetch_optional(pool)
        .await?;
    match row {
        None => Ok(None),
        Some(row) => {
            let row_id: i64 = row.get("rowid");
            let raw: Vec<u8> = row.get("value");
            let value: StoredValue =
                bincode::deserialize(&raw).map_err(|e| BackendError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    e,
                )))?;
            Ok(Some((row_id, value)))
        }
    }
}

async fn insert_or_replace(
    pool: &SqlitePool,
    hash: u64,
    key: &[u8],
    value: StoredValue,
) -> Result<i64, BackendError> {
    let encoded = bincode::serialize(&value).expect("StoredValue encoding is infallible");

    let existing = sqlx::query("SELECT rowid FROM dict WHERE hash = ?1 AND key = ?2")
        .bind(hash_to_sql(hash))
        .bind(key)
        .fetch_optional(pool)
        .await?;

    if let Some(row) = existing {
        let row_id: i64 = row.get("rowid");
        sqlx::query("UPDATE dict SET value = ?1 WHERE rowid = ?2")
            .bind(&encoded)
            .bind(row_id)
            .execute(pool)
            .await?;
        Ok(row_id)
    } else {
        let result = sqlx::query("INSERT INTO dict (hash, key, value) VALUES (?1, ?2, ?3)")
            .bind(hash_to_sql(hash))
            .bind(key)
            .bind(&encoded)
            .execute(pool)
            .await?;
        Ok(result.last_insert_rowid())
    }
}

async fn clear(pool: &SqlitePool) -> Result<(), BackendError> {
    sqlx::query("DELETE FROM dict").execute(pool).await?;
    Ok(())
}

async fn iterate_keys(pool: &SqlitePool) -> Result<Vec<Vec<u8>>, BackendError> {
    let rows = sqlx::query("SELECT key FROM dict ORDER BY rowid")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|r| r.get::<Vec<u8>, _>("key")).collect())
}

async fn iterate_items(pool: &SqlitePool) -> Result<Vec<(Vec<u8>, StoredValue)>, BackendError> {
    let rows = sqlx::query("SELECT key, value FROM dict ORDER BY rowid")
        .fetch_all(pool)
        .await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let key: Vec<u8> = row.get("key");
        let raw: Vec<u8> = row.get("value");
        let value: StoredValue = bincode::deserialize(&raw).map_err(|e| {
            BackendError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        out.push((key, value));
    }
    Ok(out)
}
