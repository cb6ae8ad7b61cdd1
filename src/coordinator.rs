//! Enforces at-most-one concurrent computation per cache key and safe
//! cooperation among local threads and remote processes.
//!
//! The call algorithm: probe under both locks, decide hit/wait/fill, run
//! the operation outside all locks, then commit under `L_file` alone.

use crate::canon::{CanonValue, Canonicalize};
use crate::error::{BackendError, CacheError};
use crate::keyer::{self, Partial, Traversal};
use crate::lock::DirLock;
use crate::store::{Store, StoredValue};
use parking_lot::Mutex;
use std::path::Path;
use std::thread::sleep;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const DEFERRED_POLL: Duration = Duration::from_millis(10);
const CONTENTION_POLL: Duration = Duration::from_millis(1);

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_secs()
}

fn is_live(timestamp: u64, deferred_timeout: Duration) -> bool {
    let now = now_secs();
    // A future-stamped claim (now < timestamp, e.g. clock skew across
    // machines sharing the cache over NFS) is not live — it's reclaimed
    // just like an expired one, matching the original's
    // `dt > timeout or dt < 0` and spec §4.4's `0 <= now - t <= timeout`.
    now >= timestamp && now - timestamp <= deferred_timeout.as_secs()
}

fn parent_chain(
    store: &Store,
    env_row_id: i64,
    subkeys: &[CanonValue],
) -> Result<Partial, BackendError> {
    use crate::canon::{canon_bytes, hash64};

    let mut parent = Partial(env_row_id);
    for subkey in &subkeys[..subkeys.len() - 1] {
        let composite = CanonValue::Seq(vec![parent.to_canon(), subkey.clone()]);
        let bytes = canon_bytes(&composite);
        let h = hash64(&bytes);
        let row_id = store
            .get_row_id(h, &bytes)?
            .expect("inner row must exist for an already-resolved leaf");
        parent = Partial(row_id);
    }
    Ok(parent)
}

/// What a leaf resolution found, translated into the fill starting point if
/// no immediately-usable hit was found.
enum Decision {
    /// A live `Deferred` is in progress; wait and retry from the top.
    WaitForDeferred,
    /// A materialized value is ready to return (subject to validation).
    Hit(Vec<u8>),
    /// Either genuinely missing or an expired `Deferred`; resume filling
    /// from `(depth, parent)`.
    NeedsFill { depth: usize, parent: Partial },
}

fn decide(
    store: &Store,
    env_row_id: i64,
    subkeys: &[CanonValue],
    deferred_timeout: Duration,
) -> Result<Decision, BackendError> {
    match keyer::traverse(store, env_row_id, subkeys)? {
        Traversal::Hit { value: StoredValue::Materialized { payload }, .. } => Ok(Decision::Hit(payload)),
        Traversal::Hit { value: StoredValue::Deferred { timestamp }, .. } => {
            if is_live(timestamp, deferred_timeout) {
                Ok(Decision::WaitForDeferred)
            } else {
                let parent = parent_chain(store, env_row_id, subkeys)?;
                Ok(Decision::NeedsFill { depth: subkeys.len() - 1, parent })
            }
        }
        Traversal::Hit { value: StoredValue::Placeholder, .. } => {
            // A Placeholder should not appear at a leaf; treat it as
            // reclaimable rather than panicking.
            log::warn!("leaf row held a Placeholder; reclaiming it for computation");
            let parent = parent_chain(store, env_row_id, subkeys)?;
            Ok(Decision::NeedsFill { depth: subkeys.len() - 1, parent })
        }
        Traversal::Miss { depth, parent } => Ok(Decision::NeedsFill { depth, parent }),
    }
}

/// Run the coordinator's call algorithm for one hierarchical key.
///
/// `run` computes the operation's serialized payload on a miss (or to
/// recompute for validation); `payloads_equal` compares two serialized
/// payloads for the byte-wise equality validation mode requires. Both are
/// supplied by the cache façade, which alone knows how to (de)serialize and
/// canonicalize `Op::Output`.
pub fn call<Run, PayloadsEqual>(
    store: &Store,
    thread_lock: &Mutex<()>,
    lock_path: &Path,
    env_row_id: i64,
    subkeys: &[CanonValue],
    deferred_timeout: Duration,
    lock_timeout: Duration,
    validate: bool,
    mut run: Run,
    payloads_equal: PayloadsEqual,
) -> Result<Vec<u8>, CacheError>
where
    Run: FnMut() -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>>,
    PayloadsEqual: Fn(&[u8], &[u8]) -> bool,
{
    loop {
        // Step 2: probe under both locks.
        let decision = {
            let _thread_guard = thread_lock.lock();
            let _file_guard = DirLock::acquire(lock_path.to_path_buf(), lock_timeout)
                .map_err(|_| CacheError::LockTimeout)?;
            decide(store, env_row_id, subkeys, deferred_timeout)?
        };

        match decision {
            Decision::Hit(payload) => {
                if !validate {
                    return Ok(payload);
                }
                let fresh = run().map_err(CacheError::Operation)?;
                if !payloads_equal(&payload, &fresh) {
                    return Err(CacheError::ValidationFailure {
                        key: format!("{:?}", subkeys),
                    });
                }
                return Ok(payload);
            }
            Decision::WaitForDeferred => {
                sleep(DEFERRED_POLL);
                continue;
            }
            Decision::NeedsFill { .. } => {
                // Step 5: convoy-avoidance probe. A starved writer falls
                // back to waiting for a deferred entry rather than queuing
                // behind a busy lock.
                if thread_lock.try_lock().is_none() {
                    sleep(CONTENTION_POLL);
                    continue;
                }

                // Both locks are held only for the re-probe and (if still
                // needed) the fill. They are dropped at the end of this
                // block, before the operation runs or a validation
                // recompute happens — L_thread guards the probe only
                // (spec §5), never the computation (spec §4.4 step 6).
                let redecision = {
                    let _thread_guard = thread_lock.lock();
                    let file_guard = match DirLock::try_acquire(lock_path.to_path_buf()) {
                        Some(guard) => guard,
                        None => {
                            sleep(CONTENTION_POLL);
                            continue;
                        }
                    };

                    // Re-check under the held lock: another process may
                    // have completed the fill (or even the full
                    // computation) between our probe and acquiring L_file
                    // here. This keeps the documented duplicate-computation
                    // race window rare rather than routine.
                    let redecision = decide(store, env_row_id, subkeys, deferred_timeout)?;
                    if let Decision::NeedsFill { depth, parent } = redecision {
                        keyer::fill(store, subkeys, parent, depth, now_secs())?;
                    }
                    drop(file_guard);
                    redecision
                };

                match redecision {
                    Decision::Hit(payload) => {
                        if !validate {
                            return Ok(payload);
                        }
                        let fresh = run().map_err(CacheError::Operation)?;
                        if !payloads_equal(&payload, &fresh) {
                            return Err(CacheError::ValidationFailure {
                                key: format!("{:?}", subkeys),
                            });
                        }
                        return Ok(payload);
                    }
                    Decision::WaitForDeferred => {
                        sleep(DEFERRED_POLL);
                        continue;
                    }
                    Decision::NeedsFill { .. } => {
                        // Step 6: run the operation outside all locks.
                        let payload = match run() {
                            Ok(payload) => payload,
                            Err(e) => return Err(CacheError::Operation(e)),
                        };

                        // Step 7: commit under L_file alone.
                        let _commit_guard =
                            DirLock::acquire(lock_path.to_path_buf(), lock_timeout)
                                .map_err(|_| CacheError::LockTimeout)?;
                        keyer::materialize(store, env_row_id, subkeys, payload.clone())?;
                        return Ok(payload);
                    }
                }
            }
        }
    }
}
