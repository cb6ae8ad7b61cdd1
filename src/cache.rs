//! Binds an [`Operation`] and an environment descriptor to a durable cache
//! instance, and exposes the blocking `call` entry point.

use crate::canon::{canon_bytes, CBytes, CanonValue, Canonicalize, OperationFingerprint};
use crate::coordinator;
use crate::error::{BackendError, CacheError};
use crate::lock::DirLock;
use crate::store::{Store, StoredValue};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// A pure, deterministic computation worth memoizing.
///
/// `Args` carries the hierarchical key (see [`HierarchicalKey`]); `Output`
/// is both the cached payload and, via `Canonicalize`, the value compared
/// in validation mode.
pub trait Operation {
    /// The operation's argument tuple, doubling as its hierarchical key.
    type Args: HierarchicalKey;
    /// The operation's return value.
    type Output: Canonicalize + Serialize + DeserializeOwned;
    /// The operation's failure type. No cache entry is committed on error.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Run the operation. Must be deterministic given `args` and the
    /// environment this cache instance was constructed with.
    fn call(&self, args: &Self::Args) -> Result<Self::Output, Self::Error>;

    /// Identity folded into the cache's environment so that a changed
    /// implementation invalidates old entries instead of returning stale
    /// results for new code.
    fn fingerprint(&self) -> OperationFingerprint;
}

/// Supplies the ordered subkeys of a hierarchical key. Implemented for
/// tuples of 1–8 [`Canonicalize`] elements; a single positional argument
/// still takes the one-tuple form `(arg,)`, so positional arguments plus an
/// optional trailing named mapping compose naturally as tuple elements.
pub trait HierarchicalKey {
    /// One canonical subkey per hierarchy level, in call order.
    fn subkeys(&self) -> Vec<CanonValue>;
}

macro_rules! impl_hierarchical_key_tuple {
    ($($name:ident),+) => {
        impl<$($name: Canonicalize),+> HierarchicalKey for ($($name,)+) {
            #[allow(non_snake_case)]
            fn subkeys(&self) -> Vec<CanonValue> {
                let ($($name,)+) = self;
                vec![$($name.to_canon()),+]
            }
        }
    };
}

impl_hierarchical_key_tuple!(A);
impl_hierarchical_key_tuple!(A, B);
impl_hierarchical_key_tuple!(A, B, C);
impl_hierarchical_key_tuple!(A, B, C, D);
impl_hierarchical_key_tuple!(A, B, C, D, E);
impl_hierarchical_key_tuple!(A, B, C, D, E, F);
impl_hierarchical_key_tuple!(A, B, C, D, E, F, G);
impl_hierarchical_key_tuple!(A, B, C, D, E, F, G, H);

/// Configuration knobs controlling a cache instance's lifecycle and
/// coordination behavior.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// File-name component identifying this cache's sqlite file and lock.
    pub identifier: String,
    /// Enable validation mode: every hit is recomputed and byte-compared.
    pub validate: bool,
    /// How long a `Deferred` claim is considered live.
    pub deferred_timeout: Duration,
    /// How long to wait to acquire `L_file` before giving up.
    pub lock_timeout: Duration,
    /// Clear the whole store when the environment row does not yet exist.
    pub environment_clear: bool,
    /// Clear the whole store unconditionally on construction.
    pub connect_clear: bool,
    /// Override the cache directory (defaults to `<tmp>/memocache`).
    pub cache_dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            identifier: "default".to_string(),
            validate: false,
            deferred_timeout: Duration::from_secs(30),
            lock_timeout: Duration::from_secs(1),
            environment_clear: true,
            connect_clear: false,
            cache_dir: None,
        }
    }
}

impl CacheConfig {
    /// Start from [`Default::default`] and apply `MEMOCACHE_*` overrides,
    /// layering environment variables over the hardcoded defaults.
    pub fn from_env(identifier: impl Into<String>) -> Self {
        let mut config = CacheConfig {
            identifier: identifier.into(),
            ..Default::default()
        };
        if let Ok(v) = std::env::var("MEMOCACHE_VALIDATE") {
            config.validate = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("MEMOCACHE_DEFERRED_TIMEOUT_SECS") {
            if let Ok(secs) = v.parse() {
                config.deferred_timeout = Duration::from_secs(secs);
            }
        }
        if let Ok(v) = std::env::var("MEMOCACHE_LOCK_TIMEOUT_SECS") {
            if let Ok(secs) = v.parse() {
                config.lock_timeout = Duration::from_secs(secs);
            }
        }
        if let Ok(v) = std::env::var("MEMOCACHE_ENVIRONMENT_CLEAR") {
            config.environment_clear = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("MEMOCACHE_CONNECT_CLEAR") {
            config.connect_clear = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("MEMOCACHE_DIR") {
            config.cache_dir = Some(PathBuf::from(v));
        }
        config
    }

    fn resolved_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("memocache"))
    }
}

/// A durable cache bound to one operation and one environment.
pub struct Cache<Op: Operation> {
    op: Op,
    store: Store,
    lock_path: PathBuf,
    thread_lock: Mutex<()>,
    env_bytes: CBytes,
    env_hash: u64,
    env_row_id: i64,
    config: CacheConfig,
}

/// The augmented environment actually canonicalized and hashed: the caller's
/// descriptor plus host architecture, this crate's own version, and the
/// operation's identity, so a changed build or implementation invalidates
/// old entries instead of returning stale results. Keeping this as a
/// `Record` (not a bare `Seq`) means adding a field here is a mechanical,
/// order-independent change.
///
/// `memocache_version` is `memocache`'s own `CARGO_PKG_VERSION`, not the
/// embedding application's — `env!` expands at this crate's compile time, so
/// it cannot observe the embedder's version. Code drift in the embedding
/// application is expected to be caught by `op_fingerprint`, which the
/// caller derives from its own operation's source; an embedder that wants
/// its own version folded in can include it in the environment descriptor
/// it passes to `Cache::open`.
fn augmented_environment<E: Canonicalize>(environment: &E, op_fingerprint: OperationFingerprint) -> CanonValue {
    CanonValue::Record {
        type_tag: "memocache::Environment".to_string(),
        fields: vec![
            ("user".to_canon(), environment.to_canon()),
            ("host_arch".to_canon(), std::env::consts::ARCH.to_canon()),
            ("memocache_version".to_canon(), env!("CARGO_PKG_VERSION").to_canon()),
            ("operation".to_canon(), op_fingerprint.to_canon()),
        ],
    }
}

impl<Op: Operation> Cache<Op> {
    /// Open (creating if necessary) the cache directory and sqlite file for
    /// `config.identifier`, pin the environment row per the policies in
    /// `config`, and spawn the store's worker thread.
    pub fn open<E: Canonicalize>(op: Op, environment: &E, config: CacheConfig) -> Result<Self, CacheError> {
        let dir = config.resolved_dir();
        std::fs::create_dir_all(&dir).map_err(BackendError::Io)?;
        let db_path = dir.join(format!("{}.sqlite", config.identifier));
        let lock_path = DirLock::path_for(&db_path);

        let store = Store::open(&db_path).map_err(CacheError::Backend)?;
        let thread_lock = Mutex::new(());

        let env_value = augmented_environment(environment, op.fingerprint());
        let env_bytes = canon_bytes(&env_value);
        let env_hash = crate::canon::hash64(&env_bytes);

        let env_row_id = {
            let _thread_guard = thread_lock.lock();
            let _file_guard = DirLock::acquire(lock_path.clone(), config.lock_timeout)
                .map_err(|_| CacheError::LockTimeout)?;

            if config.connect_clear {
                store.clear().map_err(CacheError::Backend)?;
            }

            match store.get_row_id(env_hash, &env_bytes).map_err(CacheError::Backend)? {
                Some(row_id) => row_id,
                None => {
                    if config.environment_clear && !config.connect_clear {
                        store.clear().map_err(CacheError::Backend)?;
                    }
                    store
                        .insert_or_replace(env_hash, &env_bytes, StoredValue::Placeholder)
                        .map_err(CacheError::Backend)?
                }
            }
        };

        Ok(Cache {
            op,
            store,
            lock_path,
            thread_lock,
            env_bytes,
            env_hash,
            env_row_id,
            config,
        })
    }

    /// Invoke the cached operation, or return its previously materialized
    /// value. Delegates the locking/deferred/fill protocol to
    /// [`crate::coordinator::call`].
    pub fn call(&self, args: &Op::Args) -> Result<Op::Output, CacheError> {
        let subkeys = args.subkeys();

        let run = || -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>> {
            let output = self.op.call(args).map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?;
            Ok(bincode::serialize(&output).expect("Operation::Output encoding is infallible"))
        };

        let payloads_equal = |old: &[u8], new: &[u8]| -> bool {
            let old_value: Op::Output = match bincode::deserialize(old) {
                Ok(v) => v,
                Err(_) => return false,
            };
            let new_value: Op::Output = match bincode::deserialize(new) {
                Ok(v) => v,
                Err(_) => return false,
            };
            canon_bytes(&old_value) == canon_bytes(&new_value)
        };

        let payload = coordinator::call(
            &self.store,
            &self.thread_lock,
            &self.lock_path,
            self.env_row_id,
            &subkeys,
            self.config.deferred_timeout,
            self.config.lock_timeout,
            self.config.validate,
            run,
            payloads_equal,
        )?;

        bincode::deserialize(&payload).map_err(|e| {
            CacheError::Backend(BackendError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                e,
            )))
        })
    }

    /// Remove every row in the backing store. Re-pins the environment row
    /// immediately afterward so this instance stays usable.
    pub fn clear(&mut self) -> Result<(), CacheError> {
        let _thread_guard = self.thread_lock.lock();
        let _file_guard = DirLock::acquire(self.lock_path.clone(), self.config.lock_timeout)
            .map_err(|_| CacheError::LockTimeout)?;
        self.store.clear().map_err(CacheError::Backend)?;
        self.env_row_id = self
            .store
            .insert_or_replace(self.env_hash, &self.env_bytes, StoredValue::Placeholder)
            .map_err(CacheError::Backend)?;
        Ok(())
    }
}
