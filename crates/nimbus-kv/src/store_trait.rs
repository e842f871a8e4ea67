//! The uniform KV contract both drivers implement.

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::KvError;

type ReleaseFuture = Pin<Box<dyn Future<Output = Result<(), KvError>> + Send>>;

/// A key's time-to-live. `Ttl::Forever` is the TTL=0 convention from the
/// domain store's "Expires=0 means forever" rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    Forever,
    After(Duration),
}

impl Ttl {
    pub fn from_secs(secs: u64) -> Ttl {
        if secs == 0 {
            Ttl::Forever
        } else {
            Ttl::After(Duration::from_secs(secs))
        }
    }
}

/// The single hierarchical key/value namespace every higher layer is
/// built on. Keys are slash-joined strings; values are opaque bytes.
/// Implementations must escape `/` within individual components
/// themselves -- callers of this trait pass already-joined keys.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fails with `AlreadyExists` if `key` is already present.
    async fn create(&self, key: &str, value: Vec<u8>, ttl: Ttl) -> Result<(), KvError>;

    /// Always succeeds, overwriting any existing value and TTL.
    async fn upsert(&self, key: &str, value: Vec<u8>, ttl: Ttl) -> Result<(), KvError>;

    /// Fails with `NotFound` if `key` is absent.
    async fn update(&self, key: &str, value: Vec<u8>, ttl: Ttl) -> Result<(), KvError>;

    /// Atomically replaces `key`'s value with `new` if and only if the
    /// current value equals `expected`; otherwise fails with
    /// `CompareFailed`. Fails with `NotFound` if `key` is absent.
    async fn compare_and_swap(
        &self,
        key: &str,
        new: Vec<u8>,
        expected: &[u8],
        ttl: Ttl,
    ) -> Result<(), KvError>;

    /// Fails with `NotFound` if `key` is absent or expired.
    async fn get(&self, key: &str) -> Result<Vec<u8>, KvError>;

    /// Fails with `NotFound` if `key` is absent.
    async fn delete(&self, key: &str) -> Result<(), KvError>;

    /// Recursively removes every key under `prefix`. Succeeds even if
    /// the subtree is empty.
    async fn delete_dir(&self, prefix: &str) -> Result<(), KvError>;

    /// Blocks, retrying with fixed backoff, until the lock at `key` is
    /// acquired. The lock expires after `ttl` if never released.
    async fn acquire_lock(&self, key: &str, ttl: Ttl) -> Result<LockGuard, KvError>;

    /// Attempts to acquire the lock at `key` once, failing fast with
    /// `AlreadyExists` if it is already held.
    async fn try_acquire_lock(&self, key: &str, ttl: Ttl) -> Result<LockGuard, KvError>;

    /// Lexicographically sorted list of immediate child key components
    /// under `prefix` (not full paths).
    async fn list_children(&self, prefix: &str) -> Result<Vec<String>, KvError>;
}

/// A held lock. Dropping it without calling [`LockGuard::release`]
/// leaves the lock to expire naturally via its TTL; callers that want
/// deterministic release (e.g. at the end of an install phase) should
/// call `release` explicitly.
pub struct LockGuard {
    key: String,
    release: Box<dyn FnOnce() -> ReleaseFuture + Send>,
}

impl LockGuard {
    /// `release` deletes the lock key; each driver supplies this as a
    /// closure over its own cheaply-cloneable connection handle rather
    /// than requiring the whole store to be wrapped in an `Arc<dyn
    /// KvStore>`.
    pub fn new<F, Fut>(key: String, release: F) -> LockGuard
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), KvError>> + Send + 'static,
    {
        LockGuard {
            key,
            release: Box::new(move || Box::pin(release())),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Deletes the lock key immediately rather than waiting for its TTL
    /// to expire. `NotFound` (already expired/released) is not an error.
    pub async fn release(self) -> Result<(), KvError> {
        match (self.release)().await {
            Ok(()) | Err(KvError::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }
}
