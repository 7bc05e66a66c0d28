pub mod memory;
pub mod redis;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{FlowError, FlowResult};

/// All lock keys live under this namespace in the shared key space.
pub const KEY_PREFIX: &str = "lock:";

/// Poll interval for `wait_for`.
const WAIT_POLL: Duration = Duration::from_millis(100);

/// Storage primitive behind the lock: atomic set-if-absent with expiry plus
/// token-checked delete and expiry refresh (server-side Lua on Redis).
#[async_trait]
pub trait LockBackend: Send + Sync {
    async fn set_nx_px(&self, key: &str, value: &str, ttl_ms: u64) -> FlowResult<bool>;
    /// Delete iff the current value equals `value`.
    async fn del_if_eq(&self, key: &str, value: &str) -> FlowResult<bool>;
    /// Refresh expiry iff the current value equals `value`.
    async fn pexpire_if_eq(&self, key: &str, value: &str, ttl_ms: u64) -> FlowResult<bool>;
}

/// Tokenised distributed lock over a [`LockBackend`].
///
/// Tokens are opaque and unique per acquisition, so a worker that lost its
/// lock to TTL expiry cannot release or extend a successor's hold.
#[derive(Clone)]
pub struct LockManager {
    backend: Arc<dyn LockBackend>,
}

impl LockManager {
    pub fn new(backend: Arc<dyn LockBackend>) -> Self {
        LockManager { backend }
    }

    fn full_key(key: &str) -> String {
        format!("{KEY_PREFIX}{key}")
    }

    /// Try to take the lock. `None` when it is already held.
    pub async fn acquire(&self, key: &str, ttl_ms: u64) -> FlowResult<Option<String>> {
        let token = Uuid::new_v4().to_string();
        let ok = self
            .backend
            .set_nx_px(&Self::full_key(key), &token, ttl_ms)
            .await?;
        Ok(ok.then_some(token))
    }

    /// Release the lock if we still hold it. `false` means the hold was
    /// already lost (expired or taken over).
    pub async fn release(&self, key: &str, token: &str) -> FlowResult<bool> {
        self.backend.del_if_eq(&Self::full_key(key), token).await
    }

    /// Push the expiry out while still holding the lock.
    pub async fn extend(&self, key: &str, token: &str, ttl_ms: u64) -> FlowResult<bool> {
        self.backend
            .pexpire_if_eq(&Self::full_key(key), token, ttl_ms)
            .await
    }

    /// Poll-acquire every 100 ms, giving up after `max_wait_ms`.
    pub async fn wait_for(
        &self,
        key: &str,
        max_wait_ms: u64,
        ttl_ms: u64,
    ) -> FlowResult<Option<String>> {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(max_wait_ms);
        loop {
            if let Some(token) = self.acquire(key, ttl_ms).await? {
                return Ok(Some(token));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(WAIT_POLL).await;
        }
    }

    /// Run `f` under the lock, releasing on every exit path. A failed initial
    /// acquire returns `FlowError::Conflict` without running `f`. A worker
    /// that dies mid-`f` loses the key to TTL expiry instead.
    pub async fn with_lock<T, F, Fut>(&self, key: &str, ttl_ms: u64, f: F) -> FlowResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FlowResult<T>>,
    {
        let token = self
            .acquire(key, ttl_ms)
            .await?
            .ok_or_else(|| FlowError::Conflict(format!("lock '{key}' is held")))?;

        let result = f().await;

        if let Err(err) = self.release(key, &token).await {
            tracing::warn!(key, %err, "lock release failed; ttl will reap it");
        }

        result
    }
}
