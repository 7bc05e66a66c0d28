use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::FlowResult;

use super::LockBackend;

/// In-process lock store with the same check-and-act semantics as the Redis
/// backend. Used by tests and the single-process `run` mode.
#[derive(Default)]
pub struct MemoryLockBackend {
    entries: Mutex<HashMap<String, Entry>>,
}

struct Entry {
    value: String,
    expires_at: Instant,
}

impl MemoryLockBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn expired(entry: &Entry) -> bool {
    Instant::now() >= entry.expires_at
}

#[async_trait]
impl LockBackend for MemoryLockBackend {
    async fn set_nx_px(&self, key: &str, value: &str, ttl_ms: u64) -> FlowResult<bool> {
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries.get(key) {
            if !expired(existing) {
                return Ok(false);
            }
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + std::time::Duration::from_millis(ttl_ms),
            },
        );
        Ok(true)
    }

    async fn del_if_eq(&self, key: &str, value: &str) -> FlowResult<bool> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if !expired(entry) && entry.value == value => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn pexpire_if_eq(&self, key: &str, value: &str, ttl_ms: u64) -> FlowResult<bool> {
        let mut entries = self.entries.lock().await;
        match entries.get_mut(key) {
            Some(entry) if !expired(entry) && entry.value == value => {
                entry.expires_at = Instant::now() + std::time::Duration::from_millis(ttl_ms);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
