use async_trait::async_trait;
use redis::aio::ConnectionManager;

use crate::error::{FlowError, FlowResult};

use super::LockBackend;

/// Delete iff the stored value matches the caller's token.
const CHECK_AND_DEL: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
"#;

/// Refresh expiry iff the stored value matches the caller's token.
const CHECK_AND_PEXPIRE: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('pexpire', KEYS[1], ARGV[2])
else
    return 0
end
"#;

pub struct RedisLockBackend {
    conn: ConnectionManager,
}

impl RedisLockBackend {
    pub async fn connect(url: &str) -> FlowResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| FlowError::Upstream(format!("redis url: {e}")))?;
        let conn = client.get_connection_manager().await?;
        Ok(RedisLockBackend { conn })
    }

    pub fn from_connection(conn: ConnectionManager) -> Self {
        RedisLockBackend { conn }
    }
}

#[async_trait]
impl LockBackend for RedisLockBackend {
    async fn set_nx_px(&self, key: &str, value: &str, ttl_ms: u64) -> FlowResult<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn del_if_eq(&self, key: &str, value: &str) -> FlowResult<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = redis::Script::new(CHECK_AND_DEL)
            .key(key)
            .arg(value)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn pexpire_if_eq(&self, key: &str, value: &str, ttl_ms: u64) -> FlowResult<bool> {
        let mut conn = self.conn.clone();
        let refreshed: i64 = redis::Script::new(CHECK_AND_PEXPIRE)
            .key(key)
            .arg(value)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(refreshed == 1)
    }
}
