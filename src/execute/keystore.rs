use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{FlowError, FlowResult};

/// Signing material for one session key. Never persisted by this service —
/// it exists in memory only between vault read and signer call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKeyMaterial {
    pub public_key: String,
    pub private_key: String,
}

/// External credential vault, addressed by session-key id.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn get(&self, session_key_id: i64) -> FlowResult<Option<SessionKeyMaterial>>;
    async fn put(&self, session_key_id: i64, material: &SessionKeyMaterial) -> FlowResult<()>;
    async fn delete(&self, session_key_id: i64) -> FlowResult<()>;
}

// ── Vault KV v2 client ───────────────────────────────────────────────

pub struct VaultKeyStore {
    client: reqwest::Client,
    addr: String,
    token: String,
    mount: String,
}

impl VaultKeyStore {
    pub fn new(addr: &str, token: &str, mount: &str) -> FlowResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .user_agent("intent-flow/0.1")
            .build()
            .map_err(|e| FlowError::Internal(format!("building vault client: {e}")))?;
        Ok(VaultKeyStore {
            client,
            addr: addr.trim_end_matches('/').to_string(),
            token: token.to_string(),
            mount: mount.to_string(),
        })
    }

    fn data_url(&self, id: i64) -> String {
        format!("{}/v1/{}/data/{id}", self.addr, self.mount)
    }
}

#[derive(Debug, Deserialize)]
struct VaultReadResponse {
    data: VaultReadData,
}

#[derive(Debug, Deserialize)]
struct VaultReadData {
    data: SessionKeyMaterial,
}

#[async_trait]
impl KeyStore for VaultKeyStore {
    async fn get(&self, session_key_id: i64) -> FlowResult<Option<SessionKeyMaterial>> {
        let resp = self
            .client
            .get(self.data_url(session_key_id))
            .header("X-Vault-Token", &self.token)
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = resp
            .error_for_status()
            .map_err(|e| FlowError::Upstream(format!("vault read: {e}")))?;
        let body: VaultReadResponse = resp.json().await?;
        Ok(Some(body.data.data))
    }

    async fn put(&self, session_key_id: i64, material: &SessionKeyMaterial) -> FlowResult<()> {
        self.client
            .post(self.data_url(session_key_id))
            .header("X-Vault-Token", &self.token)
            .json(&json!({ "data": material }))
            .send()
            .await?
            .error_for_status()
            .map_err(|e| FlowError::Upstream(format!("vault write: {e}")))?;
        Ok(())
    }

    async fn delete(&self, session_key_id: i64) -> FlowResult<()> {
        let url = format!("{}/v1/{}/metadata/{session_key_id}", self.addr, self.mount);
        self.client
            .delete(url)
            .header("X-Vault-Token", &self.token)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| FlowError::Upstream(format!("vault delete: {e}")))?;
        Ok(())
    }
}
