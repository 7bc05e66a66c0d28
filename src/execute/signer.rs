use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{FlowError, FlowResult};
use crate::model::definition::Intent;

use super::keystore::SessionKeyMaterial;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignerStatus {
    Pending,
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerReceipt {
    pub status: SignerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The abstract signer/bundler: takes a normalised intent plus session-key
/// material and submits the signed transaction to the right chain.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn submit(
        &self,
        intent: &Intent,
        key: &SessionKeyMaterial,
    ) -> FlowResult<SignerReceipt>;
}

// ── HTTP signer sub-service ──────────────────────────────────────────

pub struct HttpSigner {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSigner {
    pub fn new(base_url: &str, timeout: std::time::Duration) -> FlowResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("intent-flow/0.1")
            .build()
            .map_err(|e| FlowError::Internal(format!("building signer client: {e}")))?;
        Ok(HttpSigner {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Signer for HttpSigner {
    async fn submit(
        &self,
        intent: &Intent,
        key: &SessionKeyMaterial,
    ) -> FlowResult<SignerReceipt> {
        let resp = self
            .client
            .post(format!("{}/sign", self.base_url))
            .json(&json!({ "intent": intent, "sessionKey": key }))
            .send()
            .await
            .map_err(|e| FlowError::signer(format!("signer unreachable: {e}"), true))?;

        let status = resp.status();
        if status.is_server_error() {
            return Err(FlowError::signer(format!("signer returned {status}"), true));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FlowError::signer(
                format!("signer rejected intent ({status}): {body}"),
                false,
            ));
        }

        let receipt: SignerReceipt = resp
            .json()
            .await
            .map_err(|e| FlowError::signer(format!("malformed signer response: {e}"), false))?;
        Ok(receipt)
    }
}
