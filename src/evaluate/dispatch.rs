use std::sync::Arc;

use async_trait::async_trait;

use crate::correlation;
use crate::error::{FlowError, FlowResult};
use crate::execute::{ExecuteRequest, ExecutionService};

/// The evaluator's path into the executor. HTTP in production; tests swap
/// in recorders or wire straight into an `ExecutionService`.
#[async_trait]
pub trait ExecuteDispatch: Send + Sync {
    async fn dispatch(&self, req: &ExecuteRequest) -> FlowResult<()>;
}

pub struct HttpDispatcher {
    client: reqwest::Client,
    base_url: String,
    service_token: String,
}

impl HttpDispatcher {
    pub fn new(
        base_url: &str,
        service_token: &str,
        timeout: std::time::Duration,
    ) -> FlowResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("intent-flow/0.1")
            .build()
            .map_err(|e| FlowError::Internal(format!("building dispatch client: {e}")))?;
        Ok(HttpDispatcher {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_token: service_token.to_string(),
        })
    }
}

#[async_trait]
impl ExecuteDispatch for HttpDispatcher {
    async fn dispatch(&self, req: &ExecuteRequest) -> FlowResult<()> {
        let correlation_id = correlation::new_id();
        let resp = self
            .client
            .post(format!("{}/transaction/execute/internal", self.base_url))
            .header("x-service-token", &self.service_token)
            .header(correlation::HEADER, &correlation_id)
            .json(req)
            .send()
            .await
            .map_err(|e| FlowError::Upstream(format!("executor unreachable: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        let message = format!("executor returned {status}: {body}");
        Err(match status.as_u16() {
            400 | 422 => FlowError::Validation(message),
            401 | 403 => FlowError::PermissionDenied(message),
            404 => FlowError::NotFound(message),
            409 => FlowError::Conflict(message),
            429 => FlowError::RateLimited(message),
            _ => FlowError::Upstream(message),
        })
    }
}

/// In-process dispatch for the single-process `run` mode: same semantics as
/// the HTTP path (a refused execution still counts as accepted — the refusal
/// lives in the transaction log).
pub struct ServiceDispatcher {
    service: Arc<ExecutionService>,
}

impl ServiceDispatcher {
    pub fn new(service: Arc<ExecutionService>) -> Self {
        ServiceDispatcher { service }
    }
}

#[async_trait]
impl ExecuteDispatch for ServiceDispatcher {
    async fn dispatch(&self, req: &ExecuteRequest) -> FlowResult<()> {
        self.service.execute(req.clone()).await.map(|_| ())
    }
}
