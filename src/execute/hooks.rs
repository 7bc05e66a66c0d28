use async_trait::async_trait;

use crate::error::FlowResult;

use super::ExecuteRequest;

/// Outcome of a pre-dispatch screen.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Allow,
    Deny { reason: String },
}

/// Risk scoring collaborator. A veto records a failed log and ends the
/// attempt without reaching the signer.
#[async_trait]
pub trait RiskHook: Send + Sync {
    async fn score(&self, req: &ExecuteRequest) -> FlowResult<Verdict>;
}

/// Compliance screening collaborator.
#[async_trait]
pub trait ComplianceHook: Send + Sync {
    async fn screen(&self, req: &ExecuteRequest) -> FlowResult<Verdict>;
}

/// Default stand-in when no external engine is wired.
pub struct AllowAll;

#[async_trait]
impl RiskHook for AllowAll {
    async fn score(&self, _req: &ExecuteRequest) -> FlowResult<Verdict> {
        Ok(Verdict::Allow)
    }
}

#[async_trait]
impl ComplianceHook for AllowAll {
    async fn screen(&self, _req: &ExecuteRequest) -> FlowResult<Verdict> {
        Ok(Verdict::Allow)
    }
}
