pub mod breaker;
pub mod chain_client;
pub mod hooks;
pub mod keystore;
pub mod signer;

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::watch;

use crate::db::tx_logs::NewTransactionLog;
use crate::db::{self, Db};
use crate::error::{FlowError, FlowResult};
use crate::lock::LockManager;
use crate::model::chain::Chain;
use crate::model::definition::Intent;
use crate::model::entity::{TransactionLog, TxStatus};
use crate::oracle::OracleValidator;
use crate::queue::{JobPayload, JobQueue, TRANSACTION_QUEUE};

use breaker::CircuitBreaker;
use chain_client::ChainReader;
use hooks::{AllowAll, ComplianceHook, RiskHook, Verdict};
use keystore::{KeyStore, SessionKeyMaterial};
use signer::{Signer, SignerStatus};

/// How long an executor waits for the per-session-key lock before telling
/// the caller to come back.
const LOCK_WAIT_MS: u64 = 5_000;

/// Body of the internal execute endpoint and the `transaction-queue` job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub user_id: i64,
    pub intent: Intent,
    pub session_key_id: i64,
    pub idempotency_key: String,
}

/// Extract the strategy id from a `strategy:<id>:job:<jobId>` key.
pub fn strategy_id_from_key(idempotency_key: &str) -> Option<i64> {
    let rest = idempotency_key.strip_prefix("strategy:")?;
    let (id, _) = rest.split_once(':')?;
    id.parse().ok()
}

// ── Service ──────────────────────────────────────────────────────────

/// The execution coordinator: idempotency, the per-session-key lock, key
/// resolution, screening hooks, oracle consensus, amount normalisation,
/// allowance preflight, and finally the signer.
pub struct ExecutionService {
    db: Db,
    locks: LockManager,
    oracle: Arc<OracleValidator>,
    keystore: Arc<dyn KeyStore>,
    chain: Arc<dyn ChainReader>,
    signer: Arc<dyn Signer>,
    risk: Arc<dyn RiskHook>,
    compliance: Arc<dyn ComplianceHook>,
    breaker: CircuitBreaker,
    lock_ttl_ms: u64,
}

impl ExecutionService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Db,
        locks: LockManager,
        oracle: Arc<OracleValidator>,
        keystore: Arc<dyn KeyStore>,
        chain: Arc<dyn ChainReader>,
        signer: Arc<dyn Signer>,
        lock_ttl_ms: u64,
        breaker_threshold: u32,
    ) -> Self {
        ExecutionService {
            db,
            locks,
            oracle,
            keystore,
            chain,
            signer,
            risk: Arc::new(AllowAll),
            compliance: Arc::new(AllowAll),
            breaker: CircuitBreaker::new(breaker_threshold),
            lock_ttl_ms,
        }
    }

    /// Wire external risk/compliance engines in place of the allow-all stubs.
    pub fn with_hooks(
        mut self,
        risk: Arc<dyn RiskHook>,
        compliance: Arc<dyn ComplianceHook>,
    ) -> Self {
        self.risk = risk;
        self.compliance = compliance;
        self
    }

    /// Run one execution request to a `TransactionLog`.
    ///
    /// Retryable conditions (lock busy, upstream blips, transient signer
    /// errors) surface as `Err` without a log so the caller's retry can
    /// succeed. Deterministic refusals (vetoes, oracle failure, bad amounts)
    /// are recorded as `failed` logs and returned as `Ok`.
    pub async fn execute(&self, req: ExecuteRequest) -> FlowResult<TransactionLog> {
        if let Some(existing) =
            db::tx_logs::find_by_idempotency_key(&self.db, &req.idempotency_key).await?
        {
            tracing::info!(
                idempotency_key = %req.idempotency_key,
                log_id = existing.id,
                "duplicate execution request, returning prior log"
            );
            return Ok(existing);
        }

        let lock_key = format!("strategy-execute:{}", req.session_key_id);
        let Some(token) = self
            .locks
            .wait_for(&lock_key, LOCK_WAIT_MS, self.lock_ttl_ms)
            .await?
        else {
            return Err(FlowError::RateLimited(format!(
                "execution lock busy for session key {}",
                req.session_key_id
            )));
        };

        let result = self.execute_locked(&req).await;

        if let Err(err) = self.locks.release(&lock_key, &token).await {
            tracing::warn!(lock_key, %err, "lock release failed; ttl will reap it");
        }
        result
    }

    async fn execute_locked(&self, req: &ExecuteRequest) -> FlowResult<TransactionLog> {
        // A racing duplicate may have written while we waited on the lock.
        if let Some(existing) =
            db::tx_logs::find_by_idempotency_key(&self.db, &req.idempotency_key).await?
        {
            return Ok(existing);
        }

        // Session key scope.
        let key = db::session_keys::get(&self.db, req.session_key_id)
            .await?
            .ok_or_else(|| FlowError::NotFound(format!("session key {}", req.session_key_id)))?;
        if key.user_id != req.user_id {
            return Err(FlowError::PermissionDenied(
                "session key belongs to another user".into(),
            ));
        }
        if !key.is_usable(Utc::now()) {
            return Err(FlowError::PermissionDenied(
                "session key is inactive or expired".into(),
            ));
        }
        let action = req.intent.action();
        if !key.permissions.allows_action(action) {
            return Err(FlowError::PermissionDenied(format!(
                "action '{}' is outside the session key scope",
                req.intent.type_name()
            )));
        }
        for chain in req.intent.chains() {
            if !key.permissions.allows_chain(chain) {
                return Err(FlowError::PermissionDenied(format!(
                    "chain '{chain}' is outside the session key scope"
                )));
            }
        }

        // Screening hooks.
        if let Verdict::Deny { reason } = self.risk.score(req).await? {
            return self
                .record_failure(req, format!("risk veto: {reason}"), json!({}))
                .await;
        }
        if let Verdict::Deny { reason } = self.compliance.screen(req).await? {
            return self
                .record_failure(req, format!("compliance veto: {reason}"), json!({}))
                .await;
        }

        // Oracle consensus for price-sensitive intents.
        for (chain, token) in req.intent.oracle_targets() {
            let consensus = self.oracle.validate(&chain, &token).await?;
            if !consensus.ok {
                let reason = consensus
                    .reason
                    .clone()
                    .unwrap_or_else(|| "consensus failed".into());
                return self
                    .record_failure(
                        req,
                        format!("oracle check failed for {token} on {chain}: {reason}"),
                        json!({ "oracle": consensus }),
                    )
                    .await;
            }
        }

        // Percentage amounts resolve against the live wallet balance.
        let intent = match self.normalise_amount(req).await? {
            Ok(intent) => intent,
            Err(reason) => return self.record_failure(req, reason, json!({})).await,
        };

        let material = self
            .keystore
            .get(req.session_key_id)
            .await?
            .ok_or_else(|| {
                FlowError::NotFound(format!(
                    "no key material for session key {}",
                    req.session_key_id
                ))
            })?;

        if let Err(err) = self.allowance_preflight(req, &intent, &material).await {
            if err.is_retryable() {
                return Err(err);
            }
            return self
                .record_failure(req, format!("allowance preflight failed: {err}"), json!({}))
                .await;
        }

        // Sign.
        self.breaker.check()?;
        let receipt = match self.signer.submit(&intent, &material).await {
            Ok(receipt) => {
                self.breaker.record_success();
                receipt
            }
            Err(err) => {
                self.breaker.record_failure();
                if err.is_retryable() {
                    return Err(err);
                }
                return self
                    .record_failure(req, format!("signer rejected intent: {err}"), json!({}))
                    .await;
            }
        };

        let status = match receipt.status {
            SignerStatus::Pending => TxStatus::Pending,
            SignerStatus::Success => TxStatus::Success,
            SignerStatus::Failed => TxStatus::Failed,
        };
        let description = receipt
            .description
            .clone()
            .unwrap_or_else(|| format!("{} intent dispatched", intent.type_name()));

        db::tx_logs::insert(
            &self.db,
            NewTransactionLog {
                user_id: req.user_id,
                strategy_id: strategy_id_from_key(&req.idempotency_key),
                description,
                tx_hash: receipt.tx_hash.clone(),
                chain: primary_chain(&intent),
                status,
                details: json!({
                    "idempotencyKey": req.idempotency_key,
                    "kind": "execution",
                    "intentType": intent.type_name(),
                }),
            },
        )
        .await
    }

    /// Resolve percentage amounts to absolute ones. The inner `Err` carries
    /// a deterministic business failure to record; transport errors bubble
    /// out as `FlowError` so the caller's retry can resolve them.
    async fn normalise_amount(&self, req: &ExecuteRequest) -> FlowResult<Result<Intent, String>> {
        let mut intent = req.intent.clone();

        if let Intent::Swap(m) | Intent::Bridge(m) = &mut intent {
            if m.amount_in_is_percentage.unwrap_or(false) {
                let Some(wallet) =
                    db::wallets::for_user_chain(&self.db, req.user_id, &m.from_chain).await?
                else {
                    return Ok(Err(format!(
                        "no wallet for user {} on chain {}",
                        req.user_id, m.from_chain
                    )));
                };

                let balance = self
                    .chain
                    .token_balance(&m.from_chain, &m.from_token, &wallet.owner_address)
                    .await?;
                let percent = m.from_amount;
                let absolute = (balance * percent / 100.0).floor();
                if absolute <= 0.0 {
                    return Ok(Err(format!(
                        "{percent}% of {} {} balance resolves to zero",
                        m.from_chain, m.from_token
                    )));
                }
                m.from_amount = absolute;
                m.amount_in_is_percentage = Some(false);
            }
        }

        Ok(Ok(intent))
    }

    /// ERC-20 movement intents need the router approved before the main
    /// transaction. The approval is its own signer submission and its own
    /// log row; both rows share `details.idempotencyKey`.
    async fn allowance_preflight(
        &self,
        req: &ExecuteRequest,
        intent: &Intent,
        material: &SessionKeyMaterial,
    ) -> FlowResult<()> {
        let (Intent::Swap(m) | Intent::Bridge(m)) = intent else {
            return Ok(());
        };
        if !Chain::from_name(&m.from_chain).is_evm() || !m.from_token.starts_with("0x") {
            return Ok(());
        }
        let Some(spender) = self.chain.default_spender(&m.from_chain) else {
            return Ok(());
        };

        let allowance = self
            .chain
            .allowance(&m.from_chain, &m.from_token, &m.user_address, &spender)
            .await?;
        if allowance >= m.from_amount {
            return Ok(());
        }

        tracing::info!(
            chain = %m.from_chain,
            token = %m.from_token,
            allowance,
            needed = m.from_amount,
            "allowance insufficient, submitting approval"
        );

        let approval = Intent::Custom {
            name: "erc20-approve".into(),
            parameters: json!({
                "chain": m.from_chain,
                "token": m.from_token,
                "owner": m.user_address,
                "spender": spender,
                "amount": m.from_amount,
            }),
        };

        self.breaker.check()?;
        let receipt = match self.signer.submit(&approval, material).await {
            Ok(receipt) => {
                self.breaker.record_success();
                receipt
            }
            Err(err) => {
                self.breaker.record_failure();
                return Err(err);
            }
        };

        let approved = receipt.status != SignerStatus::Failed;
        db::tx_logs::insert(
            &self.db,
            NewTransactionLog {
                user_id: req.user_id,
                strategy_id: strategy_id_from_key(&req.idempotency_key),
                description: format!("approval for {} on {}", m.from_token, m.from_chain),
                tx_hash: receipt.tx_hash.clone(),
                chain: Some(m.from_chain.clone()),
                status: if approved {
                    TxStatus::Success
                } else {
                    TxStatus::Failed
                },
                details: json!({
                    "idempotencyKey": req.idempotency_key,
                    "kind": "approval",
                    "spender": spender,
                }),
            },
        )
        .await?;

        if !approved {
            return Err(FlowError::signer(
                receipt
                    .description
                    .unwrap_or_else(|| "approval transaction failed".into()),
                false,
            ));
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        req: &ExecuteRequest,
        description: String,
        mut extra: Value,
    ) -> FlowResult<TransactionLog> {
        tracing::info!(
            idempotency_key = %req.idempotency_key,
            %description,
            "execution refused"
        );

        let details = {
            let base = json!({
                "idempotencyKey": req.idempotency_key,
                "kind": "execution",
                "intentType": req.intent.type_name(),
            });
            if let (Some(base_map), Some(extra_map)) = (base.as_object(), extra.as_object_mut()) {
                let mut merged = base_map.clone();
                merged.append(extra_map);
                Value::Object(merged)
            } else {
                base
            }
        };

        db::tx_logs::insert(
            &self.db,
            NewTransactionLog {
                user_id: req.user_id,
                strategy_id: strategy_id_from_key(&req.idempotency_key),
                description,
                tx_hash: None,
                chain: primary_chain(&req.intent),
                status: TxStatus::Failed,
                details,
            },
        )
        .await
    }
}

fn primary_chain(intent: &Intent) -> Option<String> {
    intent.chains().first().map(|c| c.to_string())
}

// ── Queue worker ─────────────────────────────────────────────────────

/// Retry schedule for queue-driven executions.
const WORKER_MAX_ATTEMPTS: u32 = 5;
const WORKER_BACKOFF_MS: u64 = 1_000;

/// Consume `transaction-queue` jobs into the execution service.
pub async fn run_queue_worker(
    service: Arc<ExecutionService>,
    queue: Arc<dyn JobQueue>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            job = next_job(queue.as_ref()) => {
                let Some(job) = job else { continue };
                let JobPayload::ExecuteIntent { user_id, intent, session_key_id, idempotency_key } = job.payload.clone() else {
                    tracing::warn!(job_id = %job.id, "unexpected payload on transaction-queue");
                    let _ = queue.complete(TRANSACTION_QUEUE, &job.id).await;
                    continue;
                };

                let req = ExecuteRequest { user_id, intent, session_key_id, idempotency_key };
                match service.execute(req).await {
                    Ok(log) => {
                        tracing::info!(job_id = %job.id, log_id = log.id, status = log.status.as_str(), "execution job finished");
                        if let Err(err) = queue.complete(TRANSACTION_QUEUE, &job.id).await {
                            tracing::warn!(job_id = %job.id, %err, "job complete failed");
                        }
                    }
                    Err(err) => {
                        let retry = (err.is_retryable() && job.attempts + 1 < WORKER_MAX_ATTEMPTS)
                            .then(|| WORKER_BACKOFF_MS * 2u64.pow(job.attempts));
                        tracing::warn!(job_id = %job.id, %err, retry_in_ms = ?retry, "execution job failed");
                        if let Err(err) = queue.fail(TRANSACTION_QUEUE, &job.id, &err.to_string(), retry).await {
                            tracing::warn!(job_id = %job.id, %err, "job fail failed");
                        }
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("transaction worker stopping");
                    break;
                }
            }
        }
    }
}

/// Poll the queue, idling briefly when empty.
async fn next_job(queue: &dyn JobQueue) -> Option<crate::queue::Job> {
    match queue.dequeue(TRANSACTION_QUEUE).await {
        Ok(Some(job)) => Some(job),
        Ok(None) => {
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            None
        }
        Err(err) => {
            tracing::warn!(%err, "transaction-queue dequeue failed");
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_id_parses_from_key() {
        assert_eq!(strategy_id_from_key("strategy:42:job:abc"), Some(42));
        assert_eq!(strategy_id_from_key("strategy:42"), None);
        assert_eq!(strategy_id_from_key("job:42:strategy:7"), None);
        assert_eq!(strategy_id_from_key("strategy:x:job:abc"), None);
    }
}
