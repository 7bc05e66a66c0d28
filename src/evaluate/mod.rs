pub mod dispatch;
pub mod trigger;

use std::sync::Arc;

use serde_json::json;
use tokio::sync::watch;

use crate::db::tx_logs::NewTransactionLog;
use crate::db::{self, Db};
use crate::error::{FlowError, FlowResult};
use crate::execute::ExecuteRequest;
use crate::queue::{Job, JobPayload, JobQueue, STRATEGY_QUEUE};
use crate::model::entity::TxStatus;

use dispatch::ExecuteDispatch;

/// Broker-level retry schedule for jobs that die on internal errors.
const JOB_MAX_ATTEMPTS: u32 = 3;
const JOB_RETRY_BACKOFF_MS: u64 = 2_000;

/// What happened to one evaluation job. Every arm short of `Dispatched`
/// ends the job without touching the executor.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalOutcome {
    /// Another worker already holds an active job for this strategy.
    DuplicateSkipped,
    /// Strategy deleted or deactivated since the job was enqueued.
    StrategyGone,
    /// Legacy flat definition — recorded as `skipped`, never dispatched.
    LegacySkipped,
    NotTriggered,
    /// Trigger fired but the definition names no session key.
    MissingSessionKey,
    Dispatched,
    /// Retries exhausted or a terminal dispatch error.
    DispatchFailed(String),
}

pub struct Evaluator {
    db: Db,
    queue: Arc<dyn JobQueue>,
    dispatcher: Arc<dyn ExecuteDispatch>,
    max_retries: u32,
    backoff_ms: u64,
    trend_max_age_secs: u64,
}

impl Evaluator {
    pub fn new(
        db: Db,
        queue: Arc<dyn JobQueue>,
        dispatcher: Arc<dyn ExecuteDispatch>,
        max_retries: u32,
        backoff_ms: u64,
        trend_max_age_secs: u64,
    ) -> Self {
        Evaluator {
            db,
            queue,
            dispatcher,
            max_retries: max_retries.max(1),
            backoff_ms,
            trend_max_age_secs,
        }
    }

    /// Run one `EvaluateStrategy` job through guard → load → trigger →
    /// dispatch. Returns the outcome; `Err` means an internal failure the
    /// broker should re-deliver.
    pub async fn process(&self, job: &Job) -> FlowResult<EvalOutcome> {
        let JobPayload::EvaluateStrategy { strategy_id } = job.payload else {
            return Err(FlowError::Validation(
                "strategy-queue job without a strategy id".into(),
            ));
        };

        // Active-duplicate guard: the broker's own job state is the only
        // coordination needed to keep one evaluation per strategy in flight.
        let peers = self.queue.active_jobs(STRATEGY_QUEUE).await?;
        let duplicate = peers
            .iter()
            .any(|peer| peer.id != job.id && peer.payload.strategy_id() == Some(strategy_id));
        if duplicate {
            tracing::debug!(strategy_id, job_id = %job.id, "active duplicate, skipping");
            return Ok(EvalOutcome::DuplicateSkipped);
        }

        let Some(strategy) = db::strategies::get(&self.db, strategy_id).await? else {
            return Ok(EvalOutcome::StrategyGone);
        };
        if !strategy.is_active {
            return Ok(EvalOutcome::StrategyGone);
        }

        if strategy.definition.is_legacy() {
            tracing::info!(strategy_id, "legacy definition, skipping dispatch");
            db::tx_logs::insert(
                &self.db,
                NewTransactionLog {
                    user_id: strategy.user_id,
                    strategy_id: Some(strategy.id),
                    description: "legacy definition skipped".into(),
                    tx_hash: None,
                    chain: Some(strategy.definition.trigger.chain().to_string()),
                    status: TxStatus::Skipped,
                    details: json!({ "reason": "legacy-definition", "jobId": job.id }),
                },
            )
            .await?;
            return Ok(EvalOutcome::LegacySkipped);
        }

        let met = trigger::evaluate(
            &self.db,
            &strategy.definition.trigger,
            self.trend_max_age_secs,
        )
        .await?;
        if !met {
            return Ok(EvalOutcome::NotTriggered);
        }

        let Some(session_key_id) = strategy.definition.session_key_id else {
            tracing::warn!(strategy_id, "trigger met but no session key configured");
            return Ok(EvalOutcome::MissingSessionKey);
        };

        let req = ExecuteRequest {
            user_id: strategy.user_id,
            intent: strategy.definition.intent.clone(),
            session_key_id,
            idempotency_key: format!("strategy:{}:job:{}", strategy.id, job.id),
        };

        let mut last_err: Option<FlowError> = None;
        for attempt in 0..self.max_retries {
            match self.dispatcher.dispatch(&req).await {
                Ok(()) => {
                    tracing::info!(strategy_id, attempt, "intent dispatched");
                    if !strategy.definition.repeats() {
                        db::strategies::set_active(&self.db, strategy.id, false).await?;
                        tracing::info!(strategy_id, "one-shot strategy deactivated");
                    }
                    return Ok(EvalOutcome::Dispatched);
                }
                Err(err) => {
                    let retryable = err.is_retryable();
                    tracing::warn!(strategy_id, attempt, %err, retryable, "dispatch attempt failed");
                    last_err = Some(err);
                    if !retryable || attempt + 1 == self.max_retries {
                        break;
                    }
                    let delay = self.backoff_ms * 2u64.pow(attempt);
                    tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                }
            }
        }

        // The strategy stays active; the next schedule tick re-attempts.
        Ok(EvalOutcome::DispatchFailed(
            last_err.map(|e| e.to_string()).unwrap_or_default(),
        ))
    }

    /// Consume `strategy-queue` until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                job = next_job(self.queue.as_ref()) => {
                    let Some(job) = job else { continue };
                    match self.process(&job).await {
                        Ok(outcome) => {
                            tracing::debug!(job_id = %job.id, ?outcome, "evaluation finished");
                            if let Err(err) = self.queue.complete(STRATEGY_QUEUE, &job.id).await {
                                tracing::warn!(job_id = %job.id, %err, "job complete failed");
                            }
                        }
                        Err(err) => {
                            let retry = (job.attempts + 1 < JOB_MAX_ATTEMPTS)
                                .then(|| JOB_RETRY_BACKOFF_MS * 2u64.pow(job.attempts));
                            tracing::warn!(job_id = %job.id, %err, retry_in_ms = ?retry, "evaluation job errored");
                            if let Err(err) = self
                                .queue
                                .fail(STRATEGY_QUEUE, &job.id, &err.to_string(), retry)
                                .await
                            {
                                tracing::warn!(job_id = %job.id, %err, "job fail failed");
                            }
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("evaluator stopping");
                        break;
                    }
                }
            }
        }
    }
}

async fn next_job(queue: &dyn JobQueue) -> Option<Job> {
    match queue.dequeue(STRATEGY_QUEUE).await {
        Ok(Some(job)) => Some(job),
        Ok(None) => {
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            None
        }
        Err(err) => {
            tracing::warn!(%err, "strategy-queue dequeue failed");
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            None
        }
    }
}
