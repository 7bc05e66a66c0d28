pub mod memory;
pub mod redis;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FlowResult;
use crate::model::definition::Intent;

/// Evaluation jobs, one per active strategy per cadence boundary.
pub const STRATEGY_QUEUE: &str = "strategy-queue";
/// Asynchronous execution requests (same shape as the internal endpoint body).
pub const TRANSACTION_QUEUE: &str = "transaction-queue";
/// Reserved.
pub const DEFAULT_QUEUE: &str = "default";

/// Completed jobs kept per queue; older entries are dropped.
pub const COMPLETED_RING: usize = 100;

// ── Jobs ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "camelCase")]
pub enum JobPayload {
    #[serde(rename_all = "camelCase")]
    EvaluateStrategy { strategy_id: i64 },
    #[serde(rename_all = "camelCase")]
    ExecuteIntent {
        user_id: i64,
        intent: Intent,
        session_key_id: i64,
        idempotency_key: String,
    },
}

impl JobPayload {
    /// Strategy the job concerns, for duplicate detection.
    pub fn strategy_id(&self) -> Option<i64> {
        match self {
            JobPayload::EvaluateStrategy { strategy_id } => Some(*strategy_id),
            JobPayload::ExecuteIntent { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub payload: JobPayload,
    pub attempts: u32,
    pub state: JobState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub waiting: usize,
    pub delayed: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

// ── Broker contract ──────────────────────────────────────────────────

/// Queue broker seam. At-least-once delivery: a consumer crash between
/// `dequeue` and `complete` leaves the job in `active` until a sweeper or
/// operator requeues it, so consumers must be idempotent.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append a job; returns its id.
    async fn enqueue(&self, queue: &str, payload: JobPayload) -> FlowResult<String>;

    /// Append a job that becomes ready after `delay_ms`.
    async fn enqueue_delayed(
        &self,
        queue: &str,
        payload: JobPayload,
        delay_ms: u64,
    ) -> FlowResult<String>;

    /// Move the next ready job to `active`. `None` when the queue is empty.
    async fn dequeue(&self, queue: &str) -> FlowResult<Option<Job>>;

    /// Finish an active job. Completed ids are kept in a bounded ring.
    async fn complete(&self, queue: &str, job_id: &str) -> FlowResult<()>;

    /// Fail an active job. With `retry_in_ms` the job re-enters the queue as
    /// delayed with its attempt count bumped; otherwise it lands in the
    /// failed list (kept, not trimmed).
    async fn fail(
        &self,
        queue: &str,
        job_id: &str,
        error: &str,
        retry_in_ms: Option<u64>,
    ) -> FlowResult<()>;

    /// Snapshot of jobs currently in `active` state. Powers the evaluator's
    /// duplicate guard.
    async fn active_jobs(&self, queue: &str) -> FlowResult<Vec<Job>>;

    async fn counts(&self, queue: &str) -> FlowResult<QueueCounts>;
}
