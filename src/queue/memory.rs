use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{FlowError, FlowResult};

use super::{COMPLETED_RING, Job, JobPayload, JobQueue, JobState, QueueCounts};

/// In-process broker twin. Same semantics as the Redis broker, minus
/// durability — used by tests and the single-process `run` mode.
#[derive(Default)]
pub struct MemoryQueue {
    inner: Mutex<HashMap<String, QueueState>>,
}

#[derive(Default)]
struct QueueState {
    waiting: VecDeque<Job>,
    /// `(ready_at_ms, job)`, unsorted; promotion scans for due entries.
    delayed: Vec<(i64, Job)>,
    active: HashMap<String, Job>,
    completed: VecDeque<Job>,
    failed: Vec<Job>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, queue: &str, payload: JobPayload) -> FlowResult<String> {
        let mut inner = self.inner.lock().await;
        let state = inner.entry(queue.to_string()).or_default();
        let id = Uuid::new_v4().to_string();
        state.waiting.push_back(Job {
            id: id.clone(),
            payload,
            attempts: 0,
            state: JobState::Waiting,
        });
        Ok(id)
    }

    async fn enqueue_delayed(
        &self,
        queue: &str,
        payload: JobPayload,
        delay_ms: u64,
    ) -> FlowResult<String> {
        let mut inner = self.inner.lock().await;
        let state = inner.entry(queue.to_string()).or_default();
        let id = Uuid::new_v4().to_string();
        state.delayed.push((
            now_ms() + delay_ms as i64,
            Job {
                id: id.clone(),
                payload,
                attempts: 0,
                state: JobState::Delayed,
            },
        ));
        Ok(id)
    }

    async fn dequeue(&self, queue: &str) -> FlowResult<Option<Job>> {
        let mut inner = self.inner.lock().await;
        let state = inner.entry(queue.to_string()).or_default();

        // Promote due delayed jobs, oldest ready-time first.
        let now = now_ms();
        state.delayed.sort_by_key(|(ready, _)| *ready);
        while state
            .delayed
            .first()
            .is_some_and(|(ready, _)| *ready <= now)
        {
            let (_, mut job) = state.delayed.remove(0);
            job.state = JobState::Waiting;
            state.waiting.push_back(job);
        }

        match state.waiting.pop_front() {
            Some(mut job) => {
                job.state = JobState::Active;
                state.active.insert(job.id.clone(), job.clone());
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn complete(&self, queue: &str, job_id: &str) -> FlowResult<()> {
        let mut inner = self.inner.lock().await;
        let state = inner.entry(queue.to_string()).or_default();
        let mut job = state
            .active
            .remove(job_id)
            .ok_or_else(|| FlowError::NotFound(format!("active job {job_id}")))?;
        job.state = JobState::Completed;
        state.completed.push_front(job);
        state.completed.truncate(COMPLETED_RING);
        Ok(())
    }

    async fn fail(
        &self,
        queue: &str,
        job_id: &str,
        _error: &str,
        retry_in_ms: Option<u64>,
    ) -> FlowResult<()> {
        let mut inner = self.inner.lock().await;
        let state = inner.entry(queue.to_string()).or_default();
        let mut job = state
            .active
            .remove(job_id)
            .ok_or_else(|| FlowError::NotFound(format!("active job {job_id}")))?;
        job.attempts += 1;
        match retry_in_ms {
            Some(delay) => {
                job.state = JobState::Delayed;
                state.delayed.push((now_ms() + delay as i64, job));
            }
            None => {
                job.state = JobState::Failed;
                state.failed.push(job);
            }
        }
        Ok(())
    }

    async fn active_jobs(&self, queue: &str) -> FlowResult<Vec<Job>> {
        let mut inner = self.inner.lock().await;
        let state = inner.entry(queue.to_string()).or_default();
        Ok(state.active.values().cloned().collect())
    }

    async fn counts(&self, queue: &str) -> FlowResult<QueueCounts> {
        let mut inner = self.inner.lock().await;
        let state = inner.entry(queue.to_string()).or_default();
        Ok(QueueCounts {
            waiting: state.waiting.len(),
            delayed: state.delayed.len(),
            active: state.active.len(),
            completed: state.completed.len(),
            failed: state.failed.len(),
        })
    }
}
