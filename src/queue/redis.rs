use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use uuid::Uuid;

use crate::error::{FlowError, FlowResult};

use super::{COMPLETED_RING, Job, JobPayload, JobQueue, JobState, QueueCounts};

/// How long finished job records stay readable after leaving the ring.
const COMPLETED_JOB_TTL_MS: i64 = 3_600_000;

/// Redis-backed broker.
///
/// Layout per queue `q`:
/// - `queue:q:waiting`   — list of ready job ids (LPUSH / RPOP)
/// - `queue:q:delayed`   — zset of job ids scored by ready-at millis
/// - `queue:q:active`    — set of ids currently held by consumers
/// - `queue:q:completed` — list of finished ids, trimmed to the ring size
/// - `queue:q:failed`    — list of terminally failed ids, kept
/// - `queue:q:job:<id>`  — serialized `Job`
pub struct RedisQueue {
    conn: ConnectionManager,
}

impl RedisQueue {
    pub async fn connect(url: &str) -> FlowResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| FlowError::Upstream(format!("redis url: {e}")))?;
        let conn = client.get_connection_manager().await?;
        Ok(RedisQueue { conn })
    }

    fn key(queue: &str, part: &str) -> String {
        format!("queue:{queue}:{part}")
    }

    fn job_key(queue: &str, id: &str) -> String {
        format!("queue:{queue}:job:{id}")
    }

    async fn store_job(&self, queue: &str, job: &Job) -> FlowResult<()> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(job)?;
        let _: () = conn.set(Self::job_key(queue, &job.id), raw).await?;
        Ok(())
    }

    async fn load_job(&self, queue: &str, id: &str) -> FlowResult<Option<Job>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(Self::job_key(queue, id)).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Move delayed jobs whose ready time has passed into the waiting list.
    /// ZREM decides the winner when several workers promote concurrently.
    async fn promote_due(&self, queue: &str) -> FlowResult<()> {
        let mut conn = self.conn.clone();
        let delayed_key = Self::key(queue, "delayed");
        let now = chrono::Utc::now().timestamp_millis();

        let due: Vec<String> = conn
            .zrangebyscore_limit(&delayed_key, 0i64, now, 0, 100)
            .await?;
        for id in due {
            let removed: i64 = conn.zrem(&delayed_key, &id).await?;
            if removed == 0 {
                continue;
            }
            if let Some(mut job) = self.load_job(queue, &id).await? {
                job.state = JobState::Waiting;
                self.store_job(queue, &job).await?;
            }
            let _: () = conn.lpush(Self::key(queue, "waiting"), &id).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn enqueue(&self, queue: &str, payload: JobPayload) -> FlowResult<String> {
        let mut conn = self.conn.clone();
        let job = Job {
            id: Uuid::new_v4().to_string(),
            payload,
            attempts: 0,
            state: JobState::Waiting,
        };
        self.store_job(queue, &job).await?;
        let _: () = conn.lpush(Self::key(queue, "waiting"), &job.id).await?;
        Ok(job.id)
    }

    async fn enqueue_delayed(
        &self,
        queue: &str,
        payload: JobPayload,
        delay_ms: u64,
    ) -> FlowResult<String> {
        let mut conn = self.conn.clone();
        let job = Job {
            id: Uuid::new_v4().to_string(),
            payload,
            attempts: 0,
            state: JobState::Delayed,
        };
        self.store_job(queue, &job).await?;
        let ready_at = chrono::Utc::now().timestamp_millis() + delay_ms as i64;
        let _: () = conn
            .zadd(Self::key(queue, "delayed"), &job.id, ready_at)
            .await?;
        Ok(job.id)
    }

    async fn dequeue(&self, queue: &str) -> FlowResult<Option<Job>> {
        self.promote_due(queue).await?;

        let mut conn = self.conn.clone();
        let id: Option<String> = conn.rpop(Self::key(queue, "waiting"), None).await?;
        let Some(id) = id else {
            return Ok(None);
        };

        let Some(mut job) = self.load_job(queue, &id).await? else {
            // Orphaned id (record expired); skip it.
            return Ok(None);
        };
        job.state = JobState::Active;
        self.store_job(queue, &job).await?;
        let _: () = conn.sadd(Self::key(queue, "active"), &id).await?;
        Ok(Some(job))
    }

    async fn complete(&self, queue: &str, job_id: &str) -> FlowResult<()> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.srem(Self::key(queue, "active"), job_id).await?;
        if removed == 0 {
            return Err(FlowError::NotFound(format!("active job {job_id}")));
        }

        let mut job = self
            .load_job(queue, job_id)
            .await?
            .ok_or_else(|| FlowError::NotFound(format!("job record {job_id}")))?;
        job.state = JobState::Completed;
        self.store_job(queue, &job).await?;

        let completed_key = Self::key(queue, "completed");
        let _: () = conn.lpush(&completed_key, job_id).await?;
        let _: () = conn.ltrim(&completed_key, 0, COMPLETED_RING as isize - 1).await?;
        let _: () = conn
            .pexpire(Self::job_key(queue, job_id), COMPLETED_JOB_TTL_MS)
            .await?;
        Ok(())
    }

    async fn fail(
        &self,
        queue: &str,
        job_id: &str,
        error: &str,
        retry_in_ms: Option<u64>,
    ) -> FlowResult<()> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.srem(Self::key(queue, "active"), job_id).await?;
        if removed == 0 {
            return Err(FlowError::NotFound(format!("active job {job_id}")));
        }

        let mut job = self
            .load_job(queue, job_id)
            .await?
            .ok_or_else(|| FlowError::NotFound(format!("job record {job_id}")))?;
        job.attempts += 1;

        match retry_in_ms {
            Some(delay) => {
                job.state = JobState::Delayed;
                self.store_job(queue, &job).await?;
                let ready_at = chrono::Utc::now().timestamp_millis() + delay as i64;
                let _: () = conn
                    .zadd(Self::key(queue, "delayed"), job_id, ready_at)
                    .await?;
            }
            None => {
                tracing::warn!(queue, job_id, error, "job failed terminally");
                job.state = JobState::Failed;
                self.store_job(queue, &job).await?;
                let _: () = conn.lpush(Self::key(queue, "failed"), job_id).await?;
            }
        }
        Ok(())
    }

    async fn active_jobs(&self, queue: &str) -> FlowResult<Vec<Job>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.smembers(Self::key(queue, "active")).await?;
        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = self.load_job(queue, &id).await? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    async fn counts(&self, queue: &str) -> FlowResult<QueueCounts> {
        let mut conn = self.conn.clone();
        let waiting: usize = conn.llen(Self::key(queue, "waiting")).await?;
        let delayed: usize = conn.zcard(Self::key(queue, "delayed")).await?;
        let active: usize = conn.scard(Self::key(queue, "active")).await?;
        let completed: usize = conn.llen(Self::key(queue, "completed")).await?;
        let failed: usize = conn.llen(Self::key(queue, "failed")).await?;
        Ok(QueueCounts {
            waiting,
            delayed,
            active,
            completed,
            failed,
        })
    }
}
