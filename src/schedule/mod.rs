use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::db::{self, Db};
use crate::error::FlowResult;
use crate::queue::{JobPayload, JobQueue, STRATEGY_QUEUE};

// ── Cadence parsing ──────────────────────────────────────────────────

/// Resolve a strategy's cadence. Accepts `@hourly` / `@daily`,
/// `every:<secs>`, and the common fixed-interval cron shapes
/// (`*/N * * * *`, `M * * * *`, `M H * * *`). Anything else falls back to
/// the poll interval.
pub fn cadence(schedule: Option<&str>, default: Duration) -> Duration {
    let Some(raw) = schedule.map(str::trim).filter(|s| !s.is_empty()) else {
        return default;
    };

    match parse_cadence(raw) {
        Some(duration) => duration,
        None => {
            tracing::warn!(schedule = raw, "unrecognised schedule, using poll interval");
            default
        }
    }
}

fn parse_cadence(raw: &str) -> Option<Duration> {
    match raw {
        "@hourly" => return Some(Duration::from_secs(3600)),
        "@daily" => return Some(Duration::from_secs(86400)),
        "@weekly" => return Some(Duration::from_secs(604800)),
        _ => {}
    }

    if let Some(secs) = raw.strip_prefix("every:") {
        let secs: u64 = secs.parse().ok()?;
        return (secs > 0).then(|| Duration::from_secs(secs));
    }

    let fields: Vec<&str> = raw.split_whitespace().collect();
    if fields.len() != 5 {
        return None;
    }
    let (minute, hour, rest) = (fields[0], fields[1], &fields[2..]);
    if rest.iter().any(|f| *f != "*") {
        return None;
    }

    if let Some(step) = minute.strip_prefix("*/") {
        let n: u64 = step.parse().ok()?;
        if n == 0 || hour != "*" {
            return None;
        }
        return Some(Duration::from_secs(n * 60));
    }
    if minute.parse::<u64>().is_ok() {
        if hour == "*" {
            return Some(Duration::from_secs(3600));
        }
        if hour.parse::<u64>().is_ok() {
            return Some(Duration::from_secs(86400));
        }
    }
    None
}

// ── Scheduler ────────────────────────────────────────────────────────

/// Enqueues one `EvaluateStrategy` job per active strategy at its cadence
/// boundary. Delivery is at-least-once; overlap suppression is the
/// evaluator's duplicate guard, not ours.
pub struct Scheduler {
    db: Db,
    queue: Arc<dyn JobQueue>,
    poll_interval: Duration,
    last_enqueued: HashMap<i64, Instant>,
}

impl Scheduler {
    pub fn new(db: Db, queue: Arc<dyn JobQueue>, poll_interval: Duration) -> Self {
        Scheduler {
            db,
            queue,
            poll_interval,
            last_enqueued: HashMap::new(),
        }
    }

    /// One pass over active strategies. Returns how many jobs were enqueued.
    pub async fn tick(&mut self) -> FlowResult<usize> {
        let strategies = db::strategies::active(&self.db).await?;
        let now = Instant::now();
        let mut enqueued = 0;

        // Deactivated strategies stop accruing ticks.
        let live: std::collections::HashSet<i64> = strategies.iter().map(|s| s.id).collect();
        self.last_enqueued.retain(|id, _| live.contains(id));

        for strategy in &strategies {
            let interval = cadence(strategy.schedule.as_deref(), self.poll_interval);
            let due = match self.last_enqueued.get(&strategy.id) {
                Some(last) => now.duration_since(*last) >= interval,
                None => true,
            };
            if !due {
                continue;
            }

            self.queue
                .enqueue(
                    STRATEGY_QUEUE,
                    JobPayload::EvaluateStrategy {
                        strategy_id: strategy.id,
                    },
                )
                .await?;
            self.last_enqueued.insert(strategy.id, now);
            enqueued += 1;
        }

        Ok(enqueued)
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(enqueued) if enqueued > 0 => {
                            tracing::debug!(enqueued, "scheduler tick");
                        }
                        Ok(_) => {}
                        Err(err) => {
                            tracing::warn!(%err, "scheduler tick failed");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("scheduler stopping");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cadence_shortcuts() {
        let default = Duration::from_secs(60);
        assert_eq!(cadence(Some("@hourly"), default), Duration::from_secs(3600));
        assert_eq!(cadence(Some("@daily"), default), Duration::from_secs(86400));
        assert_eq!(cadence(Some("every:30"), default), Duration::from_secs(30));
    }

    #[test]
    fn cadence_cron_shapes() {
        let default = Duration::from_secs(60);
        assert_eq!(
            cadence(Some("*/5 * * * *"), default),
            Duration::from_secs(300)
        );
        assert_eq!(
            cadence(Some("0 * * * *"), default),
            Duration::from_secs(3600)
        );
        assert_eq!(
            cadence(Some("30 4 * * *"), default),
            Duration::from_secs(86400)
        );
    }

    #[test]
    fn cadence_fallbacks() {
        let default = Duration::from_secs(60);
        assert_eq!(cadence(None, default), default);
        assert_eq!(cadence(Some(""), default), default);
        assert_eq!(cadence(Some("not a schedule"), default), default);
        assert_eq!(cadence(Some("*/0 * * * *"), default), default);
        assert_eq!(cadence(Some("every:0"), default), default);
        // Day-of-month restrictions are beyond the fixed-interval subset.
        assert_eq!(cadence(Some("0 0 1 * *"), default), default);
    }
}
