use std::sync::Arc;
use std::time::Duration;

use intent_flow::db;
use intent_flow::model::definition::parse_definition;
use intent_flow::queue::memory::MemoryQueue;
use intent_flow::queue::{JobPayload, JobQueue, JobState, STRATEGY_QUEUE};
use intent_flow::schedule::Scheduler;
use serde_json::json;

fn eval_job(strategy_id: i64) -> JobPayload {
    JobPayload::EvaluateStrategy { strategy_id }
}

// ── Broker semantics ────────────────────────────────────────────────

#[tokio::test]
async fn fifo_dequeue_and_active_introspection() {
    let queue = MemoryQueue::new();

    let first = queue.enqueue("q", eval_job(1)).await.unwrap();
    let second = queue.enqueue("q", eval_job(2)).await.unwrap();

    let job = queue.dequeue("q").await.unwrap().unwrap();
    assert_eq!(job.id, first);
    assert_eq!(job.state, JobState::Active);

    let active = queue.active_jobs("q").await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].payload.strategy_id(), Some(1));

    let job2 = queue.dequeue("q").await.unwrap().unwrap();
    assert_eq!(job2.id, second);
    assert_eq!(queue.active_jobs("q").await.unwrap().len(), 2);

    assert!(queue.dequeue("q").await.unwrap().is_none());
}

#[tokio::test]
async fn complete_trims_to_ring() {
    let queue = MemoryQueue::new();

    for i in 0..150 {
        let id = queue.enqueue("q", eval_job(i)).await.unwrap();
        queue.dequeue("q").await.unwrap().unwrap();
        queue.complete("q", &id).await.unwrap();
    }

    let counts = queue.counts("q").await.unwrap();
    assert_eq!(counts.completed, 100, "completed ring is bounded");
    assert_eq!(counts.active, 0);
    assert_eq!(counts.waiting, 0);
}

#[tokio::test]
async fn failed_jobs_are_kept() {
    let queue = MemoryQueue::new();

    for i in 0..120 {
        let id = queue.enqueue("q", eval_job(i)).await.unwrap();
        queue.dequeue("q").await.unwrap().unwrap();
        queue.fail("q", &id, "boom", None).await.unwrap();
    }

    let counts = queue.counts("q").await.unwrap();
    assert_eq!(counts.failed, 120, "failed list is not trimmed");
}

#[tokio::test]
async fn retry_goes_through_delayed_state() {
    let queue = MemoryQueue::new();

    let id = queue.enqueue("q", eval_job(1)).await.unwrap();
    queue.dequeue("q").await.unwrap().unwrap();
    queue.fail("q", &id, "transient", Some(60)).await.unwrap();

    // Not ready yet.
    assert!(queue.dequeue("q").await.unwrap().is_none());
    assert_eq!(queue.counts("q").await.unwrap().delayed, 1);

    tokio::time::sleep(Duration::from_millis(90)).await;

    let retried = queue.dequeue("q").await.unwrap().unwrap();
    assert_eq!(retried.id, id);
    assert_eq!(retried.attempts, 1, "attempt count survives the retry");
}

#[tokio::test]
async fn delayed_enqueue_becomes_ready() {
    let queue = MemoryQueue::new();

    queue.enqueue_delayed("q", eval_job(1), 60).await.unwrap();
    assert!(queue.dequeue("q").await.unwrap().is_none());

    tokio::time::sleep(Duration::from_millis(90)).await;
    assert!(queue.dequeue("q").await.unwrap().is_some());
}

#[tokio::test]
async fn complete_unknown_job_errors() {
    let queue = MemoryQueue::new();
    assert!(queue.complete("q", "nope").await.is_err());
}

// ── Scheduler over the broker ───────────────────────────────────────

async fn seed_strategy(db: &db::Db, user_id: i64, schedule: Option<&str>) -> i64 {
    let def = parse_definition(&json!({
        "trigger": { "type": "price", "chain": "base", "tokenAddress": "0xT", "priceTarget": 1.0 },
        "intent": { "type": "custom", "name": "noop" },
        "sessionKeyId": 1
    }))
    .unwrap();
    db::strategies::insert(db, user_id, "s", &def, schedule)
        .await
        .unwrap()
}

#[tokio::test]
async fn scheduler_enqueues_once_per_cadence() {
    let db = db::open_in_memory().unwrap();
    let user = db::users::insert(&db, "ext-1", "u@example.com").await.unwrap();
    let queue = Arc::new(MemoryQueue::new());

    let a = seed_strategy(&db, user, None).await;
    let b = seed_strategy(&db, user, Some("@hourly")).await;

    let mut scheduler = Scheduler::new(db.clone(), queue.clone(), Duration::from_secs(60));

    // First tick: both strategies are due immediately.
    assert_eq!(scheduler.tick().await.unwrap(), 2);
    // Second tick straight after: neither cadence has elapsed.
    assert_eq!(scheduler.tick().await.unwrap(), 0);

    let counts = queue.counts(STRATEGY_QUEUE).await.unwrap();
    assert_eq!(counts.waiting, 2);

    let ids: Vec<Option<i64>> = vec![
        queue.dequeue(STRATEGY_QUEUE).await.unwrap().map(|j| j.payload.strategy_id()).flatten(),
        queue.dequeue(STRATEGY_QUEUE).await.unwrap().map(|j| j.payload.strategy_id()).flatten(),
    ];
    assert!(ids.contains(&Some(a)));
    assert!(ids.contains(&Some(b)));
}

#[tokio::test]
async fn scheduler_skips_deactivated_strategies() {
    let db = db::open_in_memory().unwrap();
    let user = db::users::insert(&db, "ext-1", "u@example.com").await.unwrap();
    let queue = Arc::new(MemoryQueue::new());

    let id = seed_strategy(&db, user, None).await;
    let mut scheduler = Scheduler::new(db.clone(), queue.clone(), Duration::from_secs(60));

    assert_eq!(scheduler.tick().await.unwrap(), 1);

    db::strategies::set_active(&db, id, false).await.unwrap();
    assert_eq!(scheduler.tick().await.unwrap(), 0);
    assert_eq!(queue.counts(STRATEGY_QUEUE).await.unwrap().waiting, 1);
}
