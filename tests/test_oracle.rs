use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use intent_flow::db;
use intent_flow::error::FlowResult;
use intent_flow::model::entity::PriceFeed;
use intent_flow::oracle::sources::PriceSource;
use intent_flow::oracle::{consensus, OracleValidator};

// ── Mock sources ────────────────────────────────────────────────────

struct StaticSource {
    name: &'static str,
    price: Option<f64>,
}

#[async_trait]
impl PriceSource for StaticSource {
    fn name(&self) -> &str {
        self.name
    }

    async fn price(&self, _chain: &str, _token: &str) -> FlowResult<Option<f64>> {
        Ok(self.price)
    }
}

struct SlowSource {
    delay: Duration,
}

#[async_trait]
impl PriceSource for SlowSource {
    fn name(&self) -> &str {
        "slow"
    }

    async fn price(&self, _chain: &str, _token: &str) -> FlowResult<Option<f64>> {
        tokio::time::sleep(self.delay).await;
        Ok(Some(123.0))
    }
}

fn source(name: &'static str, price: Option<f64>) -> Arc<dyn PriceSource> {
    Arc::new(StaticSource { name, price })
}

// ── Pure consensus ──────────────────────────────────────────────────

#[test]
fn consensus_requires_two_sources() {
    let result = consensus(vec![
        ("a".into(), Some(100.0)),
        ("b".into(), None),
        ("c".into(), None),
    ]);
    assert!(!result.ok);
    assert!(result.reason.unwrap().contains("insufficient sources"));
}

#[test]
fn consensus_agrees_within_band() {
    let result = consensus(vec![
        ("a".into(), Some(100.0)),
        ("b".into(), Some(110.0)),
        ("c".into(), None),
    ]);
    assert!(result.ok);
    assert_eq!(result.price, Some(105.0));
    assert_eq!(result.sources.len(), 3);
}

#[test]
fn consensus_flags_outliers() {
    // Median of {100, 130} is 115; both legs deviate ~13%, which passes.
    // Push one source past 20% instead.
    let result = consensus(vec![
        ("a".into(), Some(100.0)),
        ("b".into(), Some(101.0)),
        ("c".into(), Some(130.0)),
    ]);
    assert!(!result.ok);
    let reason = result.reason.unwrap();
    assert!(reason.contains("deviation"), "reason was: {reason}");
    let outlier = result.sources.iter().find(|s| s.outlier).unwrap();
    assert_eq!(outlier.name, "c");
}

#[test]
fn consensus_median_is_exact_for_odd_sets() {
    let result = consensus(vec![
        ("a".into(), Some(99.0)),
        ("b".into(), Some(100.0)),
        ("c".into(), Some(101.0)),
    ]);
    assert!(result.ok);
    assert_eq!(result.price, Some(100.0));
}

// ── Validator with mock sources and the local store ─────────────────

#[tokio::test]
async fn two_external_sources_reach_consensus() {
    let db = db::open_in_memory().unwrap();
    let validator = OracleValidator::new(
        db,
        vec![source("a", Some(2000.0)), source("b", Some(2040.0))],
        Duration::from_secs(5),
    );

    let result = validator.validate("base", "0xT").await.unwrap();
    assert!(result.ok);
    assert_eq!(result.price, Some(2020.0));
    // The stale-or-missing local sample reads as null but is still reported.
    assert_eq!(result.sources.len(), 3);
}

#[tokio::test]
async fn deviation_between_two_sources_vetoes() {
    // A=100, B=130, no stored sample: a 30-point spread over median 115 is
    // ~26%, past the band even though each leg sits only 13% out.
    let db = db::open_in_memory().unwrap();
    let validator = OracleValidator::new(
        db,
        vec![source("a", Some(100.0)), source("b", Some(130.0))],
        Duration::from_secs(5),
    );

    let result = validator.validate("base", "0xT").await.unwrap();
    assert!(!result.ok);
    assert!(result.reason.unwrap().contains("deviation"));
}

#[tokio::test]
async fn fresh_local_sample_counts_as_source() {
    let db = db::open_in_memory().unwrap();
    db::prices::insert(&db, "base", "0xT", "TKN", 2010.0, PriceFeed::DexAggregator)
        .await
        .unwrap();

    // Only one external source responds; the stored sample completes quorum.
    let validator = OracleValidator::new(
        db,
        vec![source("a", Some(2000.0)), source("b", None)],
        Duration::from_secs(5),
    );

    let result = validator.validate("base", "0xT").await.unwrap();
    assert!(result.ok);
    assert_eq!(result.price, Some(2005.0));
}

#[tokio::test]
async fn stale_local_sample_is_ignored() {
    let db = db::open_in_memory().unwrap();
    db::prices::insert(&db, "base", "0xT", "TKN", 2010.0, PriceFeed::DexAggregator)
        .await
        .unwrap();
    // Age the sample past the 5 minute window.
    {
        let conn = db.lock().await;
        conn.execute(
            "UPDATE price_samples SET timestamp = timestamp - 600000",
            [],
        )
        .unwrap();
    }

    let validator = OracleValidator::new(
        db,
        vec![source("a", Some(2000.0)), source("b", None)],
        Duration::from_secs(5),
    );

    let result = validator.validate("base", "0xT").await.unwrap();
    assert!(!result.ok);
    assert!(result.reason.unwrap().contains("insufficient sources"));
}

#[tokio::test]
async fn slow_source_times_out_to_null() {
    let db = db::open_in_memory().unwrap();
    let validator = OracleValidator::new(
        db,
        vec![
            Arc::new(SlowSource {
                delay: Duration::from_millis(300),
            }),
            source("a", Some(100.0)),
        ],
        Duration::from_millis(50),
    );

    let result = validator.validate("base", "0xT").await.unwrap();
    assert!(!result.ok, "timed-out source must not count toward quorum");
    let slow = result.sources.iter().find(|s| s.name == "slow").unwrap();
    assert_eq!(slow.price, None);
}
