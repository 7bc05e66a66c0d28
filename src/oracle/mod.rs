pub mod sources;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::db::{self, Db};
use crate::error::FlowResult;

use sources::PriceSource;

/// Maximum tolerated deviation of any source from the median.
pub const MAX_DEVIATION: f64 = 0.20;
/// Minimum non-null sources for a verdict.
pub const MIN_SOURCES: usize = 2;
/// Stored samples older than this do not count as a source.
pub const LOCAL_SAMPLE_MAX_AGE_SECS: i64 = 300;

// ── Consensus report ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceReading {
    pub name: String,
    pub price: Option<f64>,
    /// Fractional deviation from the median, for non-null sources.
    pub deviation: Option<f64>,
    pub outlier: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Consensus {
    pub ok: bool,
    /// Median of the non-null sources when `ok`.
    pub price: Option<f64>,
    pub reason: Option<String>,
    pub sources: Vec<SourceReading>,
}

/// Pure consensus over named readings: require ≥ 2 non-null sources, take
/// the median, flag anything deviating more than 20 % from it. The total
/// spread between the cheapest and dearest source is held to the same band,
/// so a two-source disagreement cannot hide behind an averaged median.
pub fn consensus(readings: Vec<(String, Option<f64>)>) -> Consensus {
    let prices: Vec<f64> = readings.iter().filter_map(|(_, p)| *p).collect();

    if prices.len() < MIN_SOURCES {
        return Consensus {
            ok: false,
            price: None,
            reason: Some(format!(
                "insufficient sources: {} of {MIN_SOURCES} required",
                prices.len()
            )),
            sources: readings
                .into_iter()
                .map(|(name, price)| SourceReading {
                    name,
                    price,
                    deviation: None,
                    outlier: false,
                })
                .collect(),
        };
    }

    let med = median(&prices);
    let sources: Vec<SourceReading> = readings
        .into_iter()
        .map(|(name, price)| {
            let deviation = price.map(|p| ((p - med) / med).abs());
            SourceReading {
                name,
                price,
                deviation,
                outlier: deviation.is_some_and(|d| d > MAX_DEVIATION),
            }
        })
        .collect();

    let lo = prices.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = prices.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let spread = (hi - lo) / med;

    let outliers: Vec<&SourceReading> = sources.iter().filter(|s| s.outlier).collect();
    if !outliers.is_empty() || spread > MAX_DEVIATION {
        let worst = outliers
            .iter()
            .filter_map(|s| s.deviation)
            .fold(spread, f64::max);
        let names: Vec<&str> = outliers.iter().map(|s| s.name.as_str()).collect();
        let culprits = if names.is_empty() {
            "source spread".to_string()
        } else {
            names.join(", ")
        };
        return Consensus {
            ok: false,
            price: None,
            reason: Some(format!(
                "price deviation {:.1}% exceeds {:.0}% ({culprits})",
                worst * 100.0,
                MAX_DEVIATION * 100.0,
            )),
            sources,
        };
    }

    Consensus {
        ok: true,
        price: Some(med),
        reason: None,
        sources,
    }
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

// ── Validator ────────────────────────────────────────────────────────

/// Multi-source price consensus gating dispatch. External sources are
/// queried with a per-source timeout; the freshest local sample joins them
/// when it is recent enough.
pub struct OracleValidator {
    db: Db,
    sources: Vec<Arc<dyn PriceSource>>,
    source_timeout: Duration,
}

impl OracleValidator {
    pub fn new(db: Db, sources: Vec<Arc<dyn PriceSource>>, source_timeout: Duration) -> Self {
        OracleValidator {
            db,
            sources,
            source_timeout,
        }
    }

    pub async fn validate(&self, chain: &str, token_address: &str) -> FlowResult<Consensus> {
        let mut readings: Vec<(String, Option<f64>)> = Vec::new();

        for source in &self.sources {
            let price =
                match tokio::time::timeout(self.source_timeout, source.price(chain, token_address))
                    .await
                {
                    Ok(Ok(price)) => price,
                    Ok(Err(err)) => {
                        tracing::warn!(source = source.name(), chain, token_address, %err, "oracle source failed");
                        None
                    }
                    Err(_) => {
                        tracing::warn!(source = source.name(), chain, token_address, "oracle source timed out");
                        None
                    }
                };
            readings.push((source.name().to_string(), price));
        }

        readings.push(("localSample".to_string(), self.fresh_local(chain, token_address).await?));

        Ok(consensus(readings))
    }

    async fn fresh_local(&self, chain: &str, token_address: &str) -> FlowResult<Option<f64>> {
        let sample = db::prices::latest(&self.db, chain, token_address).await?;
        Ok(sample.and_then(|s| {
            let age = Utc::now().signed_duration_since(s.timestamp).num_seconds();
            (age <= LOCAL_SAMPLE_MAX_AGE_SECS).then_some(s.price_usd)
        }))
    }
}
