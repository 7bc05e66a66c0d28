use chrono::Utc;

use crate::db::{self, Db};
use crate::error::FlowResult;
use crate::model::definition::{Comparator, Trigger};
use crate::model::entity::PriceSample;

/// Evaluate a trigger against stored market state. Missing data reads as
/// "not met" — the next cadence tick sees fresher samples.
pub async fn evaluate(db: &Db, trigger: &Trigger, trend_max_age_secs: u64) -> FlowResult<bool> {
    match trigger {
        Trigger::Price {
            chain,
            token_address,
            price_target,
            comparator,
        } => {
            let Some(sample) = db::prices::latest(db, chain, token_address).await? else {
                return Ok(false);
            };
            Ok(price_met(sample.price_usd, *price_target, *comparator))
        }
        Trigger::Trend {
            chain,
            token_address,
            top,
        } => {
            let top = *top as usize;
            let limit = std::cmp::max(top * 10, 100) as u32;
            let mut samples = db::prices::recent_for_chain(db, chain, limit).await?;

            if trend_max_age_secs > 0 {
                let now = Utc::now();
                samples.retain(|s| {
                    now.signed_duration_since(s.timestamp).num_seconds()
                        <= trend_max_age_secs as i64
                });
            }

            let leaders = trend_top_n(&samples, top);
            Ok(leaders
                .iter()
                .any(|addr| addr.eq_ignore_ascii_case(token_address)))
        }
    }
}

pub fn price_met(price: f64, target: f64, comparator: Comparator) -> bool {
    match comparator {
        Comparator::Gte => price >= target,
        Comparator::Lte => price <= target,
    }
}

/// First `top` distinct token addresses in the (already time-descending)
/// sample list, order preserved.
pub fn trend_top_n(samples: &[PriceSample], top: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut leaders = Vec::new();
    for sample in samples {
        let key = sample.address.to_lowercase();
        if seen.insert(key) {
            leaders.push(sample.address.clone());
            if leaders.len() >= top {
                break;
            }
        }
    }
    leaders
}
