use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::json;

use crate::error::{FlowError, FlowResult};
use crate::model::entity::PriceFeed;

use super::{MarketFeed, PairQuote};

const INFO_URL: &str = "https://api.hyperliquid.xyz/info";

/// Perp-venue feed: Hyperliquid mid prices for a fixed symbol watch list.
/// Samples use the market symbol as the address.
pub struct HyperliquidFeed {
    client: reqwest::Client,
    symbols: Vec<String>,
}

impl HyperliquidFeed {
    pub fn new(symbols: Vec<String>, timeout: std::time::Duration) -> FlowResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("intent-flow/0.1")
            .build()
            .map_err(|e| FlowError::Internal(format!("building hyperliquid client: {e}")))?;
        Ok(HyperliquidFeed { client, symbols })
    }
}

#[async_trait]
impl MarketFeed for HyperliquidFeed {
    fn name(&self) -> &str {
        "hyperliquid"
    }

    fn source(&self) -> PriceFeed {
        PriceFeed::PerpVenue
    }

    async fn poll(&self) -> FlowResult<Vec<PairQuote>> {
        // allMids returns every listed market; the watch list narrows it.
        let mids: HashMap<String, String> = self
            .client
            .post(INFO_URL)
            .json(&json!({ "type": "allMids" }))
            .send()
            .await?
            .error_for_status()
            .map_err(|e| FlowError::Upstream(format!("hyperliquid allMids: {e}")))?
            .json()
            .await?;

        let quotes = self
            .symbols
            .iter()
            .filter_map(|symbol| {
                let mid = mids.get(symbol)?.parse::<f64>().ok()?;
                if !mid.is_finite() || mid <= 0.0 {
                    return None;
                }
                Some(PairQuote {
                    chain: "hyperliquid".to_string(),
                    address: symbol.clone(),
                    symbol: symbol.clone(),
                    price_usd: mid,
                })
            })
            .collect();
        Ok(quotes)
    }
}
