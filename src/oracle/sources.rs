use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{FlowError, FlowResult};

/// One external price source. Implementations return `Ok(None)` when they
/// have no quote for the token; transport errors bubble up and the validator
/// treats them as null readings.
#[async_trait]
pub trait PriceSource: Send + Sync {
    fn name(&self) -> &str;
    async fn price(&self, chain: &str, token_address: &str) -> FlowResult<Option<f64>>;
}

// ── DEX aggregator ───────────────────────────────────────────────────

const DEX_SCREENER_BASE: &str = "https://api.dexscreener.com";

#[derive(Debug, Deserialize)]
struct TokenPairsResponse {
    pairs: Option<Vec<TokenPair>>,
}

#[derive(Debug, Deserialize)]
struct TokenPair {
    #[serde(rename = "chainId")]
    chain_id: String,
    #[serde(rename = "priceUsd")]
    price_usd: Option<String>,
}

/// DexScreener token lookup: first pair on the requested chain wins.
pub struct DexAggregatorSource {
    client: reqwest::Client,
}

impl DexAggregatorSource {
    pub fn new(timeout: std::time::Duration) -> FlowResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("intent-flow/0.1")
            .build()
            .map_err(|e| FlowError::Internal(format!("building dex source client: {e}")))?;
        Ok(DexAggregatorSource { client })
    }
}

#[async_trait]
impl PriceSource for DexAggregatorSource {
    fn name(&self) -> &str {
        "dexAggregator"
    }

    async fn price(&self, chain: &str, token_address: &str) -> FlowResult<Option<f64>> {
        let url = format!("{DEX_SCREENER_BASE}/latest/dex/tokens/{token_address}");
        let resp: TokenPairsResponse = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| FlowError::Upstream(format!("dexscreener: {e}")))?
            .json()
            .await?;

        let price = resp
            .pairs
            .unwrap_or_default()
            .into_iter()
            .filter(|p| p.chain_id.eq_ignore_ascii_case(chain))
            .find_map(|p| p.price_usd.and_then(|s| s.parse::<f64>().ok()))
            .filter(|p| p.is_finite());
        Ok(price)
    }
}

// ── Generic market index ─────────────────────────────────────────────

const MARKET_INDEX_BASE: &str = "https://api.coingecko.com/api/v3";

/// CoinGecko contract-price lookup. Only chains with a known platform slug
/// resolve; everything else reads as null.
pub struct MarketIndexSource {
    client: reqwest::Client,
}

impl MarketIndexSource {
    pub fn new(timeout: std::time::Duration) -> FlowResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("intent-flow/0.1")
            .build()
            .map_err(|e| FlowError::Internal(format!("building index source client: {e}")))?;
        Ok(MarketIndexSource { client })
    }

    fn platform(chain: &str) -> Option<&'static str> {
        match chain.to_lowercase().as_str() {
            "ethereum" | "eth" => Some("ethereum"),
            "base" => Some("base"),
            "arbitrum" => Some("arbitrum-one"),
            "optimism" => Some("optimistic-ethereum"),
            "solana" => Some("solana"),
            _ => None,
        }
    }
}

#[async_trait]
impl PriceSource for MarketIndexSource {
    fn name(&self) -> &str {
        "marketIndex"
    }

    async fn price(&self, chain: &str, token_address: &str) -> FlowResult<Option<f64>> {
        let Some(platform) = Self::platform(chain) else {
            return Ok(None);
        };

        let url = format!(
            "{MARKET_INDEX_BASE}/simple/token_price/{platform}?contract_addresses={token_address}&vs_currencies=usd"
        );
        let resp: serde_json::Value = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| FlowError::Upstream(format!("market index: {e}")))?
            .json()
            .await?;

        let price = resp
            .as_object()
            .and_then(|map| {
                map.iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(token_address))
                    .map(|(_, v)| v)
            })
            .and_then(|entry| entry.get("usd"))
            .and_then(|v| v.as_f64())
            .filter(|p| p.is_finite());
        Ok(price)
    }
}
