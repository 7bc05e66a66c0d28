use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{FlowError, FlowResult};
use crate::model::entity::PriceFeed;

use super::{MarketFeed, PairQuote};

const API_BASE: &str = "https://api.dexscreener.com";

// ── DexScreener response types ───────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SearchResponse {
    pairs: Option<Vec<Pair>>,
}

#[derive(Debug, Deserialize)]
struct Pair {
    #[serde(rename = "chainId")]
    chain_id: String,
    #[serde(rename = "baseToken")]
    base_token: BaseToken,
    #[serde(rename = "priceUsd")]
    price_usd: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BaseToken {
    address: Option<String>,
    symbol: Option<String>,
}

// ── Feed ─────────────────────────────────────────────────────────────

/// DEX-pair feed: per-chain pair search plus explicit Solana mint lookups.
pub struct DexScreenerFeed {
    client: reqwest::Client,
    chains: Vec<String>,
    sol_mints: Vec<String>,
}

impl DexScreenerFeed {
    pub fn new(
        chains: Vec<String>,
        sol_mints: Vec<String>,
        timeout: std::time::Duration,
    ) -> FlowResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("intent-flow/0.1")
            .build()
            .map_err(|e| FlowError::Internal(format!("building dexscreener client: {e}")))?;
        Ok(DexScreenerFeed {
            client,
            chains,
            sol_mints,
        })
    }

    async fn poll_chain(&self, chain: &str) -> FlowResult<Vec<PairQuote>> {
        let url = format!("{API_BASE}/latest/dex/search?q={chain}");
        let resp: SearchResponse = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| FlowError::Upstream(format!("dexscreener search: {e}")))?
            .json()
            .await?;

        Ok(collect_quotes(resp.pairs.unwrap_or_default(), Some(chain)))
    }

    async fn poll_mint(&self, mint: &str) -> FlowResult<Vec<PairQuote>> {
        let url = format!("{API_BASE}/latest/dex/tokens/{mint}");
        let resp: SearchResponse = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| FlowError::Upstream(format!("dexscreener tokens: {e}")))?
            .json()
            .await?;

        Ok(collect_quotes(resp.pairs.unwrap_or_default(), Some("solana")))
    }
}

/// Keep pairs with a usable address, symbol, and finite positive price.
/// Chain and address are lower-cased so the same token lands on the same
/// rows regardless of how the API checksums it.
fn collect_quotes(pairs: Vec<Pair>, chain_filter: Option<&str>) -> Vec<PairQuote> {
    pairs
        .into_iter()
        .filter(|p| {
            chain_filter
                .map(|c| p.chain_id.eq_ignore_ascii_case(c))
                .unwrap_or(true)
        })
        .filter_map(|p| {
            let address = p.base_token.address.filter(|a| !a.is_empty())?;
            let symbol = p.base_token.symbol.filter(|s| !s.is_empty())?;
            let price = p.price_usd?.parse::<f64>().ok()?;
            if !price.is_finite() || price <= 0.0 {
                return None;
            }
            Some(PairQuote {
                chain: p.chain_id.to_lowercase(),
                address: address.to_lowercase(),
                symbol,
                price_usd: price,
            })
        })
        .collect()
}

#[async_trait]
impl MarketFeed for DexScreenerFeed {
    fn name(&self) -> &str {
        "dexscreener"
    }

    fn source(&self) -> PriceFeed {
        PriceFeed::DexAggregator
    }

    async fn poll(&self) -> FlowResult<Vec<PairQuote>> {
        let mut quotes = Vec::new();

        // One chain failing must not starve the others.
        for chain in &self.chains {
            match self.poll_chain(chain).await {
                Ok(mut batch) => quotes.append(&mut batch),
                Err(err) => {
                    tracing::warn!(chain = %chain, %err, "dex feed poll failed for chain");
                }
            }
        }

        for mint in &self.sol_mints {
            match self.poll_mint(mint).await {
                Ok(mut batch) => quotes.append(&mut batch),
                Err(err) => {
                    tracing::warn!(mint = %mint, %err, "dex feed poll failed for mint");
                }
            }
        }

        Ok(quotes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(chain: &str, address: Option<&str>, symbol: Option<&str>, price: Option<&str>) -> Pair {
        Pair {
            chain_id: chain.to_string(),
            base_token: BaseToken {
                address: address.map(String::from),
                symbol: symbol.map(String::from),
            },
            price_usd: price.map(String::from),
        }
    }

    #[test]
    fn drops_pairs_missing_fields() {
        let quotes = collect_quotes(
            vec![
                pair("base", Some("0xAbC1"), Some("AAA"), Some("1.25")),
                pair("base", None, Some("BBB"), Some("2.0")),
                pair("base", Some("0xC"), None, Some("3.0")),
                pair("base", Some("0xD"), Some("DDD"), None),
                pair("base", Some("0xE"), Some("EEE"), Some("not-a-number")),
            ],
            Some("base"),
        );
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].address, "0xabc1", "addresses are normalised");
    }

    #[test]
    fn filters_foreign_chains_and_bad_prices() {
        let quotes = collect_quotes(
            vec![
                pair("base", Some("0xA"), Some("AAA"), Some("1.0")),
                pair("ethereum", Some("0xB"), Some("BBB"), Some("1.0")),
                pair("base", Some("0xC"), Some("CCC"), Some("inf")),
                pair("base", Some("0xD"), Some("DDD"), Some("-4")),
            ],
            Some("base"),
        );
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].symbol, "AAA");
    }
}
