pub mod dexscreener;
pub mod hyperliquid;

use async_trait::async_trait;

use crate::error::FlowResult;
use crate::model::entity::PriceFeed;

/// One validated market observation from a feed poll.
#[derive(Debug, Clone, PartialEq)]
pub struct PairQuote {
    pub chain: String,
    /// Token address, or market symbol on perp venues.
    pub address: String,
    pub symbol: String,
    pub price_usd: f64,
}

/// A pollable market-data feed. Each adapter owns its watch list; the
/// ingestor owns the cadence.
#[async_trait]
pub trait MarketFeed: Send + Sync {
    fn name(&self) -> &str;
    fn source(&self) -> PriceFeed;
    async fn poll(&self) -> FlowResult<Vec<PairQuote>>;
}
