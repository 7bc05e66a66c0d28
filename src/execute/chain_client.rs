use std::collections::HashMap;

use alloy::primitives::{Address, U256};
use alloy::providers::ProviderBuilder;
use alloy::sol;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{FlowError, FlowResult};
use crate::model::chain::Chain;

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function decimals() external view returns (uint8);
    }
}

/// Read-only chain access for the executor: wallet balances for percentage
/// amounts and allowance preflight. Writes always go through the signer.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn token_balance(&self, chain: &str, token: &str, owner: &str) -> FlowResult<f64>;
    async fn allowance(
        &self,
        chain: &str,
        token: &str,
        owner: &str,
        spender: &str,
    ) -> FlowResult<f64>;
    /// The aggregation router that will spend the input token on this chain.
    fn default_spender(&self, chain: &str) -> Option<String>;
}

// ── EVM implementation ───────────────────────────────────────────────

/// LiFi diamond, deployed at the same address on the supported EVM chains.
const LIFI_DIAMOND: &str = "0x1231DEB6f5749EF6cE6943a275A1D3E7486F4EaE";

pub struct EvmReader {
    decimals_cache: Mutex<HashMap<(String, String), u8>>,
}

impl EvmReader {
    pub fn new() -> Self {
        EvmReader {
            decimals_cache: Mutex::new(HashMap::new()),
        }
    }

    fn rpc_url(chain: &str) -> FlowResult<reqwest::Url> {
        let url = Chain::from_name(chain)
            .rpc_url()
            .map(String::from)
            .ok_or_else(|| {
                FlowError::Validation(format!("chain '{chain}' has no RPC endpoint for reads"))
            })?;
        url.parse()
            .map_err(|e| FlowError::Internal(format!("invalid rpc url '{url}': {e}")))
    }

    fn parse_address(value: &str, what: &str) -> FlowResult<Address> {
        value
            .parse()
            .map_err(|e| FlowError::Validation(format!("invalid {what} address '{value}': {e}")))
    }

    fn scale(&self, raw: U256, decimals: u8) -> FlowResult<f64> {
        let units: u128 = raw
            .try_into()
            .map_err(|_| FlowError::Internal("token amount exceeds u128".into()))?;
        Ok(units as f64 / 10f64.powi(decimals as i32))
    }

    async fn cached_decimals(
        &self,
        chain: &str,
        token: &str,
        erc20: &IERC20::IERC20Instance<impl alloy::providers::Provider>,
    ) -> FlowResult<u8> {
        let cache_key = (chain.to_string(), token.to_lowercase());
        if let Some(&d) = self.decimals_cache.lock().await.get(&cache_key) {
            return Ok(d);
        }
        let d = erc20
            .decimals()
            .call()
            .await
            .map_err(|e| FlowError::Upstream(format!("decimals() on {chain}: {e}")))?;
        self.decimals_cache.lock().await.insert(cache_key, d);
        Ok(d)
    }
}

impl Default for EvmReader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainReader for EvmReader {
    async fn token_balance(&self, chain: &str, token: &str, owner: &str) -> FlowResult<f64> {
        let provider = ProviderBuilder::new().connect_http(Self::rpc_url(chain)?);
        let erc20 = IERC20::new(Self::parse_address(token, "token")?, provider);

        let raw = erc20
            .balanceOf(Self::parse_address(owner, "owner")?)
            .call()
            .await
            .map_err(|e| FlowError::Upstream(format!("balanceOf on {chain}: {e}")))?;
        let decimals = self.cached_decimals(chain, token, &erc20).await?;
        self.scale(raw, decimals)
    }

    async fn allowance(
        &self,
        chain: &str,
        token: &str,
        owner: &str,
        spender: &str,
    ) -> FlowResult<f64> {
        let provider = ProviderBuilder::new().connect_http(Self::rpc_url(chain)?);
        let erc20 = IERC20::new(Self::parse_address(token, "token")?, provider);

        let raw = erc20
            .allowance(
                Self::parse_address(owner, "owner")?,
                Self::parse_address(spender, "spender")?,
            )
            .call()
            .await
            .map_err(|e| FlowError::Upstream(format!("allowance on {chain}: {e}")))?;
        let decimals = self.cached_decimals(chain, token, &erc20).await?;
        self.scale(raw, decimals)
    }

    fn default_spender(&self, chain: &str) -> Option<String> {
        Chain::from_name(chain)
            .is_evm()
            .then(|| LIFI_DIAMOND.to_string())
    }
}
