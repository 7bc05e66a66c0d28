use serde::{Deserialize, Serialize};

/// A chain specification.
///
/// Strategies and intents refer to chains by name; this registry resolves the
/// names the platform knows about to EVM chain ids and RPC endpoints. Non-EVM
/// chains (Solana, Hyperliquid) carry a name only — their I/O goes through
/// venue APIs, not JSON-RPC.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Chain {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<String>,
}

impl Chain {
    pub fn chain_id(&self) -> Option<u64> {
        self.chain_id
    }

    pub fn rpc_url(&self) -> Option<&str> {
        self.rpc_url.as_deref()
    }

    /// EVM chains have a chain id; everything else is venue-API only.
    pub fn is_evm(&self) -> bool {
        self.chain_id.is_some()
    }
}

// ── Convenience constructors ─────────────────────────────────────────

impl Chain {
    pub fn ethereum() -> Self {
        Chain {
            name: "ethereum".into(),
            chain_id: Some(1),
            rpc_url: Some("https://eth.llamarpc.com".into()),
        }
    }
    pub fn arbitrum() -> Self {
        Chain {
            name: "arbitrum".into(),
            chain_id: Some(42161),
            rpc_url: Some("https://arb1.arbitrum.io/rpc".into()),
        }
    }
    pub fn optimism() -> Self {
        Chain {
            name: "optimism".into(),
            chain_id: Some(10),
            rpc_url: Some("https://mainnet.optimism.io".into()),
        }
    }
    pub fn base() -> Self {
        Chain {
            name: "base".into(),
            chain_id: Some(8453),
            rpc_url: Some("https://mainnet.base.org".into()),
        }
    }
    pub fn solana() -> Self {
        Chain::named("solana")
    }
    pub fn hyperliquid() -> Self {
        Chain::named("hyperliquid")
    }

    /// Resolve a chain from its name; unknown names become name-only chains.
    pub fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "ethereum" | "eth" => Self::ethereum(),
            "arbitrum" => Self::arbitrum(),
            "optimism" => Self::optimism(),
            "base" => Self::base(),
            "solana" => Self::solana(),
            "hyperliquid" => Self::hyperliquid(),
            other => Self::named(other),
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Chain {
            name: name.into(),
            chain_id: None,
            rpc_url: None,
        }
    }
}

impl std::fmt::Display for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}
