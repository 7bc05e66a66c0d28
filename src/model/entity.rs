use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::definition::{ActionKind, StrategyDefinition};

// ── Users & wallets ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub external_identity_id: String,
    pub email: String,
}

/// One wallet per `(userId, chain)`. `smart_account_address` may be
/// counterfactual until the account is deployed on-chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wallet {
    pub id: i64,
    pub user_id: i64,
    pub chain: String,
    pub owner_address: String,
    pub smart_account_address: Option<String>,
}

// ── Session keys ─────────────────────────────────────────────────────

/// One spend ceiling inside a session key's permission record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendLimit {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
    pub max_amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_secs: Option<u64>,
}

/// Scope record attached to a session key. Absent lists mean "unrestricted";
/// present lists are allow-lists.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPermissions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<ActionKind>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chains: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_contracts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spend_limits: Vec<SpendLimit>,
}

impl KeyPermissions {
    pub fn allows_action(&self, action: ActionKind) -> bool {
        match &self.actions {
            Some(actions) => actions.contains(&action),
            None => true,
        }
    }

    pub fn allows_chain(&self, chain: &str) -> bool {
        match &self.chains {
            Some(chains) => chains.iter().any(|c| c.eq_ignore_ascii_case(chain)),
            None => true,
        }
    }
}

/// Scoped signing credential. Private key material lives only in the
/// external vault; this record carries the public half and the scope.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionKey {
    pub id: i64,
    pub user_id: i64,
    pub public_key: String,
    pub permissions: KeyPermissions,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl SessionKey {
    /// Active and not past expiry.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map(|exp| exp > now).unwrap_or(true)
    }
}

// ── Strategies ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Strategy {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub definition: StrategyDefinition,
    /// Cron-like cadence string; absent means the system poll interval.
    pub schedule: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

// ── Price samples ────────────────────────────────────────────────────

/// Which feed produced a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PriceFeed {
    DexAggregator,
    PerpVenue,
}

impl PriceFeed {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceFeed::DexAggregator => "dexAggregator",
            PriceFeed::PerpVenue => "perpVenue",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "dexAggregator" => Some(PriceFeed::DexAggregator),
            "perpVenue" => Some(PriceFeed::PerpVenue),
            _ => None,
        }
    }
}

/// Append-only market observation. `address` holds the token address, or the
/// market symbol for perp venues.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSample {
    pub id: i64,
    pub chain: String,
    pub address: String,
    pub symbol: String,
    pub price_usd: f64,
    pub source: PriceFeed,
    pub timestamp: DateTime<Utc>,
}

// ── Transaction logs ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Success,
    Failed,
    Skipped,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Success => "success",
            TxStatus::Failed => "failed",
            TxStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TxStatus::Pending),
            "success" => Some(TxStatus::Success),
            "failed" => Some(TxStatus::Failed),
            "skipped" => Some(TxStatus::Skipped),
            _ => None,
        }
    }
}

/// Outcome record for an execution attempt (or a deliberate skip).
/// `details` is free-form; the executor stores the idempotency key in
/// `details.idempotencyKey` and dedupes on it.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionLog {
    pub id: i64,
    pub user_id: i64,
    pub strategy_id: Option<i64>,
    pub description: String,
    pub tx_hash: Option<String>,
    pub chain: Option<String>,
    pub status: TxStatus,
    pub details: Value,
    pub created_at: DateTime<Utc>,
}
