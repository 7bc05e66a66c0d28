use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{FlowError, FlowResult};

/// Intent name assigned to strategies imported from the flat legacy form.
/// The evaluator recognises it and skips dispatch for such strategies.
pub const LEGACY_INTENT_NAME: &str = "legacy-definition";

/// Upper bound for the trend trigger's top-N window.
pub const TREND_TOP_MAX: u32 = 50;

// ── Trigger ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Comparator {
    /// Fire when price ≥ target (the default).
    #[default]
    Gte,
    /// Fire when price ≤ target.
    Lte,
}

/// Predicate evaluated against market state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Latest price for `(chain, tokenAddress)` crosses `priceTarget`.
    #[serde(rename_all = "camelCase")]
    Price {
        chain: String,
        token_address: String,
        price_target: f64,
        #[serde(default)]
        comparator: Comparator,
    },
    /// Token appears among the most recent `top` distinct samples of the chain.
    #[serde(rename_all = "camelCase")]
    Trend {
        chain: String,
        token_address: String,
        top: u32,
    },
}

impl Trigger {
    pub fn chain(&self) -> &str {
        match self {
            Trigger::Price { chain, .. } | Trigger::Trend { chain, .. } => chain,
        }
    }

    pub fn token_address(&self) -> &str {
        match self {
            Trigger::Price { token_address, .. } | Trigger::Trend { token_address, .. } => {
                token_address
            }
        }
    }
}

// ── Intent ───────────────────────────────────────────────────────────

/// Actions a session key may be scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Swap,
    Bridge,
    Custom,
    Transfer,
    OpenPosition,
    ClosePosition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

/// Token movement parameters shared by swap and bridge intents.
/// A swap keeps `fromChain == toChain`; a bridge crosses chains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MovementIntent {
    pub from_chain: String,
    pub to_chain: String,
    pub from_token: String,
    pub to_token: String,
    pub from_amount: f64,
    pub user_address: String,
    /// When set, `fromAmount` is a percentage of the wallet balance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_in_is_percentage: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slippage_bps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_address: Option<String>,
}

fn hyperliquid_chain() -> String {
    "hyperliquid".to_string()
}

/// Normalised description of the on-chain action to perform on trigger match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Intent {
    Swap(MovementIntent),
    Bridge(MovementIntent),
    #[serde(rename_all = "camelCase")]
    OpenPosition {
        #[serde(default = "hyperliquid_chain")]
        chain: String,
        market: String,
        side: PositionSide,
        size: f64,
        leverage: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        slippage: Option<f64>,
    },
    #[serde(rename_all = "camelCase")]
    ClosePosition {
        #[serde(default = "hyperliquid_chain")]
        chain: String,
        market: String,
    },
    Custom {
        name: String,
        #[serde(default)]
        parameters: Value,
    },
}

impl Intent {
    pub fn type_name(&self) -> &'static str {
        match self {
            Intent::Swap(_) => "swap",
            Intent::Bridge(_) => "bridge",
            Intent::OpenPosition { .. } => "open_position",
            Intent::ClosePosition { .. } => "close_position",
            Intent::Custom { .. } => "custom",
        }
    }

    /// Action class for session-key permission checks.
    pub fn action(&self) -> ActionKind {
        match self {
            Intent::Swap(_) => ActionKind::Swap,
            Intent::Bridge(_) => ActionKind::Bridge,
            Intent::OpenPosition { .. } => ActionKind::OpenPosition,
            Intent::ClosePosition { .. } => ActionKind::ClosePosition,
            Intent::Custom { .. } => ActionKind::Custom,
        }
    }

    /// Every chain the intent touches (for permission scoping).
    pub fn chains(&self) -> Vec<&str> {
        match self {
            Intent::Swap(m) | Intent::Bridge(m) => {
                if m.from_chain == m.to_chain {
                    vec![m.from_chain.as_str()]
                } else {
                    vec![m.from_chain.as_str(), m.to_chain.as_str()]
                }
            }
            Intent::OpenPosition { chain, .. } | Intent::ClosePosition { chain, .. } => {
                vec![chain.as_str()]
            }
            Intent::Custom { .. } => vec![],
        }
    }

    /// Whether dispatch must be gated on oracle price consensus.
    pub fn is_price_sensitive(&self) -> bool {
        matches!(
            self,
            Intent::Swap(_) | Intent::Bridge(_) | Intent::OpenPosition { .. }
        )
    }

    /// `(chain, token-or-market)` pairs the oracle validator must agree on
    /// before this intent may be signed.
    pub fn oracle_targets(&self) -> Vec<(String, String)> {
        match self {
            Intent::Swap(m) | Intent::Bridge(m) => {
                let mut targets = vec![(m.from_chain.clone(), m.from_token.clone())];
                let to = (m.to_chain.clone(), m.to_token.clone());
                if !targets.contains(&to) {
                    targets.push(to);
                }
                targets
            }
            Intent::OpenPosition { chain, market, .. } => {
                vec![(chain.clone(), market.clone())]
            }
            Intent::ClosePosition { .. } | Intent::Custom { .. } => vec![],
        }
    }
}

// ── Canonical definition ─────────────────────────────────────────────

/// Canonical strategy definition: a trigger, the intent to dispatch when it
/// fires, an optional repeat flag (one-shot by default), and the session key
/// used for signing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StrategyDefinition {
    pub trigger: Trigger,
    pub intent: Intent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key_id: Option<i64>,
}

impl StrategyDefinition {
    pub fn repeats(&self) -> bool {
        self.repeat.unwrap_or(false)
    }

    /// True for strategies imported from the flat legacy form. These parse
    /// cleanly but are skipped at evaluation time.
    pub fn is_legacy(&self) -> bool {
        matches!(&self.intent, Intent::Custom { name, .. } if name == LEGACY_INTENT_NAME)
    }
}

// ── Parser ───────────────────────────────────────────────────────────

/// Canonicalise a user-supplied strategy definition.
///
/// Accepts the nested `{trigger, intent, ...}` form and the flat legacy form
/// (`{type: "price", chain, tokenAddress, priceTarget, comparator?}`). The
/// result round-trips: parsing a serialised `StrategyDefinition` yields the
/// same value. Trend windows are clamped into `[1, TREND_TOP_MAX]`.
pub fn parse_definition(raw: &Value) -> FlowResult<StrategyDefinition> {
    let obj = raw
        .as_object()
        .ok_or_else(|| FlowError::Validation("definition must be a JSON object".into()))?;

    let mut def: StrategyDefinition = if obj.contains_key("trigger") {
        serde_json::from_value(raw.clone())
            .map_err(|e| FlowError::Validation(format!("invalid definition: {e}")))?
    } else if obj.get("type").and_then(Value::as_str) == Some("price") {
        parse_legacy(raw)?
    } else {
        return Err(FlowError::Validation(
            "definition has neither a trigger nor a recognised legacy shape".into(),
        ));
    };

    if let Trigger::Trend { top, .. } = &mut def.trigger {
        *top = (*top).clamp(1, TREND_TOP_MAX);
    }

    Ok(def)
}

/// The legacy flat form predates the trigger/intent split: the whole record
/// is a price trigger and there is nothing to execute. It becomes a custom
/// no-intent the evaluator knows to skip.
fn parse_legacy(raw: &Value) -> FlowResult<StrategyDefinition> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct LegacyFlat {
        chain: String,
        token_address: String,
        price_target: f64,
        #[serde(default)]
        comparator: Comparator,
        #[serde(default)]
        session_key_id: Option<i64>,
    }

    let flat: LegacyFlat = serde_json::from_value(raw.clone())
        .map_err(|e| FlowError::Validation(format!("invalid legacy definition: {e}")))?;

    Ok(StrategyDefinition {
        trigger: Trigger::Price {
            chain: flat.chain,
            token_address: flat.token_address,
            price_target: flat.price_target,
            comparator: flat.comparator,
        },
        intent: Intent::Custom {
            name: LEGACY_INTENT_NAME.to_string(),
            parameters: json!({ "note": "normalised from flat price definition" }),
        },
        repeat: None,
        session_key_id: flat.session_key_id,
    })
}
