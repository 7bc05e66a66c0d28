use std::time::Duration;

/// Process configuration, resolved once at startup from environment variables.
///
/// Every worker pool receives a clone; nothing reads the environment after
/// this point.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQLite file path for the relational store.
    pub db_path: String,

    // ── Queue broker + lock store ──
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_password: Option<String>,

    // ── Ingestion ──
    /// Chains polled by the DEX-pair feed.
    pub ingest_chains: Vec<String>,
    /// Perp markets polled on Hyperliquid.
    pub hl_ingest_symbols: Vec<String>,
    /// Extra Solana mints appended to the DEX watch list.
    pub sol_ingest_mints: Vec<String>,
    pub dex_ingest_interval: Duration,
    pub perp_ingest_interval: Duration,

    // ── Scheduling / evaluation ──
    /// Scheduler tick and default strategy cadence.
    pub poll_interval: Duration,
    /// Executor base URL used by the evaluator's dispatch client.
    pub api_service_url: String,
    /// Value of the `x-service-token` header on internal calls.
    pub internal_api_token: String,
    pub execute_max_retries: u32,
    pub execute_backoff_ms: u64,
    /// Trend trigger max sample age; 0 disables the filter.
    pub trend_max_age_secs: u64,

    // ── Executor ──
    pub circuit_breaker_threshold: u32,
    pub lock_ttl_ms: u64,
    pub signer_service_url: String,

    // ── Timeouts ──
    pub dex_screener_timeout: Duration,
    pub oracle_source_timeout: Duration,
    pub execute_http_timeout: Duration,

    // ── Key store ──
    pub vault_addr: String,
    pub vault_token: String,
    pub vault_mount: String,

    // ── HTTP bind for the internal API ──
    pub api_host: String,
    pub api_port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        AppConfig {
            db_path: var_or("DB_PATH", "intent-flow.db"),

            redis_host: var_or("REDIS_HOST", "127.0.0.1"),
            redis_port: var_parsed("REDIS_PORT", 6379),
            redis_password: std::env::var("REDIS_PASSWORD").ok().filter(|s| !s.is_empty()),

            ingest_chains: var_list("INGEST_CHAINS", &["base", "solana"]),
            hl_ingest_symbols: var_list("HL_INGEST_SYMBOLS", &["BTC", "ETH", "SOL"]),
            sol_ingest_mints: var_list("SOL_INGEST_MINTS", &[]),
            dex_ingest_interval: Duration::from_secs(var_parsed("DEX_INGEST_INTERVAL_SECS", 60)),
            perp_ingest_interval: Duration::from_secs(var_parsed("PERP_INGEST_INTERVAL_SECS", 60)),

            poll_interval: Duration::from_secs(var_parsed("POLL_INTERVAL_SECS", 60)),
            api_service_url: var_or("API_SERVICE_URL", "http://127.0.0.1:3001"),
            internal_api_token: var_or("INTERNAL_API_TOKEN", ""),
            execute_max_retries: var_parsed("EVALUATOR_EXECUTE_MAX_RETRIES", 3),
            execute_backoff_ms: var_parsed("EVALUATOR_EXECUTE_BACKOFF_MS", 500),
            trend_max_age_secs: var_parsed("TREND_MAX_AGE_SECS", 0),

            circuit_breaker_threshold: var_parsed("CIRCUIT_BREAKER_THRESHOLD", 5),
            lock_ttl_ms: var_parsed("LOCK_TTL_MS", 30_000),
            signer_service_url: var_or("SIGNER_SERVICE_URL", "http://127.0.0.1:3002"),

            dex_screener_timeout: Duration::from_millis(var_parsed("DEX_SCREENER_TIMEOUT_MS", 8_000)),
            oracle_source_timeout: Duration::from_millis(var_parsed("ORACLE_SOURCE_TIMEOUT_MS", 5_000)),
            execute_http_timeout: Duration::from_millis(var_parsed("EXECUTE_HTTP_TIMEOUT_MS", 12_000)),

            vault_addr: var_or("VAULT_ADDR", "http://127.0.0.1:8200"),
            vault_token: var_or("VAULT_TOKEN", ""),
            vault_mount: var_or("VAULT_MOUNT", "session-keys"),

            api_host: var_or("API_HOST", "127.0.0.1"),
            api_port: var_parsed("API_PORT", 3001),
        }
    }

    pub fn redis_url(&self) -> String {
        match &self.redis_password {
            Some(pw) => format!("redis://:{pw}@{}:{}/", self.redis_host, self.redis_port),
            None => format!("redis://{}:{}/", self.redis_host, self.redis_port),
        }
    }
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn var_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn var_list(name: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => default.iter().map(|s| s.to_string()).collect(),
    }
}
