use thiserror::Error;

/// Error kinds for the trigger–evaluation–execution pipeline.
///
/// The variants map one-to-one onto the propagation policy: terminal kinds
/// (`NotFound`, `Validation`, `PermissionDenied`, `Conflict`) end the current
/// job attempt with an informational log, retryable kinds (`Upstream`,
/// `RateLimited`, transient `Signer`) go back through the backoff loop, and
/// `Internal` fails the job so the broker re-queues it.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Lock held, active duplicate, or idempotency collision.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    /// External API failure (feed, oracle source, executor endpoint, vault).
    #[error("upstream: {0}")]
    Upstream(String),

    /// Chain / signer failure. `transient` marks errors worth retrying.
    #[error("signer: {message}")]
    Signer { message: String, transient: bool },

    #[error("internal: {0}")]
    Internal(String),
}

pub type FlowResult<T> = Result<T, FlowError>;

impl FlowError {
    pub fn signer(message: impl Into<String>, transient: bool) -> Self {
        FlowError::Signer {
            message: message.into(),
            transient,
        }
    }

    /// Whether a failed attempt should re-enter the backoff loop.
    pub fn is_retryable(&self) -> bool {
        match self {
            FlowError::Upstream(_) | FlowError::RateLimited(_) => true,
            FlowError::Signer { transient, .. } => *transient,
            FlowError::NotFound(_)
            | FlowError::Validation(_)
            | FlowError::PermissionDenied(_)
            | FlowError::Conflict(_)
            | FlowError::Internal(_) => false,
        }
    }

    /// HTTP status for the internal executor endpoint.
    pub fn http_status(&self) -> u16 {
        match self {
            FlowError::NotFound(_) => 404,
            FlowError::Validation(_) => 422,
            FlowError::PermissionDenied(_) => 403,
            FlowError::Conflict(_) => 409,
            FlowError::RateLimited(_) => 429,
            FlowError::Upstream(_) | FlowError::Signer { .. } => 502,
            FlowError::Internal(_) => 500,
        }
    }
}

impl From<rusqlite::Error> for FlowError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => FlowError::NotFound("row not found".into()),
            other => FlowError::Internal(format!("db: {other}")),
        }
    }
}

impl From<redis::RedisError> for FlowError {
    fn from(err: redis::RedisError) -> Self {
        FlowError::Upstream(format!("redis: {err}"))
    }
}

impl From<reqwest::Error> for FlowError {
    fn from(err: reqwest::Error) -> Self {
        FlowError::Upstream(format!("http: {err}"))
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        FlowError::Validation(format!("json: {err}"))
    }
}
