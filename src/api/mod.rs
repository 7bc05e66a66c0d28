pub mod error;
pub mod middleware;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::execute::{ExecuteRequest, ExecutionService};
use crate::model::entity::{TransactionLog, TxStatus};

use error::ApiError;
use middleware::{CorrelationId, ServiceToken};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ExecutionService>,
    pub service_token: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/transaction/execute/internal", post(execute_internal))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the executor's internal API until the shutdown flag flips.
pub async fn serve(
    host: &str,
    port: u16,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let app = router(state);
    let addr = format!("{host}:{port}");

    println!("intent-flow executor listening on {addr}");
    println!("  Health:  GET  http://{addr}/health");
    println!("  Execute: POST http://{addr}/transaction/execute/internal");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            loop {
                if shutdown.changed().await.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        })
        .await
        .context("running executor api")?;

    Ok(())
}

// ── Handlers ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub id: i64,
    pub user_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy_id: Option<i64>,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
    pub status: TxStatus,
    pub details: Value,
    pub created_at: i64,
}

impl From<TransactionLog> for ExecuteResponse {
    fn from(log: TransactionLog) -> Self {
        ExecuteResponse {
            id: log.id,
            user_id: log.user_id,
            strategy_id: log.strategy_id,
            description: log.description,
            tx_hash: log.tx_hash,
            chain: log.chain,
            status: log.status,
            details: log.details,
            created_at: log.created_at.timestamp_millis(),
        }
    }
}

async fn execute_internal(
    _token: ServiceToken,
    CorrelationId(correlation_id): CorrelationId,
    State(state): State<AppState>,
    Json(req): Json<ExecuteRequest>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let span = tracing::info_span!(
        "execute_internal",
        %correlation_id,
        session_key_id = req.session_key_id,
        idempotency_key = %req.idempotency_key,
    );
    let log = state.service.execute(req).instrument(span).await?;
    Ok(Json(ExecuteResponse::from(log)))
}
