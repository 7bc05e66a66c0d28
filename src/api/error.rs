use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::FlowError;

/// Axum-facing wrapper: `FlowError` kinds map straight onto status codes,
/// so the evaluator's dispatch client can classify retryability from the
/// response alone.
#[derive(Debug)]
pub struct ApiError(pub FlowError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl From<FlowError> for ApiError {
    fn from(err: FlowError) -> Self {
        ApiError(err)
    }
}
