use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::correlation;
use crate::error::FlowError;

use super::error::ApiError;
use super::AppState;

/// Guard for internal endpoints: the `x-service-token` header must match
/// the configured token. An empty configured token rejects everything.
pub struct ServiceToken;

impl FromRequestParts<AppState> for ServiceToken {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if state.service_token.is_empty() {
            return Err(ApiError(FlowError::PermissionDenied(
                "internal api token is not configured".into(),
            )));
        }

        let presented = parts
            .headers
            .get("x-service-token")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ApiError(FlowError::PermissionDenied(
                    "missing x-service-token header".into(),
                ))
            })?;

        if presented != state.service_token {
            return Err(ApiError(FlowError::PermissionDenied(
                "invalid service token".into(),
            )));
        }
        Ok(ServiceToken)
    }
}

/// Correlation id for request tracking: taken from the inbound header when
/// the caller stamped one, minted otherwise.
pub struct CorrelationId(pub String);

impl FromRequestParts<AppState> for CorrelationId {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(correlation::HEADER)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .unwrap_or_else(correlation::new_id);
        Ok(CorrelationId(id))
    }
}
