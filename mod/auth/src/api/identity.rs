use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};

use verisafe_core::ServiceError;

use crate::api::AppState;
use crate::model::{ExternalAssertion, RefreshRequest};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/identity/resolve", post(resolve_identity))
        .route("/token/refresh", post(refresh_token))
}

/// POST /auth/identity/resolve — exchange a provider-verified identity
/// assertion for a local account and a session token pair. Public: the
/// assertion itself is the credential.
async fn resolve_identity(
    State(svc): State<AppState>,
    Json(assertion): Json<ExternalAssertion>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let (account, pair) = svc
        .resolve_external_identity(assertion)
        .map_err(ServiceError::from)?;
    Ok(Json(serde_json::json!({
        "account": account,
        "tokens": pair,
    })))
}

/// POST /auth/token/refresh — exchange a refresh token for a new pair.
async fn refresh_token(
    State(svc): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let pair = svc
        .refresh_session(&req.refresh_token)
        .map_err(ServiceError::from)?;
    Ok(Json(serde_json::to_value(pair).unwrap_or_default()))
}
