use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};

use verisafe_core::{ListParams, ServiceError};

use crate::api::{authorize, AppState};
use crate::model::{
    AuthContext, CreateServiceToken, RotateServiceToken, ServiceTokenWithSecret,
    UpdateServiceToken,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/service-tokens", get(list_tokens).post(create_token))
        .route("/service-tokens/stats", get(token_stats))
        .route(
            "/service-tokens/{id}",
            get(get_token).put(update_token).delete(delete_token),
        )
        .route("/service-tokens/{id}/rotate", post(rotate_token))
        .route("/service-tokens/{id}/revoke", post(revoke_token))
}

/// POST /auth/service-tokens — mint a token for the calling service
/// account. The response is the only time the raw secret appears.
async fn create_token(
    State(svc): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(input): Json<CreateServiceToken>,
) -> Result<(StatusCode, Json<ServiceTokenWithSecret>), ServiceError> {
    authorize(&ctx, "create", "service_token", &ctx.account_id)?;
    let (token, secret) = svc
        .create_service_token(&ctx.account_id, input)
        .map_err(ServiceError::from)?;
    Ok((
        StatusCode::CREATED,
        Json(ServiceTokenWithSecret { secret, token }),
    ))
}

#[derive(Debug, serde::Deserialize)]
struct TokenListQuery {
    /// Another account's tokens; requires `list:service_token:any`.
    account_id: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

/// GET /auth/service-tokens — list tokens, own by default.
async fn list_tokens(
    State(svc): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<TokenListQuery>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let account_id = query.account_id.as_deref().unwrap_or(&ctx.account_id);
    authorize(&ctx, "list", "service_token", account_id)?;

    let defaults = ListParams::default();
    let page = ListParams {
        limit: query.limit.unwrap_or(defaults.limit),
        offset: query.offset.unwrap_or(defaults.offset),
    };
    let result = svc
        .list_service_tokens(account_id, &page)
        .map_err(ServiceError::from)?;
    Ok(Json(serde_json::json!({
        "items": result.items,
        "total": result.total,
    })))
}

/// GET /auth/service-tokens/stats — usage stats for the caller's tokens.
async fn token_stats(
    State(svc): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    authorize(&ctx, "read", "service_token", &ctx.account_id)?;
    let stats = svc
        .service_token_stats(&ctx.account_id)
        .map_err(ServiceError::from)?;
    Ok(Json(serde_json::to_value(stats).unwrap_or_default()))
}

async fn get_token(
    State(svc): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let token = svc.get_service_token(&id).map_err(ServiceError::from)?;
    authorize(&ctx, "read", "service_token", &token.account_id)?;
    Ok(Json(serde_json::to_value(token).unwrap_or_default()))
}

async fn update_token(
    State(svc): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
    Json(input): Json<UpdateServiceToken>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let token = svc.get_service_token(&id).map_err(ServiceError::from)?;
    authorize(&ctx, "update", "service_token", &token.account_id)?;
    let updated = svc
        .update_service_token(&id, input)
        .map_err(ServiceError::from)?;
    Ok(Json(serde_json::to_value(updated).unwrap_or_default()))
}

/// POST /auth/service-tokens/{id}/rotate — swap the secret; the old one
/// stops working immediately.
async fn rotate_token(
    State(svc): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
    Json(input): Json<RotateServiceToken>,
) -> Result<Json<ServiceTokenWithSecret>, ServiceError> {
    let token = svc.get_service_token(&id).map_err(ServiceError::from)?;
    authorize(&ctx, "update", "service_token", &token.account_id)?;
    let (token, secret) = svc
        .rotate_service_token(&id, input)
        .map_err(ServiceError::from)?;
    Ok(Json(ServiceTokenWithSecret { secret, token }))
}

/// POST /auth/service-tokens/{id}/revoke — idempotent soft disable.
async fn revoke_token(
    State(svc): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let token = svc.get_service_token(&id).map_err(ServiceError::from)?;
    authorize(&ctx, "update", "service_token", &token.account_id)?;
    let revoked = svc.revoke_service_token(&id).map_err(ServiceError::from)?;
    Ok(Json(serde_json::to_value(revoked).unwrap_or_default()))
}

async fn delete_token(
    State(svc): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, ServiceError> {
    let token = svc.get_service_token(&id).map_err(ServiceError::from)?;
    authorize(&ctx, "delete", "service_token", &token.account_id)?;
    svc.delete_service_token(&id).map_err(ServiceError::from)?;
    Ok(StatusCode::NO_CONTENT)
}
