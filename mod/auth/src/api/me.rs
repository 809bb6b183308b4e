use axum::extract::{Extension, Query, State};
use axum::routing::get;
use axum::{Json, Router};

use verisafe_core::ServiceError;

use crate::api::AppState;
use crate::model::AuthContext;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(me))
        .route("/me/identities", get(my_identities))
        .route("/check", get(check_permission))
}

/// GET /auth/me — the caller's account plus its resolved context.
async fn me(
    State(svc): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let account = svc.get_account(&ctx.account_id).map_err(ServiceError::from)?;
    Ok(Json(serde_json::json!({
        "account": account,
        "roles": ctx.roles,
        "permissions": ctx.permissions,
    })))
}

/// GET /auth/me/identities — external identity links on the caller's
/// account. Provider tokens are redacted.
async fn my_identities(
    State(svc): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let links = svc
        .list_identity_links(&ctx.account_id)
        .map_err(ServiceError::from)?;
    let items: Vec<serde_json::Value> = links
        .into_iter()
        .map(|l| {
            serde_json::json!({
                "id": l.id,
                "provider": l.provider,
                "external_id": l.external_id,
                "email": l.email,
                "name": l.name,
                "created_at": l.created_at,
            })
        })
        .collect();
    Ok(Json(serde_json::json!({"items": items})))
}

#[derive(Debug, serde::Deserialize)]
struct CheckParams {
    permission: String,
}

/// GET /auth/check?permission=read:doc:any
///
/// Returns { "allowed": true/false } against the caller's context.
async fn check_permission(
    Extension(ctx): Extension<AuthContext>,
    Query(params): Query<CheckParams>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "allowed": ctx.has(&params.permission),
    }))
}
