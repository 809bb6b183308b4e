use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};

use verisafe_core::ServiceError;

use crate::api::{authorize, AppState};
use crate::model::{AuthContext, CreateAccount, CreateRole, CreateServiceToken};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/accounts", post(create_account))
        .route("/accounts/service", post(create_service_account))
        .route("/accounts/{id}", get(get_account))
        .route("/accounts/{id}/roles/{role}", post(assign_role))
        .route("/roles", post(create_role))
}

async fn create_account(
    State(svc): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(input): Json<CreateAccount>,
) -> Result<(StatusCode, Json<serde_json::Value>), ServiceError> {
    ctx.require(&["create:account:any"]).map_err(ServiceError::from)?;
    let account = svc.create_account(input).map_err(ServiceError::from)?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::to_value(account).unwrap_or_default()),
    ))
}

#[derive(Debug, serde::Deserialize)]
struct CreateServiceAccountRequest {
    account: CreateAccount,
    token: CreateServiceToken,
}

/// POST /auth/accounts/service — provision a service account together
/// with its first token, atomically. The raw secret appears only here.
async fn create_service_account(
    State(svc): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(input): Json<CreateServiceAccountRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ServiceError> {
    ctx.require(&["create:account:any"]).map_err(ServiceError::from)?;
    let (account, token, secret) = svc
        .create_service_account(input.account, input.token)
        .map_err(ServiceError::from)?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "account": account,
            "token": token,
            "secret": secret,
        })),
    ))
}

async fn get_account(
    State(svc): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    authorize(&ctx, "read", "account", &id)?;
    let account = svc.get_account(&id).map_err(ServiceError::from)?;
    Ok(Json(serde_json::to_value(account).unwrap_or_default()))
}

async fn create_role(
    State(svc): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(input): Json<CreateRole>,
) -> Result<(StatusCode, Json<serde_json::Value>), ServiceError> {
    ctx.require(&["create:role:any"]).map_err(ServiceError::from)?;
    let role = svc.create_role(input).map_err(ServiceError::from)?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::to_value(role).unwrap_or_default()),
    ))
}

async fn assign_role(
    State(svc): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path((id, role)): Path<(String, String)>,
) -> Result<StatusCode, ServiceError> {
    ctx.require(&["update:account_role:any"])
        .map_err(ServiceError::from)?;
    svc.assign_role(&id, &role).map_err(ServiceError::from)?;
    Ok(StatusCode::NO_CONTENT)
}
