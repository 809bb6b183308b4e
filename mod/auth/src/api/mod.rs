mod accounts;
mod identity;
mod me;
mod middleware;
mod tokens;

use std::sync::Arc;

use axum::Router;

use verisafe_core::ServiceError;

use crate::model::AuthContext;
use crate::service::AuthService;

/// Shared application state.
pub type AppState = Arc<AuthService>;

/// Build the complete auth API router.
///
/// All routes are relative — the caller nests them under `/auth`.
pub fn build_router(svc: Arc<AuthService>) -> Router {
    let api = Router::new()
        .merge(accounts::routes())
        .merge(tokens::routes())
        .merge(identity::routes())
        .merge(me::routes());

    Router::new()
        .nest("/auth", api)
        .layer(axum::middleware::from_fn_with_state(
            svc.clone(),
            middleware::auth_middleware,
        ))
        .with_state(svc)
}

/// Ownership-aware permission check: `{verb}:{resource}:any` allows the
/// action on any record; `{verb}:{resource}:own` only on records the
/// caller owns.
pub(crate) fn authorize(
    ctx: &AuthContext,
    verb: &str,
    resource: &str,
    owner_id: &str,
) -> Result<(), ServiceError> {
    if ctx.has(&format!("{}:{}:any", verb, resource)) {
        return Ok(());
    }
    if ctx.account_id == owner_id && ctx.has(&format!("{}:{}:own", verb, resource)) {
        return Ok(());
    }
    Err(ServiceError::PermissionDenied(
        "you do not have the necessary permissions to perform this action".into(),
    ))
}
