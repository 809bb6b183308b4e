use std::net::IpAddr;

use axum::extract::State;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use verisafe_core::ServiceError;

use crate::api::AppState;
use crate::service::authenticate::Credential;

/// Paths that don't require authentication.
const PUBLIC_PATHS: &[&str] = &[
    "/auth/identity/resolve",
    "/auth/token/refresh",
];

/// Dual-path authentication middleware.
///
/// Session callers present `Authorization: Bearer <jwt>`; machine
/// callers present `X-API-Key: <secret>`. When both are present the
/// bearer token wins. On success the resolved [`AuthContext`] is stored
/// as a request extension for handlers; on failure the response is a
/// generic 401 that never reveals which check rejected the credential.
///
/// [`AuthContext`]: crate::model::AuthContext
pub async fn auth_middleware(
    State(svc): State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    if is_public_path(&path) {
        return next.run(req).await;
    }

    let headers = req.headers();
    let credential = match extract_credential(headers) {
        Some(c) => c,
        None => {
            return ServiceError::Unauthenticated("missing credentials".into())
                .into_response();
        }
    };
    let ip = client_ip(headers);
    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match svc.authenticate(&credential, ip, user_agent.as_deref()) {
        Ok(ctx) => {
            req.extensions_mut().insert(ctx);
            next.run(req).await
        }
        Err(e) => ServiceError::from(e).into_response(),
    }
}

fn extract_credential(headers: &HeaderMap) -> Option<Credential> {
    if let Some(token) = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(Credential::Session(token.to_string()));
    }
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| Credential::ServiceSecret(v.to_string()))
}

/// Client address for IP-whitelist checks: the first entry of
/// X-Forwarded-For, set by the fronting proxy.
fn client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok())
}

/// Check if a path is public (no auth required).
fn is_public_path(path: &str) -> bool {
    PUBLIC_PATHS.iter().any(|p| path == *p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_wins_over_api_key() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer jwt-here"));
        headers.insert("x-api-key", HeaderValue::from_static("vst_secret"));
        assert!(matches!(
            extract_credential(&headers),
            Some(Credential::Session(t)) if t == "jwt-here"
        ));
    }

    #[test]
    fn api_key_alone_is_a_service_credential() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("vst_secret"));
        assert!(matches!(
            extract_credential(&headers),
            Some(Credential::ServiceSecret(s)) if s == "vst_secret"
        ));
    }

    #[test]
    fn forwarded_for_takes_the_first_hop()  {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("10.0.0.5, 172.16.0.1"),
        );
        assert_eq!(client_ip(&headers), Some("10.0.0.5".parse().unwrap()));
        assert_eq!(client_ip(&HeaderMap::new()), None);
    }

    #[test]
    fn public_paths_match_exactly() {
        assert!(is_public_path("/auth/identity/resolve"));
        assert!(is_public_path("/auth/token/refresh"));
        assert!(!is_public_path("/auth/service-tokens"));
        assert!(!is_public_path("/auth/identity/resolve/extra"));
    }
}
