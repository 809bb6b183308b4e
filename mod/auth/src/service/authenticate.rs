use std::net::IpAddr;

use tracing::debug;

use crate::model::{AuthContext, TokenKind};
use crate::service::{AuthError, AuthService};

/// A credential presented on a request. Sessions carry a signed JWT;
/// machine callers present the raw service-token secret.
#[derive(Debug, Clone)]
pub enum Credential {
    Session(String),
    ServiceSecret(String),
}

impl AuthService {
    /// Authenticate a request credential into an [`AuthContext`].
    ///
    /// Roles and permissions are read fresh from storage on every call,
    /// so a grant made after a token was issued is visible immediately
    /// and a revoked role disappears just as fast. Any storage failure
    /// along the way denies the request rather than defaulting open.
    pub fn authenticate(
        &self,
        credential: &Credential,
        request_ip: Option<IpAddr>,
        request_user_agent: Option<&str>,
    ) -> Result<AuthContext, AuthError> {
        match credential {
            Credential::Session(jwt) => {
                let claims = self.verify_session_token(jwt)?;
                if claims.kind != TokenKind::Access {
                    debug!("refresh token presented on the access path");
                    return Err(AuthError::Unauthorized("invalid or expired token".into()));
                }
                let account = self
                    .get_account(&claims.sub)
                    .map_err(|_| AuthError::Unauthorized("invalid or expired token".into()))?;
                if !account.active {
                    return Err(AuthError::Unauthorized("invalid or expired token".into()));
                }
                self.build_context(&account.id, None)
            }
            Credential::ServiceSecret(secret) => {
                let token =
                    self.validate_service_secret(secret, request_ip, request_user_agent)?;
                let scopes = if token.scopes.is_empty() {
                    None
                } else {
                    Some(token.scopes)
                };
                self.build_context(&token.account_id, scopes)
            }
        }
    }

    /// Assemble the context from the role graph. When a service token
    /// carries scopes, they narrow the owning account's permissions to
    /// the intersection; a scope the account does not hold grants
    /// nothing.
    fn build_context(
        &self,
        account_id: &str,
        scopes: Option<Vec<String>>,
    ) -> Result<AuthContext, AuthError> {
        let roles = self.list_role_names(account_id)?;
        let mut permissions = self.list_permission_names(account_id)?;
        if let Some(scopes) = scopes {
            permissions.retain(|p| scopes.contains(p));
        }
        Ok(AuthContext {
            account_id: account_id.to_string(),
            roles,
            permissions,
        })
    }
}
