use serde::Serialize;

use crate::service::AuthError;

/// Request-scoped authorization context: the resolved identity plus its
/// current roles and flattened permissions. Built once per request by
/// the authenticator and never mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct AuthContext {
    pub account_id: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

impl AuthContext {
    /// Require every listed permission. All-of semantics: missing any one
    /// rejects with a Forbidden error, distinct from authentication failure.
    pub fn require(&self, permissions: &[&str]) -> Result<(), AuthError> {
        for required in permissions {
            if !self.permissions.iter().any(|p| p == required) {
                return Err(AuthError::Forbidden(
                    "you do not have the necessary permissions to perform this action".into(),
                ));
            }
        }
        Ok(())
    }

    /// Whether the context holds a single permission. Used for
    /// own-vs-any ownership escapes in handlers.
    pub fn has(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}
