use serde::{Deserialize, Serialize};

/// Session token kind. Access tokens are short-lived; refresh tokens
/// are materially longer-lived and only good for minting a new pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// JWT claims payload for session tokens. Issued, never persisted.
///
/// Roles and permissions are deliberately NOT embedded: the authenticator
/// re-reads the role graph on every request, so assignment changes take
/// effect without waiting for token expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: account id.
    pub sub: String,

    /// Issuer.
    pub iss: String,

    /// Audience.
    pub aud: String,

    /// Issued at (unix timestamp).
    pub iat: i64,

    /// Expiration (unix timestamp). Always strictly after `iat`.
    pub exp: i64,

    /// Token kind tag.
    pub kind: TokenKind,
}

/// Token pair returned after login or refresh.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

/// Request body for token refresh.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}
