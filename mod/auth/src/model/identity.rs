use serde::{Deserialize, Serialize};

/// A link between a provider-asserted external identity and a local
/// account, with a snapshot of the provider profile and tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalIdentity {
    /// Link id (UUIDv4, no dashes).
    pub id: String,

    /// Provider-scoped user id. Unique across all links.
    pub external_id: String,

    /// Provider name (e.g. "google").
    pub provider: String,

    /// Local account this identity is bound to.
    pub account_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,

    /// Provider OAuth tokens, stored for later delegated calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// RFC 3339 expiry of the provider access token, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_expires_at: Option<String>,

    pub created_at: String,
    pub updated_at: String,
}

/// An externally verified identity assertion, produced by the
/// out-of-scope provider handshake layer.
#[derive(Debug, Clone, Deserialize)]
pub struct ExternalAssertion {
    pub external_id: String,
    pub provider: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_expires_at: Option<String>,
}
