use serde::{Deserialize, Serialize};

/// Kind of account: an end user or a machine identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    Human,
    Service,
}

/// A local account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Account id (UUIDv4, no dashes).
    pub id: String,

    /// Display name.
    pub name: String,

    /// Email (unique when set; service accounts may omit it).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    pub kind: AccountKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,

    /// Deactivated accounts cannot authenticate.
    #[serde(default = "default_true")]
    pub active: bool,

    /// RFC 3339 timestamps.
    pub created_at: String,
    pub updated_at: String,
}

fn default_true() -> bool {
    true
}

/// Input for creating an account.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateAccount {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    pub kind: AccountKind,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Input for registering a role with its permission set.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRole {
    /// Role name, also its id (e.g. "service_token_admin").
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub permissions: Vec<String>,
}

/// A role: a named permission set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub permissions: Vec<String>,
    pub created_at: String,
}
