use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rotation policy attached to a service token. The rotation-due sweep
/// only marks tokens; actual rotation stays an explicit caller action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationPolicy {
    #[serde(default)]
    pub auto_rotate: bool,

    /// Days between rotations when `auto_rotate` is set.
    pub rotation_interval_days: i64,

    /// Days before the interval elapses at which to start notifying.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_before_days: Option<i64>,
}

/// A long-lived machine credential. The raw secret is never stored —
/// only its digest, which lives in an indexed column outside this
/// record, so serializing a token can never leak secret material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceToken {
    /// Token id (UUIDv4, no dashes).
    pub id: String,

    /// Owning account. Must be a service-kind account.
    pub account_id: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// RFC 3339 expiry. Unset means no time limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,

    /// Set when revoked (terminal). Expiry sweep sets this too.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<String>,

    /// Set on each rotation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotated_at: Option<String>,

    /// Updated on each successful validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<String>,

    /// Optional permission scope narrowing for this credential.
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Usage cap. `use_count` never exceeds this when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_uses: Option<i64>,

    /// Monotonically increasing use counter.
    #[serde(default)]
    pub use_count: i64,

    /// When non-empty, the requesting IP must match an entry.
    #[serde(default)]
    pub ip_whitelist: Vec<String>,

    /// When set, the request's user agent must match this regex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent_pattern: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation_policy: Option<RotationPolicy>,

    /// Opaque metadata. The rotation-due sweep sets `needs_rotation` here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,

    pub created_at: String,
}

impl ServiceToken {
    /// Whether expiry has passed at `now`. Unset expiry never expires.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at.as_deref() {
            Some(ts) => match DateTime::parse_from_rfc3339(ts) {
                Ok(exp) => exp <= now,
                // Unparseable expiry counts as expired: fail closed.
                Err(_) => true,
            },
            None => false,
        }
    }

    /// Whether the usage cap is exhausted.
    pub fn is_used_up(&self) -> bool {
        matches!(self.max_uses, Some(max) if self.use_count >= max)
    }

    /// Active iff not revoked, not expired, and under the usage cap.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && !self.is_expired(now) && !self.is_used_up()
    }

    /// Whether the rotation policy says this token's rotation is overdue
    /// at `now`, measured from the last rotation (or creation).
    pub fn rotation_due(&self, now: DateTime<Utc>) -> bool {
        let Some(policy) = &self.rotation_policy else {
            return false;
        };
        if !policy.auto_rotate {
            return false;
        }
        let since = self.rotated_at.as_deref().unwrap_or(&self.created_at);
        match DateTime::parse_from_rfc3339(since) {
            Ok(ts) => now - ts.with_timezone(&Utc)
                >= chrono::Duration::days(policy.rotation_interval_days),
            Err(_) => false,
        }
    }

    /// Whether the rotation-due sweep has flagged this token.
    pub fn needs_rotation(&self) -> bool {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("needs_rotation"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// Input for creating a service token.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateServiceToken {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Days until expiry. Defaults to one year.
    #[serde(default)]
    pub expires_in_days: Option<i64>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub max_uses: Option<i64>,
    #[serde(default)]
    pub rotation_policy: Option<RotationPolicy>,
    #[serde(default)]
    pub ip_whitelist: Vec<String>,
    #[serde(default)]
    pub user_agent_pattern: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Input for updating a service token. `None` leaves a field unchanged;
/// the secret digest is never updatable through this path.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateServiceToken {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
    #[serde(default)]
    pub max_uses: Option<i64>,
    #[serde(default)]
    pub rotation_policy: Option<RotationPolicy>,
    #[serde(default)]
    pub ip_whitelist: Option<Vec<String>>,
    #[serde(default)]
    pub user_agent_pattern: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Request body for explicit rotation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RotateServiceToken {
    /// New expiry in days from now. Unset preserves the current expiry.
    #[serde(default)]
    pub expires_in_days: Option<i64>,
}

/// Create/rotate response: the only two places the raw secret appears.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceTokenWithSecret {
    /// One-time raw secret. Not retrievable again.
    pub secret: String,
    #[serde(flatten)]
    pub token: ServiceToken,
}

/// Usage statistics over an account's service tokens. Every token
/// falls into exactly one of the four state buckets.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceTokenStats {
    pub total_tokens: i64,
    pub active_tokens: i64,
    pub revoked_tokens: i64,
    pub expired_tokens: i64,
    /// Not revoked or expired, but the usage cap is spent.
    pub exhausted_tokens: i64,
    /// Tokens used within the last 24 hours.
    pub recently_used_tokens: i64,
}
