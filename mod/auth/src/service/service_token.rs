use std::net::IpAddr;
use std::sync::OnceLock;

use chrono::{Duration, Utc};
use regex::Regex;
use tracing::{debug, info};

use verisafe_core::{new_id, now_rfc3339, ListParams, ListResult};
use verisafe_sql::Value;

use crate::model::{
    Account, AccountKind, CreateAccount, CreateServiceToken, RotateServiceToken, ServiceToken,
    ServiceTokenStats, UpdateServiceToken,
};
use crate::service::{build_insert, AuthError, AuthService};

/// The one message every failed validation collapses into. Disclosing
/// the specific reason would hand attackers a verification oracle.
const INVALID_TOKEN: &str = "invalid or expired service token";

fn invalid() -> AuthError {
    AuthError::Unauthorized(INVALID_TOKEN.into())
}

fn scope_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9:._-]+$").unwrap())
}

impl AuthService {
    /// Create a service token for an existing service-kind account.
    /// Returns the persisted record together with the one-time raw secret.
    pub fn create_service_token(
        &self,
        owner_account_id: &str,
        input: CreateServiceToken,
    ) -> Result<(ServiceToken, String), AuthError> {
        let owner = self.get_account(owner_account_id)?;
        if owner.kind != AccountKind::Service {
            return Err(AuthError::Forbidden(
                "only service accounts can own service tokens".into(),
            ));
        }

        validate_token_input(&input)?;

        let secret = self.generate_service_secret();
        let digest = crate::service::hasher::digest_secret(&secret);

        let now = Utc::now();
        let ttl_days = input.expires_in_days.unwrap_or(self.config.service_token_ttl_days);
        let token = ServiceToken {
            id: new_id(),
            account_id: owner.id.clone(),
            name: input.name,
            description: input.description,
            expires_at: Some((now + Duration::days(ttl_days)).to_rfc3339()),
            revoked_at: None,
            rotated_at: None,
            last_used_at: None,
            scopes: input.scopes,
            max_uses: input.max_uses,
            use_count: 0,
            ip_whitelist: input.ip_whitelist,
            user_agent_pattern: input.user_agent_pattern,
            rotation_policy: input.rotation_policy,
            metadata: input.metadata,
            created_at: now.to_rfc3339(),
        };

        self.insert_record(
            "service_tokens",
            &token.id,
            &token,
            &token_insert_indexes(&token, &digest),
        )?;

        info!(token_id = %token.id, account_id = %owner.id, "service token created");
        Ok((token, secret))
    }

    /// Create a service account together with its first token, in one
    /// transaction: neither record exists without the other.
    pub fn create_service_account(
        &self,
        account: CreateAccount,
        token_input: CreateServiceToken,
    ) -> Result<(Account, ServiceToken, String), AuthError> {
        if account.kind != AccountKind::Service {
            return Err(AuthError::Validation(
                "account kind must be service".into(),
            ));
        }
        if account.name.trim().is_empty() {
            return Err(AuthError::Validation("account name is required".into()));
        }
        validate_token_input(&token_input)?;

        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let owner = Account {
            id: new_id(),
            name: account.name,
            email: account.email,
            kind: AccountKind::Service,
            avatar_url: account.avatar_url,
            active: true,
            created_at: now_str.clone(),
            updated_at: now_str,
        };

        let secret = self.generate_service_secret();
        let digest = crate::service::hasher::digest_secret(&secret);
        let ttl_days = token_input
            .expires_in_days
            .unwrap_or(self.config.service_token_ttl_days);
        let token = ServiceToken {
            id: new_id(),
            account_id: owner.id.clone(),
            name: token_input.name,
            description: token_input.description,
            expires_at: Some((now + Duration::days(ttl_days)).to_rfc3339()),
            revoked_at: None,
            rotated_at: None,
            last_used_at: None,
            scopes: token_input.scopes,
            max_uses: token_input.max_uses,
            use_count: 0,
            ip_whitelist: token_input.ip_whitelist,
            user_agent_pattern: token_input.user_agent_pattern,
            rotation_policy: token_input.rotation_policy,
            metadata: token_input.metadata,
            created_at: now.to_rfc3339(),
        };

        let account_stmt = build_insert(
            "accounts",
            &owner.id,
            &owner,
            &crate::service::account::account_indexes(&owner),
        )?;
        let token_stmt = build_insert(
            "service_tokens",
            &token.id,
            &token,
            &token_insert_indexes(&token, &digest),
        )?;

        self.sql
            .exec_tx(&[account_stmt, token_stmt])
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("UNIQUE constraint") {
                    AuthError::Conflict(msg)
                } else {
                    AuthError::Storage(msg)
                }
            })?;

        info!(account_id = %owner.id, token_id = %token.id, "service account created");
        Ok((owner, token, secret))
    }

    /// Get a service token by id. Never includes secret material.
    pub fn get_service_token(&self, id: &str) -> Result<ServiceToken, AuthError> {
        self.get_record("service_tokens", id)
    }

    /// List an account's service tokens, newest first.
    pub fn list_service_tokens(
        &self,
        account_id: &str,
        params: &ListParams,
    ) -> Result<ListResult<ServiceToken>, AuthError> {
        let count_rows = self
            .sql
            .query(
                "SELECT COUNT(*) AS cnt FROM service_tokens WHERE account_id = ?1",
                &[Value::Text(account_id.to_string())],
            )
            .map_err(|e| AuthError::Storage(e.to_string()))?;
        let total = count_rows.first().and_then(|r| r.get_i64("cnt")).unwrap_or(0) as usize;

        let rows = self
            .sql
            .query(
                "SELECT data FROM service_tokens WHERE account_id = ?1
                 ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
                &[
                    Value::Text(account_id.to_string()),
                    Value::Integer(params.limit as i64),
                    Value::Integer(params.offset as i64),
                ],
            )
            .map_err(|e| AuthError::Storage(e.to_string()))?;

        let mut items = Vec::new();
        for row in &rows {
            let data = row
                .get_str("data")
                .ok_or_else(|| AuthError::Internal("missing data column".into()))?;
            items.push(
                serde_json::from_str(data).map_err(|e| AuthError::Internal(e.to_string()))?,
            );
        }
        Ok(ListResult { items, total })
    }

    /// Update a token's policy fields. The secret digest is not
    /// reachable through this path; use rotation for that.
    pub fn update_service_token(
        &self,
        id: &str,
        input: UpdateServiceToken,
    ) -> Result<ServiceToken, AuthError> {
        let mut token: ServiceToken = self.get_record("service_tokens", id)?;

        if let Some(name) = input.name {
            if name.trim().is_empty() {
                return Err(AuthError::Validation("token name cannot be empty".into()));
            }
            token.name = name;
        }
        if let Some(description) = input.description {
            token.description = Some(description);
        }
        if let Some(scopes) = input.scopes {
            validate_scopes(&scopes)?;
            token.scopes = scopes;
        }
        if let Some(max_uses) = input.max_uses {
            if max_uses < 1 {
                return Err(AuthError::Validation("max_uses must be at least 1".into()));
            }
            token.max_uses = Some(max_uses);
        }
        if let Some(policy) = input.rotation_policy {
            token.rotation_policy = Some(policy);
        }
        if let Some(ips) = input.ip_whitelist {
            validate_ip_whitelist(&ips)?;
            token.ip_whitelist = ips;
        }
        if let Some(pattern) = input.user_agent_pattern {
            validate_user_agent_pattern(&pattern)?;
            token.user_agent_pattern = Some(pattern);
        }
        if let Some(metadata) = input.metadata {
            token.metadata = Some(metadata);
        }

        self.write_token_policy(&token)?;
        // Re-read: a validation racing this update may have advanced
        // the counters since our snapshot.
        self.get_record("service_tokens", &token.id)
    }

    /// Persist a policy update without touching the usage counters. The
    /// incoming record is a point-in-time snapshot; overlaying the live
    /// `use_count` column and stored `last_used_at` keeps a validation
    /// that lands mid-update from being erased in the JSON view.
    pub(crate) fn write_token_policy(&self, token: &ServiceToken) -> Result<(), AuthError> {
        let json =
            serde_json::to_string(token).map_err(|e| AuthError::Internal(e.to_string()))?;
        let affected = self
            .sql
            .exec(
                "UPDATE service_tokens
                 SET data = json_set(?1, '$.use_count', use_count,
                                         '$.last_used_at',
                                         json_extract(data, '$.last_used_at')),
                     max_uses = ?2,
                     revoked_at = ?3
                 WHERE id = ?4",
                &[
                    Value::Text(json),
                    token.max_uses.map(Value::Integer).unwrap_or(Value::Null),
                    token
                        .revoked_at
                        .clone()
                        .map(Value::Text)
                        .unwrap_or(Value::Null),
                    Value::Text(token.id.clone()),
                ],
            )
            .map_err(|e| AuthError::Storage(e.to_string()))?;
        if affected == 0 {
            return Err(AuthError::NotFound(format!("service_tokens/{}", token.id)));
        }
        Ok(())
    }

    /// Verify a presented raw secret against its stored record and the
    /// token's usage constraints. Fails closed: lookup errors and every
    /// failed check produce the same generic unauthorized outcome. On
    /// success the use counter and last-used timestamp advance through
    /// one guarded UPDATE, so concurrent calls can never exceed the cap.
    pub fn validate_service_secret(
        &self,
        raw_secret: &str,
        request_ip: Option<IpAddr>,
        request_user_agent: Option<&str>,
    ) -> Result<ServiceToken, AuthError> {
        let digest = crate::service::hasher::digest_secret(raw_secret);

        let rows = self
            .sql
            .query(
                "SELECT data FROM service_tokens WHERE digest = ?1",
                &[Value::Text(digest.clone())],
            )
            .map_err(|e| {
                debug!(error = %e, "service token lookup failed");
                invalid()
            })?;

        let data = rows.first().and_then(|r| r.get_str("data")).ok_or_else(|| {
            debug!("service token digest not found");
            invalid()
        })?;
        let mut token: ServiceToken = serde_json::from_str(data).map_err(|e| {
            debug!(error = %e, "service token record corrupt");
            invalid()
        })?;

        let now = Utc::now();
        if token.revoked_at.is_some() {
            debug!(token_id = %token.id, "service token revoked");
            return Err(invalid());
        }
        if token.is_expired(now) {
            debug!(token_id = %token.id, "service token expired");
            return Err(invalid());
        }
        if token.is_used_up() {
            debug!(token_id = %token.id, "service token usage cap reached");
            return Err(invalid());
        }
        if !token.ip_whitelist.is_empty() {
            let allowed = match request_ip {
                Some(ip) => token
                    .ip_whitelist
                    .iter()
                    .any(|entry| entry.parse::<IpAddr>().map(|a| a == ip).unwrap_or(false)),
                None => false,
            };
            if !allowed {
                debug!(token_id = %token.id, "request IP not in whitelist");
                return Err(invalid());
            }
        }
        if let Some(pattern) = token.user_agent_pattern.as_deref() {
            let matched = match (Regex::new(pattern), request_user_agent) {
                (Ok(re), Some(ua)) => re.is_match(ua),
                // Uncompilable stored pattern or absent UA: fail closed.
                _ => false,
            };
            if !matched {
                debug!(token_id = %token.id, "user agent rejected");
                return Err(invalid());
            }
        }

        // Guarded increment: the WHERE clause re-checks the digest, the
        // cap and revocation so racing calls cannot over-count past
        // max_uses, and a rotation landing between the lookup and this
        // statement leaves the retired secret with zero matching rows.
        let now_str = now.to_rfc3339();
        let affected = self
            .sql
            .exec(
                "UPDATE service_tokens
                 SET use_count = use_count + 1,
                     data = json_set(data, '$.use_count', use_count + 1,
                                           '$.last_used_at', ?1)
                 WHERE id = ?2
                   AND digest = ?3
                   AND revoked_at IS NULL
                   AND (max_uses IS NULL OR use_count < max_uses)",
                &[
                    Value::Text(now_str.clone()),
                    Value::Text(token.id.clone()),
                    Value::Text(digest),
                ],
            )
            .map_err(|e| {
                debug!(error = %e, "use counter update failed");
                invalid()
            })?;

        if affected == 0 {
            debug!(token_id = %token.id, "service token lost the usage race");
            return Err(invalid());
        }

        token.use_count += 1;
        token.last_used_at = Some(now_str);
        Ok(token)
    }

    /// Replace a token's secret. Resets the use counter, clears the
    /// last-used timestamp and any needs-rotation flag, and records the
    /// rotation time. The previous secret is invalid from here on.
    pub fn rotate_service_token(
        &self,
        id: &str,
        input: RotateServiceToken,
    ) -> Result<(ServiceToken, String), AuthError> {
        let mut token: ServiceToken = self.get_record("service_tokens", id)?;
        if token.revoked_at.is_some() {
            return Err(AuthError::Validation(
                "cannot rotate a revoked token".into(),
            ));
        }

        let now = Utc::now();
        let secret = self.generate_service_secret();
        let digest = crate::service::hasher::digest_secret(&secret);

        token.use_count = 0;
        token.last_used_at = None;
        token.rotated_at = Some(now.to_rfc3339());
        if let Some(days) = input.expires_in_days {
            if days < 1 {
                return Err(AuthError::Validation(
                    "expires_in_days must be at least 1".into(),
                ));
            }
            token.expires_at = Some((now + Duration::days(days)).to_rfc3339());
        }
        if let Some(metadata) = token.metadata.as_mut() {
            if let Some(map) = metadata.as_object_mut() {
                map.remove("needs_rotation");
            }
        }

        self.update_record(
            "service_tokens",
            id,
            &token,
            &[
                ("digest", Value::Text(digest)),
                ("use_count", Value::Integer(0)),
                (
                    "expires_at",
                    token
                        .expires_at
                        .clone()
                        .map(Value::Text)
                        .unwrap_or(Value::Null),
                ),
            ],
        )?;

        info!(token_id = %id, "service token rotated");
        Ok((token, secret))
    }

    /// Set the revocation timestamp. Idempotent: revoking an already
    /// revoked token changes nothing and is not an error.
    pub fn revoke_service_token(&self, id: &str) -> Result<ServiceToken, AuthError> {
        let mut token: ServiceToken = self.get_record("service_tokens", id)?;
        if token.revoked_at.is_some() {
            return Ok(token);
        }

        token.revoked_at = Some(now_rfc3339());
        self.write_token_policy(&token)?;

        info!(token_id = %id, "service token revoked");
        self.get_record("service_tokens", id)
    }

    /// Permanently remove a token record. Distinct from revocation.
    pub fn delete_service_token(&self, id: &str) -> Result<(), AuthError> {
        self.delete_record("service_tokens", id)?;
        info!(token_id = %id, "service token deleted");
        Ok(())
    }

    /// Usage statistics over one account's tokens.
    pub fn service_token_stats(&self, account_id: &str) -> Result<ServiceTokenStats, AuthError> {
        let rows = self
            .sql
            .query(
                "SELECT data FROM service_tokens WHERE account_id = ?1",
                &[Value::Text(account_id.to_string())],
            )
            .map_err(|e| AuthError::Storage(e.to_string()))?;

        let now = Utc::now();
        let recent_cutoff = now - Duration::hours(24);
        let mut stats = ServiceTokenStats {
            total_tokens: 0,
            active_tokens: 0,
            revoked_tokens: 0,
            expired_tokens: 0,
            exhausted_tokens: 0,
            recently_used_tokens: 0,
        };

        for row in &rows {
            let Some(data) = row.get_str("data") else { continue };
            let Ok(token) = serde_json::from_str::<ServiceToken>(data) else { continue };

            stats.total_tokens += 1;
            if token.revoked_at.is_some() {
                stats.revoked_tokens += 1;
            } else if token.is_expired(now) {
                stats.expired_tokens += 1;
            } else if token.is_used_up() {
                stats.exhausted_tokens += 1;
            } else {
                stats.active_tokens += 1;
            }
            if let Some(used) = token.last_used_at.as_deref() {
                if let Ok(ts) = chrono::DateTime::parse_from_rfc3339(used) {
                    if ts.with_timezone(&Utc) >= recent_cutoff {
                        stats.recently_used_tokens += 1;
                    }
                }
            }
        }
        Ok(stats)
    }

    // ── Periodic sweeps (invoked by the background loops) ──

    /// Soft-revoke every token whose expiry has passed. Never deletes.
    /// Returns the number of tokens revoked.
    pub fn sweep_expired(&self) -> Result<u64, AuthError> {
        let now = now_rfc3339();
        let affected = self
            .sql
            .exec(
                "UPDATE service_tokens
                 SET revoked_at = ?1,
                     data = json_set(data, '$.revoked_at', ?1)
                 WHERE revoked_at IS NULL
                   AND expires_at IS NOT NULL
                   AND expires_at <= ?1",
                &[Value::Text(now)],
            )
            .map_err(|e| AuthError::Storage(e.to_string()))?;

        if affected > 0 {
            info!(count = affected, "expired service tokens revoked");
        }
        Ok(affected)
    }

    /// Flag active tokens whose auto-rotation interval has elapsed.
    /// Marking only — rotation itself stays an explicit caller action.
    /// Returns the number of tokens newly flagged.
    pub fn sweep_rotation_due(&self) -> Result<u64, AuthError> {
        let rows = self
            .sql
            .query(
                "SELECT id, data FROM service_tokens WHERE revoked_at IS NULL",
                &[],
            )
            .map_err(|e| AuthError::Storage(e.to_string()))?;

        let now = Utc::now();
        let mut marked = 0u64;
        for row in &rows {
            let Some(data) = row.get_str("data") else { continue };
            let Ok(mut token) = serde_json::from_str::<ServiceToken>(data) else { continue };

            if !token.is_active(now) || !token.rotation_due(now) || token.needs_rotation() {
                continue;
            }

            let metadata = token
                .metadata
                .get_or_insert_with(|| serde_json::json!({}));
            if let Some(map) = metadata.as_object_mut() {
                map.insert("needs_rotation".into(), serde_json::json!(true));
            }
            self.write_token_policy(&token)?;
            marked += 1;
        }

        if marked > 0 {
            info!(count = marked, "service tokens flagged for rotation");
        }
        Ok(marked)
    }
}

/// Indexed columns for a freshly inserted token record.
fn token_insert_indexes<'a>(
    token: &'a ServiceToken,
    digest: &'a str,
) -> Vec<(&'static str, Value)> {
    vec![
        ("account_id", Value::Text(token.account_id.clone())),
        ("digest", Value::Text(digest.to_string())),
        ("use_count", Value::Integer(token.use_count)),
        (
            "max_uses",
            token.max_uses.map(Value::Integer).unwrap_or(Value::Null),
        ),
        (
            "expires_at",
            token
                .expires_at
                .clone()
                .map(Value::Text)
                .unwrap_or(Value::Null),
        ),
        ("created_at", Value::Text(token.created_at.clone())),
    ]
}

fn validate_token_input(input: &CreateServiceToken) -> Result<(), AuthError> {
    if input.name.trim().is_empty() {
        return Err(AuthError::Validation("token name is required".into()));
    }
    if let Some(days) = input.expires_in_days {
        if !(1..=3650).contains(&days) {
            return Err(AuthError::Validation(
                "expires_in_days must be between 1 and 3650".into(),
            ));
        }
    }
    if let Some(max) = input.max_uses {
        if max < 1 {
            return Err(AuthError::Validation("max_uses must be at least 1".into()));
        }
    }
    validate_scopes(&input.scopes)?;
    validate_ip_whitelist(&input.ip_whitelist)?;
    if let Some(pattern) = input.user_agent_pattern.as_deref() {
        validate_user_agent_pattern(pattern)?;
    }
    Ok(())
}

fn validate_scopes(scopes: &[String]) -> Result<(), AuthError> {
    for scope in scopes {
        if !scope_pattern().is_match(scope) {
            return Err(AuthError::Validation(format!("invalid scope: {}", scope)));
        }
    }
    Ok(())
}

fn validate_ip_whitelist(ips: &[String]) -> Result<(), AuthError> {
    for ip in ips {
        if ip.parse::<IpAddr>().is_err() {
            return Err(AuthError::Validation(format!("invalid IP address: {}", ip)));
        }
    }
    Ok(())
}

fn validate_user_agent_pattern(pattern: &str) -> Result<(), AuthError> {
    Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| AuthError::Validation(format!("invalid user agent pattern: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::test_support::test_service;

    fn service_owner(svc: &AuthService) -> Account {
        svc.create_account(CreateAccount {
            name: "ci-bot".into(),
            email: None,
            kind: AccountKind::Service,
            avatar_url: None,
        })
        .unwrap()
    }

    fn basic_input(name: &str) -> CreateServiceToken {
        CreateServiceToken {
            name: name.into(),
            ..Default::default()
        }
    }

    #[test]
    fn create_then_validate_round_trip() {
        let svc = test_service();
        let owner = service_owner(&svc);

        let (token, secret) = svc
            .create_service_token(&owner.id, basic_input("deploy"))
            .unwrap();
        assert!(secret.starts_with("vst_"));
        assert_eq!(token.use_count, 0);
        assert!(token.expires_at.is_some());

        let validated = svc.validate_service_secret(&secret, None, None).unwrap();
        assert_eq!(validated.id, token.id);
        assert_eq!(validated.use_count, 1);
        assert!(validated.last_used_at.is_some());

        // The stored record reflects the counted use.
        let stored = svc.get_service_token(&token.id).unwrap();
        assert_eq!(stored.use_count, 1);
    }

    #[test]
    fn human_accounts_cannot_own_tokens() {
        let svc = test_service();
        let human = svc
            .create_account(CreateAccount {
                name: "Alice".into(),
                email: Some("alice@example.com".into()),
                kind: AccountKind::Human,
                avatar_url: None,
            })
            .unwrap();

        let err = svc
            .create_service_token(&human.id, basic_input("nope"))
            .unwrap_err();
        assert!(matches!(err, AuthError::Forbidden(_)));
    }

    #[test]
    fn unknown_secret_fails_closed_with_generic_message() {
        let svc = test_service();
        let err = svc
            .validate_service_secret("vst_never-issued", None, None)
            .unwrap_err();
        match err {
            AuthError::Unauthorized(msg) => assert_eq!(msg, INVALID_TOKEN),
            other => panic!("expected Unauthorized, got {:?}", other),
        }
    }

    #[test]
    fn max_uses_three_exact_scenario() {
        let svc = test_service();
        let owner = service_owner(&svc);
        let (token, secret) = svc
            .create_service_token(
                &owner.id,
                CreateServiceToken {
                    max_uses: Some(3),
                    ..basic_input("capped")
                },
            )
            .unwrap();

        for expected in 1..=3 {
            let t = svc.validate_service_secret(&secret, None, None).unwrap();
            assert_eq!(t.use_count, expected);
        }

        // Fourth call fails generically, counter stays at 3.
        let err = svc.validate_service_secret(&secret, None, None).unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized(_)));
        assert_eq!(svc.get_service_token(&token.id).unwrap().use_count, 3);
    }

    #[test]
    fn concurrent_validation_never_exceeds_cap() {
        let svc = test_service();
        let owner = service_owner(&svc);
        let (token, secret) = svc
            .create_service_token(
                &owner.id,
                CreateServiceToken {
                    max_uses: Some(5),
                    ..basic_input("raced")
                },
            )
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..12 {
            let svc = svc.clone();
            let secret = secret.clone();
            handles.push(std::thread::spawn(move || {
                svc.validate_service_secret(&secret, None, None).is_ok()
            }));
        }

        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap_or(false))
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 5);
        assert_eq!(svc.get_service_token(&token.id).unwrap().use_count, 5);
    }

    #[test]
    fn rotation_swaps_secrets_immediately() {
        let svc = test_service();
        let owner = service_owner(&svc);
        let (token, old_secret) = svc
            .create_service_token(&owner.id, basic_input("rotating"))
            .unwrap();

        // Burn a use so we can observe the reset.
        svc.validate_service_secret(&old_secret, None, None).unwrap();

        let (rotated, new_secret) = svc
            .rotate_service_token(&token.id, RotateServiceToken::default())
            .unwrap();
        assert_ne!(old_secret, new_secret);
        assert_eq!(rotated.use_count, 0);
        assert!(rotated.last_used_at.is_none());
        assert!(rotated.rotated_at.is_some());
        // Expiry preserved when not overridden.
        assert_eq!(rotated.expires_at, token.expires_at);

        assert!(svc.validate_service_secret(&old_secret, None, None).is_err());
        assert!(svc.validate_service_secret(&new_secret, None, None).is_ok());
    }

    #[test]
    fn retired_digest_cannot_win_the_use_race() {
        let svc = test_service();
        let owner = service_owner(&svc);
        let (token, old_secret) = svc
            .create_service_token(&owner.id, basic_input("swapped"))
            .unwrap();
        let old_digest = crate::service::hasher::digest_secret(&old_secret);

        // A rotation can land after a validator has already looked the
        // row up by the old digest. The validator's guarded UPDATE is
        // keyed on that digest, so it must then match nothing.
        svc.rotate_service_token(&token.id, RotateServiceToken::default())
            .unwrap();

        let affected = svc
            .sql
            .exec(
                "UPDATE service_tokens
                 SET use_count = use_count + 1,
                     data = json_set(data, '$.use_count', use_count + 1,
                                           '$.last_used_at', ?1)
                 WHERE id = ?2
                   AND digest = ?3
                   AND revoked_at IS NULL
                   AND (max_uses IS NULL OR use_count < max_uses)",
                &[
                    Value::Text(Utc::now().to_rfc3339()),
                    Value::Text(token.id.clone()),
                    Value::Text(old_digest),
                ],
            )
            .unwrap();
        assert_eq!(affected, 0);
        assert_eq!(svc.get_service_token(&token.id).unwrap().use_count, 0);
    }

    #[test]
    fn policy_write_preserves_live_counters() {
        let svc = test_service();
        let owner = service_owner(&svc);
        let (token, secret) = svc
            .create_service_token(&owner.id, basic_input("edited"))
            .unwrap();

        // Snapshot taken before a validation advances the counter.
        let mut stale = svc.get_service_token(&token.id).unwrap();
        svc.validate_service_secret(&secret, None, None).unwrap();

        stale.description = Some("updated while in use".into());
        svc.write_token_policy(&stale).unwrap();

        let stored = svc.get_service_token(&token.id).unwrap();
        assert_eq!(stored.description.as_deref(), Some("updated while in use"));
        assert_eq!(stored.use_count, 1);
        assert!(stored.last_used_at.is_some());
    }

    #[test]
    fn revocation_is_idempotent_and_final() {
        let svc = test_service();
        let owner = service_owner(&svc);
        let (token, secret) = svc
            .create_service_token(&owner.id, basic_input("revoked"))
            .unwrap();

        let first = svc.revoke_service_token(&token.id).unwrap();
        let second = svc.revoke_service_token(&token.id).unwrap();
        assert_eq!(first.revoked_at, second.revoked_at);

        assert!(svc.validate_service_secret(&secret, None, None).is_err());
        let err = svc
            .rotate_service_token(&token.id, RotateServiceToken::default())
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
    }

    #[test]
    fn delete_is_distinct_from_revoke() {
        let svc = test_service();
        let owner = service_owner(&svc);
        let (token, _) = svc
            .create_service_token(&owner.id, basic_input("doomed"))
            .unwrap();

        svc.delete_service_token(&token.id).unwrap();
        assert!(matches!(
            svc.get_service_token(&token.id).unwrap_err(),
            AuthError::NotFound(_)
        ));
    }

    #[test]
    fn ip_whitelist_is_enforced() {
        let svc = test_service();
        let owner = service_owner(&svc);
        let (_, secret) = svc
            .create_service_token(
                &owner.id,
                CreateServiceToken {
                    ip_whitelist: vec!["10.0.0.5".into(), "192.168.1.1".into()],
                    ..basic_input("pinned")
                },
            )
            .unwrap();

        let allowed: IpAddr = "10.0.0.5".parse().unwrap();
        let denied: IpAddr = "10.0.0.6".parse().unwrap();

        assert!(svc.validate_service_secret(&secret, Some(allowed), None).is_ok());
        assert!(svc.validate_service_secret(&secret, Some(denied), None).is_err());
        // Whitelist present but no request IP: fail closed.
        assert!(svc.validate_service_secret(&secret, None, None).is_err());
    }

    #[test]
    fn user_agent_pattern_is_enforced() {
        let svc = test_service();
        let owner = service_owner(&svc);
        let (_, secret) = svc
            .create_service_token(
                &owner.id,
                CreateServiceToken {
                    user_agent_pattern: Some("^deploy-agent/".into()),
                    ..basic_input("ua")
                },
            )
            .unwrap();

        assert!(svc
            .validate_service_secret(&secret, None, Some("deploy-agent/2.1"))
            .is_ok());
        assert!(svc
            .validate_service_secret(&secret, None, Some("curl/8.0"))
            .is_err());
        assert!(svc.validate_service_secret(&secret, None, None).is_err());
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        let svc = test_service();
        let owner = service_owner(&svc);

        for input in [
            basic_input("   "),
            CreateServiceToken {
                scopes: vec!["bad scope!".into()],
                ..basic_input("s")
            },
            CreateServiceToken {
                ip_whitelist: vec!["999.1.2.3".into()],
                ..basic_input("i")
            },
            CreateServiceToken {
                user_agent_pattern: Some("(unclosed".into()),
                ..basic_input("p")
            },
            CreateServiceToken {
                max_uses: Some(0),
                ..basic_input("m")
            },
            CreateServiceToken {
                expires_in_days: Some(0),
                ..basic_input("e")
            },
        ] {
            let err = svc.create_service_token(&owner.id, input).unwrap_err();
            assert!(matches!(err, AuthError::Validation(_)));
        }
    }

    #[test]
    fn create_service_account_is_atomic() {
        let svc = test_service();
        let (account, token, secret) = svc
            .create_service_account(
                CreateAccount {
                    name: "pipeline".into(),
                    email: None,
                    kind: AccountKind::Service,
                    avatar_url: None,
                },
                basic_input("bootstrap"),
            )
            .unwrap();

        assert_eq!(token.account_id, account.id);
        assert!(svc.validate_service_secret(&secret, None, None).is_ok());
    }

    #[test]
    fn expired_token_rejected_then_swept() {
        let svc = test_service();
        let owner = service_owner(&svc);
        let (token, secret) = svc
            .create_service_token(&owner.id, basic_input("stale"))
            .unwrap();

        // Force the expiry into the past, as a long-lived deployment would see.
        let past = (Utc::now() - Duration::hours(2)).to_rfc3339();
        let mut expired = svc.get_service_token(&token.id).unwrap();
        expired.expires_at = Some(past.clone());
        svc.update_record(
            "service_tokens",
            &token.id,
            &expired,
            &[("expires_at", Value::Text(past))],
        )
        .unwrap();

        // Inactive at read time even though revoked_at is still unset.
        assert!(svc.validate_service_secret(&secret, None, None).is_err());
        assert!(svc.get_service_token(&token.id).unwrap().revoked_at.is_none());

        let swept = svc.sweep_expired().unwrap();
        assert_eq!(swept, 1);
        assert!(svc.get_service_token(&token.id).unwrap().revoked_at.is_some());

        // Idempotent on the next tick.
        assert_eq!(svc.sweep_expired().unwrap(), 0);
    }

    #[test]
    fn rotation_sweep_marks_but_does_not_rotate() {
        let svc = test_service();
        let owner = service_owner(&svc);
        let (token, secret) = svc
            .create_service_token(
                &owner.id,
                CreateServiceToken {
                    rotation_policy: Some(crate::model::RotationPolicy {
                        auto_rotate: true,
                        rotation_interval_days: 30,
                        notify_before_days: None,
                    }),
                    ..basic_input("auto")
                },
            )
            .unwrap();

        // Fresh token: nothing due.
        assert_eq!(svc.sweep_rotation_due().unwrap(), 0);

        // Age the token past its rotation interval.
        let mut aged = svc.get_service_token(&token.id).unwrap();
        aged.created_at = (Utc::now() - Duration::days(45)).to_rfc3339();
        svc.update_record("service_tokens", &token.id, &aged, &[]).unwrap();

        assert_eq!(svc.sweep_rotation_due().unwrap(), 1);
        let flagged = svc.get_service_token(&token.id).unwrap();
        assert!(flagged.needs_rotation());
        // Secret untouched: the sweep only marks.
        assert!(svc.validate_service_secret(&secret, None, None).is_ok());

        // Already flagged: not counted again.
        assert_eq!(svc.sweep_rotation_due().unwrap(), 0);

        // Rotation clears the flag.
        let (rotated, _) = svc
            .rotate_service_token(&token.id, RotateServiceToken::default())
            .unwrap();
        assert!(!rotated.needs_rotation());
    }

    #[test]
    fn stats_bucket_tokens_by_state() {
        let svc = test_service();
        let owner = service_owner(&svc);

        let (_active, secret) = svc
            .create_service_token(&owner.id, basic_input("active"))
            .unwrap();
        svc.validate_service_secret(&secret, None, None).unwrap();

        let (revoked, _) = svc
            .create_service_token(&owner.id, basic_input("revoked"))
            .unwrap();
        svc.revoke_service_token(&revoked.id).unwrap();

        // Cap spent but neither revoked nor expired.
        let (_, spent_secret) = svc
            .create_service_token(
                &owner.id,
                CreateServiceToken {
                    max_uses: Some(1),
                    ..basic_input("spent")
                },
            )
            .unwrap();
        svc.validate_service_secret(&spent_secret, None, None).unwrap();

        let stats = svc.service_token_stats(&owner.id).unwrap();
        assert_eq!(stats.total_tokens, 3);
        assert_eq!(stats.active_tokens, 1);
        assert_eq!(stats.revoked_tokens, 1);
        assert_eq!(stats.expired_tokens, 0);
        assert_eq!(stats.exhausted_tokens, 1);
        assert_eq!(stats.recently_used_tokens, 2);
        // Every token lands in exactly one bucket.
        assert_eq!(
            stats.total_tokens,
            stats.active_tokens
                + stats.revoked_tokens
                + stats.expired_tokens
                + stats.exhausted_tokens
        );
    }

    #[test]
    fn listing_never_exposes_secret_material() {
        let svc = test_service();
        let owner = service_owner(&svc);
        svc.create_service_token(&owner.id, basic_input("listed")).unwrap();

        let listed = svc
            .list_service_tokens(&owner.id, &verisafe_core::ListParams::default())
            .unwrap();
        assert_eq!(listed.total, 1);
        let json = serde_json::to_value(&listed.items[0]).unwrap();
        assert!(json.get("digest").is_none());
        assert!(json.get("secret").is_none());
    }
}
