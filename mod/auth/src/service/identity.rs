use tracing::{info, warn};

use verisafe_core::{new_id, now_rfc3339};
use verisafe_sql::Value;

use crate::model::{
    Account, AccountKind, Claims, ExternalAssertion, ExternalIdentity, TokenPair,
};
use crate::service::events::{IdentityEvent, IdentityEventKind};
use crate::service::{build_insert, AuthError, AuthService};

impl AuthService {
    /// Resolve a provider-verified identity assertion to a local account
    /// and a fresh session token pair. Creates the account and the
    /// identity link on first sight, atomically; later assertions for
    /// the same external id refresh the stored profile snapshot.
    pub fn resolve_external_identity(
        &self,
        assertion: ExternalAssertion,
    ) -> Result<(Account, TokenPair), AuthError> {
        if assertion.external_id.trim().is_empty() || assertion.provider.trim().is_empty() {
            return Err(AuthError::Validation(
                "external_id and provider are required".into(),
            ));
        }
        if assertion.email.trim().is_empty() {
            return Err(AuthError::Validation("email is required".into()));
        }

        let account = match self.find_identity_link(&assertion.external_id)? {
            Some(link) => self.refresh_identity_link(link, &assertion)?,
            None => self.bind_new_identity(&assertion)?,
        };

        if !account.active {
            return Err(AuthError::Forbidden("account is disabled".into()));
        }

        let pair = self.issue_token_pair(&account.id)?;
        Ok((account, pair))
    }

    /// Exchange a refresh token for a new session pair. The account
    /// must still exist and be active at exchange time.
    pub fn refresh_session(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let claims: Claims = self.verify_session_token(refresh_token)?;
        if claims.kind != crate::model::TokenKind::Refresh {
            return Err(AuthError::Unauthorized("invalid or expired token".into()));
        }

        let account = self
            .get_account(&claims.sub)
            .map_err(|_| AuthError::Unauthorized("invalid or expired token".into()))?;
        if !account.active {
            return Err(AuthError::Unauthorized("invalid or expired token".into()));
        }

        self.issue_token_pair(&account.id)
    }

    /// List the identity links bound to an account.
    pub fn list_identity_links(
        &self,
        account_id: &str,
    ) -> Result<Vec<ExternalIdentity>, AuthError> {
        let rows = self
            .sql
            .query(
                "SELECT data FROM external_identities WHERE account_id = ?1
                 ORDER BY created_at",
                &[Value::Text(account_id.to_string())],
            )
            .map_err(|e| AuthError::Storage(e.to_string()))?;

        let mut links = Vec::new();
        for row in &rows {
            let data = row
                .get_str("data")
                .ok_or_else(|| AuthError::Internal("missing data column".into()))?;
            links.push(
                serde_json::from_str(data).map_err(|e| AuthError::Internal(e.to_string()))?,
            );
        }
        Ok(links)
    }

    fn find_identity_link(
        &self,
        external_id: &str,
    ) -> Result<Option<ExternalIdentity>, AuthError> {
        let rows = self
            .sql
            .query(
                "SELECT data FROM external_identities WHERE external_id = ?1",
                &[Value::Text(external_id.to_string())],
            )
            .map_err(|e| AuthError::Storage(e.to_string()))?;
        match rows.first().and_then(|r| r.get_str("data")) {
            Some(data) => serde_json::from_str(data)
                .map(Some)
                .map_err(|e| AuthError::Internal(e.to_string())),
            None => Ok(None),
        }
    }

    /// Known external id: refresh the profile snapshot and provider
    /// tokens. An assertion carrying the same external id from a
    /// different provider is a conflict, never a silent re-bind.
    fn refresh_identity_link(
        &self,
        mut link: ExternalIdentity,
        assertion: &ExternalAssertion,
    ) -> Result<Account, AuthError> {
        if link.provider != assertion.provider {
            return Err(AuthError::Conflict(format!(
                "external id is already linked via provider {}",
                link.provider
            )));
        }

        link.email = Some(assertion.email.clone());
        link.name = assertion.name.clone();
        link.avatar_url = assertion.avatar_url.clone();
        link.access_token = assertion.access_token.clone();
        link.refresh_token = assertion.refresh_token.clone();
        link.token_expires_at = assertion.token_expires_at.clone();
        link.updated_at = now_rfc3339();

        self.update_record(
            "external_identities",
            &link.id,
            &link,
            &[("updated_at", Value::Text(link.updated_at.clone()))],
        )?;

        self.publish_identity_event(IdentityEventKind::Updated, &link);
        self.get_account(&link.account_id)
    }

    /// First sight of this external id. Attach to the account matching
    /// the asserted email when one exists; otherwise create the account
    /// and the link together so neither exists without the other.
    fn bind_new_identity(&self, assertion: &ExternalAssertion) -> Result<Account, AuthError> {
        let now = now_rfc3339();

        if let Some(account) = self.find_account_by_email(&assertion.email)? {
            warn!(
                account_id = %account.id,
                provider = %assertion.provider,
                "attaching new provider to existing account by email match"
            );
            let link = build_link(assertion, &account.id, &now);
            self.insert_record(
                "external_identities",
                &link.id,
                &link,
                &link_indexes(&link),
            )?;
            self.publish_identity_event(IdentityEventKind::Created, &link);
            return Ok(account);
        }

        let account = Account {
            id: new_id(),
            name: assertion
                .name
                .clone()
                .unwrap_or_else(|| display_name_from_email(&assertion.email)),
            email: Some(assertion.email.clone()),
            kind: AccountKind::Human,
            avatar_url: assertion.avatar_url.clone(),
            active: true,
            created_at: now.clone(),
            updated_at: now.clone(),
        };
        let link = build_link(assertion, &account.id, &now);

        let account_stmt = build_insert(
            "accounts",
            &account.id,
            &account,
            &crate::service::account::account_indexes(&account),
        )?;
        let link_stmt = build_insert(
            "external_identities",
            &link.id,
            &link,
            &link_indexes(&link),
        )?;

        self.sql
            .exec_tx(&[account_stmt, link_stmt])
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("UNIQUE constraint") {
                    AuthError::Conflict(msg)
                } else {
                    AuthError::Storage(msg)
                }
            })?;

        info!(
            account_id = %account.id,
            provider = %assertion.provider,
            "account created from external identity"
        );
        self.publish_identity_event(IdentityEventKind::Created, &link);
        Ok(account)
    }

    /// Fire-and-forget: a sink failure is logged and never fails the
    /// resolution that produced the event.
    fn publish_identity_event(&self, kind: IdentityEventKind, link: &ExternalIdentity) {
        let event = IdentityEvent {
            kind,
            account_id: link.account_id.clone(),
            provider: link.provider.clone(),
        };
        if let Err(e) = self.events.publish(&event) {
            warn!(error = %e, "identity event publish failed");
        }
    }
}

fn build_link(assertion: &ExternalAssertion, account_id: &str, now: &str) -> ExternalIdentity {
    ExternalIdentity {
        id: new_id(),
        external_id: assertion.external_id.clone(),
        provider: assertion.provider.clone(),
        account_id: account_id.to_string(),
        email: Some(assertion.email.clone()),
        name: assertion.name.clone(),
        avatar_url: assertion.avatar_url.clone(),
        access_token: assertion.access_token.clone(),
        refresh_token: assertion.refresh_token.clone(),
        token_expires_at: assertion.token_expires_at.clone(),
        created_at: now.to_string(),
        updated_at: now.to_string(),
    }
}

fn link_indexes(link: &ExternalIdentity) -> Vec<(&'static str, Value)> {
    vec![
        ("external_id", Value::Text(link.external_id.clone())),
        ("provider", Value::Text(link.provider.clone())),
        ("account_id", Value::Text(link.account_id.clone())),
        ("created_at", Value::Text(link.created_at.clone())),
        ("updated_at", Value::Text(link.updated_at.clone())),
    ]
}

fn display_name_from_email(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::test_support::test_service;

    fn assertion(external_id: &str, provider: &str, email: &str) -> ExternalAssertion {
        ExternalAssertion {
            external_id: external_id.into(),
            provider: provider.into(),
            email: email.into(),
            name: Some("Alice".into()),
            avatar_url: None,
            access_token: Some("provider-access".into()),
            refresh_token: None,
            token_expires_at: None,
        }
    }

    #[test]
    fn first_resolution_creates_account_and_link() {
        let svc = test_service();
        let (account, pair) = svc
            .resolve_external_identity(assertion("g-123", "google", "alice@example.com"))
            .unwrap();

        assert_eq!(account.email.as_deref(), Some("alice@example.com"));
        assert_eq!(account.kind, AccountKind::Human);
        assert!(!pair.access_token.is_empty());
        assert!(!pair.refresh_token.is_empty());

        let links = svc.list_identity_links(&account.id).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].external_id, "g-123");
        assert_eq!(links[0].provider, "google");
    }

    #[test]
    fn repeat_resolution_is_idempotent_and_refreshes_snapshot() {
        let svc = test_service();
        let (first, _) = svc
            .resolve_external_identity(assertion("g-123", "google", "alice@example.com"))
            .unwrap();

        let mut again = assertion("g-123", "google", "alice@example.com");
        again.name = Some("Alice Cooper".into());
        again.access_token = Some("rotated-provider-access".into());
        let (second, _) = svc.resolve_external_identity(again).unwrap();

        // Same account, no duplicate link.
        assert_eq!(first.id, second.id);
        let links = svc.list_identity_links(&first.id).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].name.as_deref(), Some("Alice Cooper"));
        assert_eq!(links[0].access_token.as_deref(), Some("rotated-provider-access"));
    }

    #[test]
    fn same_email_different_provider_attaches_to_existing_account() {
        let svc = test_service();
        let (account, _) = svc
            .resolve_external_identity(assertion("g-123", "google", "alice@example.com"))
            .unwrap();
        let (same, _) = svc
            .resolve_external_identity(assertion("gh-77", "github", "alice@example.com"))
            .unwrap();

        assert_eq!(account.id, same.id);
        assert_eq!(svc.list_identity_links(&account.id).unwrap().len(), 2);
    }

    #[test]
    fn same_external_id_different_provider_conflicts() {
        let svc = test_service();
        svc.resolve_external_identity(assertion("id-1", "google", "alice@example.com"))
            .unwrap();

        let err = svc
            .resolve_external_identity(assertion("id-1", "github", "alice@example.com"))
            .unwrap_err();
        assert!(matches!(err, AuthError::Conflict(_)));
    }

    #[test]
    fn disabled_account_cannot_sign_in() {
        let svc = test_service();
        let (account, _) = svc
            .resolve_external_identity(assertion("g-123", "google", "alice@example.com"))
            .unwrap();

        let mut disabled = svc.get_account(&account.id).unwrap();
        disabled.active = false;
        svc.update_record(
            "accounts",
            &account.id,
            &disabled,
            &[("active", Value::Integer(0))],
        )
        .unwrap();

        let err = svc
            .resolve_external_identity(assertion("g-123", "google", "alice@example.com"))
            .unwrap_err();
        assert!(matches!(err, AuthError::Forbidden(_)));
    }

    #[test]
    fn refresh_exchanges_refresh_token_for_new_pair() {
        let svc = test_service();
        let (account, pair) = svc
            .resolve_external_identity(assertion("g-123", "google", "alice@example.com"))
            .unwrap();

        let renewed = svc.refresh_session(&pair.refresh_token).unwrap();
        let claims = svc.verify_session_token(&renewed.access_token).unwrap();
        assert_eq!(claims.sub, account.id);
    }

    #[test]
    fn access_token_cannot_be_used_as_refresh_token() {
        let svc = test_service();
        let (_, pair) = svc
            .resolve_external_identity(assertion("g-123", "google", "alice@example.com"))
            .unwrap();

        let err = svc.refresh_session(&pair.access_token).unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized(_)));
    }

    #[test]
    fn missing_fields_are_rejected() {
        let svc = test_service();
        let err = svc
            .resolve_external_identity(assertion("", "google", "alice@example.com"))
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));

        let err = svc
            .resolve_external_identity(assertion("g-1", "google", ""))
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
    }

    #[test]
    fn derived_display_name_comes_from_email() {
        let svc = test_service();
        let mut a = assertion("g-9", "google", "bob@example.com");
        a.name = None;
        let (account, _) = svc.resolve_external_identity(a).unwrap();
        assert_eq!(account.name, "bob");
    }
}
