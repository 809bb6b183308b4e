use verisafe_core::{new_id, now_rfc3339};
use verisafe_sql::{Statement, Value};

use crate::model::{Account, AccountKind, CreateAccount, CreateRole, Role};
use crate::service::{build_insert, AuthError, AuthService};

impl AuthService {
    /// Create a new account.
    pub fn create_account(&self, input: CreateAccount) -> Result<Account, AuthError> {
        if input.name.trim().is_empty() {
            return Err(AuthError::Validation("account name is required".into()));
        }
        if input.kind == AccountKind::Human && input.email.is_none() {
            return Err(AuthError::Validation(
                "human accounts require an email".into(),
            ));
        }

        let now = now_rfc3339();
        let account = Account {
            id: new_id(),
            name: input.name,
            email: input.email,
            kind: input.kind,
            avatar_url: input.avatar_url,
            active: true,
            created_at: now.clone(),
            updated_at: now,
        };

        let indexes = account_indexes(&account);
        self.insert_record("accounts", &account.id, &account, &indexes)?;
        Ok(account)
    }

    /// Get an account by id.
    pub fn get_account(&self, id: &str) -> Result<Account, AuthError> {
        self.get_record("accounts", id)
    }

    /// Find an account by email.
    pub fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, AuthError> {
        let rows = self
            .sql
            .query(
                "SELECT data FROM accounts WHERE email = ?1",
                &[Value::Text(email.to_string())],
            )
            .map_err(|e| AuthError::Storage(e.to_string()))?;

        match rows.first().and_then(|r| r.get_str("data")) {
            Some(data) => serde_json::from_str(data)
                .map(Some)
                .map_err(|e| AuthError::Internal(e.to_string())),
            None => Ok(None),
        }
    }

    // ── Role / permission graph ──
    //
    // The authenticator only reads this graph; the mutation surface is
    // the minimum needed to seed roles and assignments.

    /// Register a role with its permission set.
    pub fn create_role(&self, input: CreateRole) -> Result<Role, AuthError> {
        if input.name.trim().is_empty() {
            return Err(AuthError::Validation("role name cannot be empty".into()));
        }
        if input.permissions.is_empty() {
            return Err(AuthError::Validation(
                "role must have at least one permission".into(),
            ));
        }

        let now = now_rfc3339();
        let role = Role {
            name: input.name,
            description: input.description,
            permissions: input.permissions,
            created_at: now.clone(),
        };

        // One transaction: a role never exists without its permission rows.
        let mut statements: Vec<Statement> = vec![build_insert(
            "roles",
            &role.name,
            &role,
            &[("created_at", Value::Text(now))],
        )?];
        for perm in &role.permissions {
            statements.push((
                "INSERT OR IGNORE INTO role_permissions (role_id, permission) VALUES (?1, ?2)"
                    .to_string(),
                vec![Value::Text(role.name.clone()), Value::Text(perm.clone())],
            ));
        }
        self.sql.exec_tx(&statements).map_err(|e| {
            let msg = e.to_string();
            if msg.contains("UNIQUE constraint") {
                AuthError::Conflict(msg)
            } else {
                AuthError::Storage(msg)
            }
        })?;
        Ok(role)
    }

    /// Assign a role to an account. Idempotent.
    pub fn assign_role(&self, account_id: &str, role_name: &str) -> Result<(), AuthError> {
        // Referenced rows must exist; foreign keys catch races.
        self.get_account(account_id)?;
        let _: Role = self.get_record("roles", role_name)?;

        self.sql
            .exec(
                "INSERT OR IGNORE INTO account_roles (account_id, role_id, added_at)
                 VALUES (?1, ?2, ?3)",
                &[
                    Value::Text(account_id.to_string()),
                    Value::Text(role_name.to_string()),
                    Value::Text(now_rfc3339()),
                ],
            )
            .map_err(|e| AuthError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Names of roles currently assigned to an account.
    pub fn list_role_names(&self, account_id: &str) -> Result<Vec<String>, AuthError> {
        let rows = self
            .sql
            .query(
                "SELECT role_id FROM account_roles WHERE account_id = ?1 ORDER BY role_id",
                &[Value::Text(account_id.to_string())],
            )
            .map_err(|e| AuthError::Storage(e.to_string()))?;

        Ok(rows
            .iter()
            .filter_map(|r| r.get_str("role_id").map(String::from))
            .collect())
    }

    /// Flattened permission set for an account: the union of the
    /// permission sets of its assigned roles.
    pub fn list_permission_names(&self, account_id: &str) -> Result<Vec<String>, AuthError> {
        let rows = self
            .sql
            .query(
                "SELECT DISTINCT rp.permission
                 FROM role_permissions rp
                 JOIN account_roles ar ON ar.role_id = rp.role_id
                 WHERE ar.account_id = ?1
                 ORDER BY rp.permission",
                &[Value::Text(account_id.to_string())],
            )
            .map_err(|e| AuthError::Storage(e.to_string()))?;

        Ok(rows
            .iter()
            .filter_map(|r| r.get_str("permission").map(String::from))
            .collect())
    }
}

/// Indexed columns for an account record.
pub(crate) fn account_indexes(account: &Account) -> Vec<(&'static str, Value)> {
    let kind = match account.kind {
        AccountKind::Human => "human",
        AccountKind::Service => "service",
    };
    let mut indexes: Vec<(&'static str, Value)> = vec![
        ("name", Value::Text(account.name.clone())),
        ("kind", Value::Text(kind.to_string())),
        ("active", Value::Integer(if account.active { 1 } else { 0 })),
        ("created_at", Value::Text(account.created_at.clone())),
        ("updated_at", Value::Text(account.updated_at.clone())),
    ];
    if let Some(ref email) = account.email {
        indexes.push(("email", Value::Text(email.clone())));
    }
    indexes
}
