use verisafe_sql::SQLStore;

use crate::service::AuthError;

/// Initialize the SQLite schema for all auth resources. Idempotent.
///
/// Service tokens keep their mutable gate columns (digest, use_count,
/// max_uses, expires_at, revoked_at) as real columns so the use-counter
/// increment can be one guarded UPDATE; the JSON `data` column carries
/// the full record.
pub fn init_schema(sql: &dyn SQLStore) -> Result<(), AuthError> {
    let statements = [
        // Accounts: local identities, human or service kind.
        "CREATE TABLE IF NOT EXISTS accounts (
            id TEXT PRIMARY KEY,
            email TEXT UNIQUE,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            data TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_accounts_kind ON accounts(kind)",

        // External identity links. One external id is bound to exactly
        // one provider and one local account.
        "CREATE TABLE IF NOT EXISTS external_identities (
            id TEXT PRIMARY KEY,
            external_id TEXT NOT NULL UNIQUE,
            provider TEXT NOT NULL,
            account_id TEXT NOT NULL,
            data TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE
        )",
        "CREATE INDEX IF NOT EXISTS idx_external_identities_account
            ON external_identities(account_id)",

        // Service tokens: digest is looked up on every machine call.
        "CREATE TABLE IF NOT EXISTS service_tokens (
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            digest TEXT NOT NULL UNIQUE,
            use_count INTEGER NOT NULL DEFAULT 0,
            max_uses INTEGER,
            expires_at TEXT,
            revoked_at TEXT,
            data TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE
        )",
        "CREATE INDEX IF NOT EXISTS idx_service_tokens_account
            ON service_tokens(account_id)",

        // Role / permission graph, consumed read-mostly by the
        // authenticator.
        "CREATE TABLE IF NOT EXISTS roles (
            id TEXT PRIMARY KEY,
            data TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS role_permissions (
            role_id TEXT NOT NULL,
            permission TEXT NOT NULL,
            PRIMARY KEY (role_id, permission),
            FOREIGN KEY (role_id) REFERENCES roles(id) ON DELETE CASCADE
        )",
        "CREATE TABLE IF NOT EXISTS account_roles (
            account_id TEXT NOT NULL,
            role_id TEXT NOT NULL,
            added_at TEXT NOT NULL,
            PRIMARY KEY (account_id, role_id),
            FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE,
            FOREIGN KEY (role_id) REFERENCES roles(id) ON DELETE CASCADE
        )",
        "CREATE INDEX IF NOT EXISTS idx_account_roles_account
            ON account_roles(account_id)",
    ];

    for stmt in &statements {
        sql.exec(stmt, &[])
            .map_err(|e| AuthError::Storage(e.to_string()))?;
    }

    Ok(())
}
