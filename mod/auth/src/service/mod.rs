pub mod account;
pub mod authenticate;
pub mod events;
pub mod hasher;
pub mod identity;
pub mod issuer;
pub mod schema;
pub mod service_token;
pub mod sweep;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use verisafe_core::ServiceError;
use verisafe_sql::{SQLStore, Value};

use crate::service::events::EventSink;

/// Auth service error type.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation: {0}")]
    Validation(String),

    /// Authentication failure. The message must stay generic — callers
    /// never learn which specific credential check failed.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("storage: {0}")]
    Storage(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl From<AuthError> for ServiceError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::NotFound(m) => ServiceError::NotFound(m),
            AuthError::Conflict(m) => ServiceError::Conflict(m),
            AuthError::Validation(m) => ServiceError::Validation(m),
            AuthError::Unauthorized(m) => ServiceError::Unauthenticated(m),
            AuthError::Forbidden(m) => ServiceError::PermissionDenied(m),
            AuthError::Storage(m) => ServiceError::Storage(m),
            AuthError::Internal(m) => ServiceError::Internal(m),
        }
    }
}

/// Configuration for the auth service. Immutable after construction;
/// every component receives it through the service rather than reading
/// ambient global state.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// JWT signing secret.
    pub jwt_secret: String,
    /// `iss` claim on issued session tokens.
    pub issuer: String,
    /// `aud` claim on issued session tokens.
    pub audience: String,
    /// Access token lifetime in seconds (default: 15 min).
    pub access_token_ttl: i64,
    /// Refresh token lifetime in seconds (default: 30 days).
    pub refresh_token_ttl: i64,
    /// Default service-token expiry in days (default: one year).
    pub service_token_ttl_days: i64,
    /// Expired-token sweep interval in seconds (default: hourly).
    pub expiry_sweep_interval: u64,
    /// Rotation-due sweep interval in seconds (default: every 6 hours).
    pub rotation_sweep_interval: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "verisafe-dev-secret-change-me".to_string(),
            issuer: "verisafe".to_string(),
            audience: "verisafe-clients".to_string(),
            access_token_ttl: 900,           // 15 min
            refresh_token_ttl: 2_592_000,    // 30 days
            service_token_ttl_days: 365,
            expiry_sweep_interval: 3_600,    // 1h
            rotation_sweep_interval: 21_600, // 6h
        }
    }
}

/// The auth service. Holds the storage backend, the event sink and
/// immutable configuration; all mutable state lives in storage.
pub struct AuthService {
    pub(crate) sql: Arc<dyn SQLStore>,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) config: AuthConfig,
}

impl AuthService {
    /// Create a new AuthService, initializing the DB schema.
    pub fn new(
        sql: Arc<dyn SQLStore>,
        events: Arc<dyn EventSink>,
        config: AuthConfig,
    ) -> Result<Arc<Self>, AuthError> {
        schema::init_schema(sql.as_ref())?;
        Ok(Arc::new(Self {
            sql,
            events,
            config,
        }))
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    // ── Generic record helpers: JSON `data` column plus indexed columns ──

    /// Insert a record as JSON into a table with indexed columns.
    pub(crate) fn insert_record<T: Serialize>(
        &self,
        table: &str,
        id: &str,
        record: &T,
        indexes: &[(&str, Value)],
    ) -> Result<(), AuthError> {
        let (sql, params) = build_insert(table, id, record, indexes)?;
        self.sql.exec(&sql, &params).map_err(|e| {
            let msg = e.to_string();
            if msg.contains("UNIQUE constraint") {
                AuthError::Conflict(msg)
            } else {
                AuthError::Storage(msg)
            }
        })?;
        Ok(())
    }

    /// Get a record by id, deserializing the JSON `data` column.
    pub(crate) fn get_record<T: DeserializeOwned>(
        &self,
        table: &str,
        id: &str,
    ) -> Result<T, AuthError> {
        let sql = format!("SELECT data FROM {} WHERE id = ?1", table);
        let rows = self
            .sql
            .query(&sql, &[Value::Text(id.to_string())])
            .map_err(|e| AuthError::Storage(e.to_string()))?;
        let row = rows
            .first()
            .ok_or_else(|| AuthError::NotFound(format!("{}/{}", table, id)))?;
        let data = row
            .get_str("data")
            .ok_or_else(|| AuthError::Internal("missing data column".into()))?;
        serde_json::from_str(data).map_err(|e| AuthError::Internal(e.to_string()))
    }

    /// Replace a record's JSON data and indexed columns.
    pub(crate) fn update_record<T: Serialize>(
        &self,
        table: &str,
        id: &str,
        record: &T,
        indexes: &[(&str, Value)],
    ) -> Result<(), AuthError> {
        let (sql, params) = build_update(table, id, record, indexes)?;
        let affected = self
            .sql
            .exec(&sql, &params)
            .map_err(|e| AuthError::Storage(e.to_string()))?;
        if affected == 0 {
            return Err(AuthError::NotFound(format!("{}/{}", table, id)));
        }
        Ok(())
    }

    /// Delete a record by id.
    pub(crate) fn delete_record(&self, table: &str, id: &str) -> Result<(), AuthError> {
        let sql = format!("DELETE FROM {} WHERE id = ?1", table);
        let affected = self
            .sql
            .exec(&sql, &[Value::Text(id.to_string())])
            .map_err(|e| AuthError::Storage(e.to_string()))?;
        if affected == 0 {
            return Err(AuthError::NotFound(format!("{}/{}", table, id)));
        }
        Ok(())
    }
}

/// Build an INSERT statement for the JSON-record pattern. Split out so
/// transactional flows can batch it through `exec_tx`.
pub(crate) fn build_insert<T: Serialize>(
    table: &str,
    id: &str,
    record: &T,
    indexes: &[(&str, Value)],
) -> Result<(String, Vec<Value>), AuthError> {
    let json = serde_json::to_string(record).map_err(|e| AuthError::Internal(e.to_string()))?;

    let mut cols = vec!["id", "data"];
    let mut placeholders = vec!["?1".to_string(), "?2".to_string()];
    let mut params = vec![Value::Text(id.to_string()), Value::Text(json)];

    for (i, (col, val)) in indexes.iter().enumerate() {
        cols.push(col);
        placeholders.push(format!("?{}", i + 3));
        params.push(val.clone());
    }

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        cols.join(", "),
        placeholders.join(", "),
    );
    Ok((sql, params))
}

/// Build an UPDATE statement for the JSON-record pattern.
pub(crate) fn build_update<T: Serialize>(
    table: &str,
    id: &str,
    record: &T,
    indexes: &[(&str, Value)],
) -> Result<(String, Vec<Value>), AuthError> {
    let json = serde_json::to_string(record).map_err(|e| AuthError::Internal(e.to_string()))?;

    let mut sets = vec!["data = ?1".to_string()];
    let mut params: Vec<Value> = vec![Value::Text(json)];

    for (i, (col, val)) in indexes.iter().enumerate() {
        sets.push(format!("{} = ?{}", col, i + 2));
        params.push(val.clone());
    }

    let id_idx = params.len() + 1;
    params.push(Value::Text(id.to_string()));

    let sql = format!("UPDATE {} SET {} WHERE id = ?{}", table, sets.join(", "), id_idx);
    Ok((sql, params))
}
