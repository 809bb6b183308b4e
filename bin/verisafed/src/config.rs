//! Server-side configuration.
//!
//! A context name resolves to `/etc/verisafe/<name>.toml`; anything
//! containing `/` or `.` is treated as a literal path.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use verisafe_auth::AuthConfig;

/// Server configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listen address (default: 0.0.0.0:8080).
    #[serde(default = "default_listen")]
    pub listen: String,

    pub storage: StorageConfig,
    pub jwt: JwtConfig,

    #[serde(default)]
    pub tokens: TokenConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the SQLite database.
    pub data_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    /// Signing secret. Required; the server refuses to start without one.
    pub secret: String,

    #[serde(default = "default_issuer")]
    pub issuer: String,

    #[serde(default = "default_audience")]
    pub audience: String,

    /// Access token lifetime in seconds.
    #[serde(default = "default_access_ttl")]
    pub access_ttl_secs: i64,

    /// Refresh token lifetime in seconds.
    #[serde(default = "default_refresh_ttl")]
    pub refresh_ttl_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    /// Default service-token expiry in days.
    #[serde(default = "default_token_ttl_days")]
    pub default_ttl_days: i64,

    /// Expired-token sweep interval in seconds.
    #[serde(default = "default_expiry_sweep")]
    pub expiry_sweep_secs: u64,

    /// Rotation-due sweep interval in seconds.
    #[serde(default = "default_rotation_sweep")]
    pub rotation_sweep_secs: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            default_ttl_days: default_token_ttl_days(),
            expiry_sweep_secs: default_expiry_sweep(),
            rotation_sweep_secs: default_rotation_sweep(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_issuer() -> String {
    "verisafe".to_string()
}
fn default_audience() -> String {
    "verisafe-clients".to_string()
}
fn default_access_ttl() -> i64 {
    900
}
fn default_refresh_ttl() -> i64 {
    2_592_000
}
fn default_token_ttl_days() -> i64 {
    365
}
fn default_expiry_sweep() -> u64 {
    3_600
}
fn default_rotation_sweep() -> u64 {
    21_600
}

impl ServerConfig {
    /// Resolve a context name or literal path to a config file path.
    pub fn resolve_path(name_or_path: &str) -> PathBuf {
        if name_or_path.contains('/') || name_or_path.contains('.') {
            PathBuf::from(name_or_path)
        } else {
            PathBuf::from("/etc/verisafe").join(format!("{}.toml", name_or_path))
        }
    }

    /// Load and validate configuration from disk.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read {}: {}", path.display(), e))?;
        let config: ServerConfig = toml::from_str(&content)?;
        config.verify()?;
        Ok(config)
    }

    fn verify(&self) -> anyhow::Result<()> {
        if self.jwt.secret.trim().is_empty() {
            anyhow::bail!("jwt.secret must not be empty");
        }
        if self.storage.data_dir.trim().is_empty() {
            anyhow::bail!("storage.data_dir must not be empty");
        }
        Ok(())
    }

    /// Map the file sections onto the auth service's configuration.
    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            jwt_secret: self.jwt.secret.clone(),
            issuer: self.jwt.issuer.clone(),
            audience: self.jwt.audience.clone(),
            access_token_ttl: self.jwt.access_ttl_secs,
            refresh_token_ttl: self.jwt.refresh_ttl_secs,
            service_token_ttl_days: self.tokens.default_ttl_days,
            expiry_sweep_interval: self.tokens.expiry_sweep_secs,
            rotation_sweep_interval: self.tokens.rotation_sweep_secs,
        }
    }

    /// Path of the SQLite database inside the data directory.
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.storage.data_dir).join("verisafe.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[storage]
data_dir = "/var/lib/verisafe"

[jwt]
secret = "s3cret"
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config: ServerConfig = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.listen, "0.0.0.0:8080");
        assert_eq!(config.jwt.issuer, "verisafe");
        assert_eq!(config.jwt.access_ttl_secs, 900);
        assert_eq!(config.tokens.default_ttl_days, 365);
        assert_eq!(config.tokens.expiry_sweep_secs, 3_600);
    }

    #[test]
    fn load_rejects_empty_secret() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(
            &path,
            "[storage]\ndata_dir = \"/tmp\"\n\n[jwt]\nsecret = \"\"\n",
        )
        .unwrap();
        assert!(ServerConfig::load(&path).is_err());
    }

    #[test]
    fn context_names_resolve_under_etc() {
        assert_eq!(
            ServerConfig::resolve_path("prod"),
            PathBuf::from("/etc/verisafe/prod.toml")
        );
        assert_eq!(
            ServerConfig::resolve_path("./local.toml"),
            PathBuf::from("./local.toml")
        );
    }

    #[test]
    fn auth_config_carries_every_section() {
        let config: ServerConfig = toml::from_str(MINIMAL).unwrap();
        let auth = config.auth_config();
        assert_eq!(auth.jwt_secret, "s3cret");
        assert_eq!(auth.refresh_token_ttl, 2_592_000);
        assert_eq!(auth.rotation_sweep_interval, 21_600);
    }
}
