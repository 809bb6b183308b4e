use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::model::{Claims, TokenKind, TokenPair};
use crate::service::{AuthError, AuthService};

/// Recognizable prefix distinguishing raw service-token secrets from
/// session JWTs at a glance.
pub const SERVICE_SECRET_PREFIX: &str = "vst_";

impl AuthService {
    /// Mint a signed session token of the given kind. Pure over config
    /// plus the signing key; performs no storage access.
    pub fn issue_session_token(
        &self,
        account_id: &str,
        kind: TokenKind,
    ) -> Result<String, AuthError> {
        let now = chrono::Utc::now();
        let ttl = match kind {
            TokenKind::Access => self.config.access_token_ttl,
            TokenKind::Refresh => self.config.refresh_token_ttl,
        };

        let claims = Claims {
            sub: account_id.to_string(),
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            iat: now.timestamp(),
            exp: now.timestamp() + ttl,
            kind,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|e| AuthError::Internal(format!("JWT encode failed: {}", e)))
    }

    /// Mint an access + refresh pair for an account.
    pub fn issue_token_pair(&self, account_id: &str) -> Result<TokenPair, AuthError> {
        let access_token = self.issue_session_token(account_id, TokenKind::Access)?;
        let refresh_token = self.issue_session_token(account_id, TokenKind::Refresh)?;
        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.config.access_token_ttl,
        })
    }

    /// Verify signature, expiry, issuer and audience of a session token.
    /// Failure reasons are collapsed into one generic unauthorized error.
    pub fn verify_session_token(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::default();
        validation.leeway = 0;
        validation.set_issuer(&[&self.config.issuer]);
        validation.set_audience(&[&self.config.audience]);

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|_| AuthError::Unauthorized("invalid or expired token".into()))?;

        Ok(data.claims)
    }

    /// Generate a raw service-token secret: `vst_` plus base64-url of
    /// 32 bytes from the OS CSPRNG (256 bits of entropy). Returned to
    /// the caller exactly once; only the digest is ever stored.
    pub fn generate_service_secret(&self) -> String {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        format!("{}{}", SERVICE_SECRET_PREFIX, URL_SAFE_NO_PAD.encode(bytes))
    }
}
