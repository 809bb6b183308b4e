use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha2::{Digest, Sha256};

/// One-way digest of a raw secret: SHA-256 over the raw bytes, base64
/// encoded. Secrets are compared by digest only — raw values are never
/// persisted or compared directly.
pub fn digest_secret(secret: &str) -> String {
    let hash = Sha256::digest(secret.as_bytes());
    STANDARD.encode(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        assert_eq!(digest_secret("vst_abc"), digest_secret("vst_abc"));
    }

    #[test]
    fn digest_differs_per_secret() {
        assert_ne!(digest_secret("vst_a"), digest_secret("vst_b"));
    }

    #[test]
    fn digest_is_fixed_length_and_not_the_secret() {
        let d = digest_secret("vst_super-secret-value");
        // base64(SHA-256) is always 44 chars.
        assert_eq!(d.len(), 44);
        assert!(!d.contains("super-secret-value"));
    }
}
