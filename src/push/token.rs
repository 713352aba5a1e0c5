//! Short-lived action tokens embedded in alarm payloads.
//!
//! Lets the receiving client perform a clock action from the notification
//! without a fresh login. Tokens are HS256-signed and scoped to clock
//! actions only.

use anyhow::{Context, Result};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Claims carried by an action token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionClaims {
    /// User the token acts on behalf of.
    pub sub: String,
    /// Action scope; always "work_clock" for alarm payload tokens.
    pub scope: String,
    pub iat: u64,
    pub exp: u64,
}

/// Signs and verifies action tokens with a shared secret.
#[derive(Clone)]
pub struct ActionTokenSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
}

impl ActionTokenSigner {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    /// Issue a clock-action token for the given user.
    pub fn sign(&self, user_id: &str) -> Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("System clock before unix epoch")?
            .as_secs();
        let claims = ActionClaims {
            sub: user_id.to_string(),
            scope: "work_clock".to_string(),
            iat: now,
            exp: now + self.ttl.as_secs(),
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .context("Failed to sign action token")
    }

    /// Verify a token and return its claims. Expired or tampered tokens fail.
    pub fn verify(&self, token: &str) -> Result<ActionClaims> {
        let data = decode::<ActionClaims>(token, &self.decoding_key, &Validation::default())
            .context("Invalid action token")?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify_roundtrip() {
        let signer = ActionTokenSigner::new("test-secret", Duration::from_secs(600));
        let token = signer.sign("user-1").unwrap();
        let claims = signer.verify(&token).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.scope, "work_clock");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let signer = ActionTokenSigner::new("secret-a", Duration::from_secs(600));
        let other = ActionTokenSigner::new("secret-b", Duration::from_secs(600));
        let token = signer.sign("user-1").unwrap();
        assert!(other.verify(&token).is_err());
    }

    #[test]
    fn test_tampered_token_rejected() {
        let signer = ActionTokenSigner::new("test-secret", Duration::from_secs(600));
        let mut token = signer.sign("user-1").unwrap();
        token.push('x');
        assert!(signer.verify(&token).is_err());
    }
}
