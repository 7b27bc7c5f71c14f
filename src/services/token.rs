//! Signed, time-limited access tokens.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::directory::User;
use crate::error::SecurityError;

/// Claims embedded in an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// User id.
    pub sub: String,
    /// Account email.
    pub email: String,
    /// Display name.
    pub username: String,
    /// Issued-at (unix seconds).
    pub iat: i64,
    /// Expiry (unix seconds).
    pub exp: i64,
}

/// Issues and verifies HS256 bearer tokens.
///
/// Verification fails closed: malformed tokens, bad signatures, and expired
/// tokens all come back as `None`, indistinguishable from an absent
/// credential.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl TokenService {
    /// Create a service signing with `secret`, issuing tokens valid for
    /// `ttl_seconds`.
    #[must_use]
    pub fn new(secret: &str, ttl_seconds: u64) -> Self {
        Self::with_ttl(
            secret,
            Duration::seconds(i64::try_from(ttl_seconds).unwrap_or(i64::MAX)),
        )
    }

    /// Create a service with an explicit (possibly negative, for tests)
    /// token lifetime.
    #[must_use]
    pub fn with_ttl(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
            ttl,
        }
    }

    /// Issue a token for a user.
    ///
    /// # Errors
    ///
    /// Returns an error when signing fails.
    pub fn issue(&self, user: &User) -> Result<String, SecurityError> {
        let now = Utc::now();
        let claims = AccessClaims {
            sub: user.id.clone(),
            email: user.email.clone(),
            username: user.username.clone(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        Ok(token)
    }

    /// Verify a token, returning its claims when valid.
    #[must_use]
    pub fn verify(&self, token: &str) -> Option<AccessClaims> {
        decode::<AccessClaims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_user() -> User {
        User {
            id: "user-1".to_string(),
            email: "reader@example.com".to_string(),
            username: "reader".to_string(),
            password_hash: String::new(),
            last_login_at: None,
            deleted_at: None,
        }
    }

    #[test]
    fn test_round_trip() {
        let service = TokenService::new("unit-test-secret", 28_800);
        let token = service.issue(&test_user()).unwrap();

        let claims = service.verify(&token).expect("token should verify");
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.email, "reader@example.com");
        assert_eq!(claims.username, "reader");
        assert!(claims.exp - claims.iat == 28_800);
    }

    #[test]
    fn test_wrong_secret_fails_closed() {
        let service = TokenService::new("unit-test-secret", 28_800);
        let token = service.issue(&test_user()).unwrap();

        let other = TokenService::new("a-different-secret", 28_800);
        assert!(other.verify(&token).is_none());
    }

    #[test]
    fn test_tampered_token_fails_closed() {
        let service = TokenService::new("unit-test-secret", 28_800);
        let token = service.issue(&test_user()).unwrap();

        let mut tampered = token.clone();
        tampered.pop();
        tampered.push('A');
        assert!(service.verify(&tampered).is_none());
        assert!(service.verify("not-a-token").is_none());
        assert!(service.verify("").is_none());
    }

    #[test]
    fn test_expired_token_fails_closed() {
        // Expiry well past the default clock-skew leeway.
        let service = TokenService::with_ttl("unit-test-secret", Duration::seconds(-300));
        let token = service.issue(&test_user()).unwrap();
        assert!(service.verify(&token).is_none());
    }
}
