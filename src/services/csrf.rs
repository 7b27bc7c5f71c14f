//! Double-submit CSRF tokens scoped to a session.
//!
//! Each session keeps a *set* of outstanding tokens (one per open tab is
//! normal); any member satisfies a check and checks never consume tokens.
//! The whole record expires an hour after its last write.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::config::CsrfConfig;
use crate::error::SecurityError;
use crate::principal::Principal;
use crate::store::ExpiringStore;

const KEY_PREFIX: &str = "csrf:";
const USER_SESSION_PREFIX: &str = "user:";
const ANON_SESSION_PREFIX: &str = "anon:";

/// Stored per-session token set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CsrfSessionRecord {
    tokens: Vec<String>,
    created_at: Option<DateTime<Utc>>,
}

/// A freshly issued token.
#[derive(Debug, Clone)]
pub struct IssuedCsrfToken {
    /// The token to echo back in the `x-csrf-token` header.
    pub token: String,
    /// The session the token belongs to.
    pub session_id: String,
    /// When the session's token set expires if nothing refreshes it.
    pub expires_at: DateTime<Utc>,
}

/// The resolved CSRF session for a request.
#[derive(Debug, Clone)]
pub struct CsrfSession {
    /// Session identifier.
    pub id: String,
    /// Whether the id was generated for this request (no cookie was
    /// present), meaning the session cookie still has to be set.
    pub fresh: bool,
}

impl CsrfSession {
    /// Resolve the session identity for a request.
    ///
    /// Order: existing session cookie value, authenticated principal id,
    /// freshly generated anonymous id. Never fails.
    #[must_use]
    pub fn resolve(cookie: Option<&str>, principal: Option<&Principal>) -> Self {
        if let Some(id) = cookie {
            if !id.is_empty() {
                return Self {
                    id: id.to_string(),
                    fresh: false,
                };
            }
        }
        if let Some(principal) = principal {
            return Self {
                id: format!("{USER_SESSION_PREFIX}{}", principal.id),
                fresh: true,
            };
        }
        let mut bytes = [0u8; 16];
        rand::rng().fill(&mut bytes);
        Self {
            id: format!("{ANON_SESSION_PREFIX}{}", hex::encode(bytes)),
            fresh: true,
        }
    }
}

/// Issues and checks per-session CSRF tokens.
#[derive(Clone)]
pub struct CsrfGuard {
    store: Arc<dyn ExpiringStore>,
    token_ttl: Duration,
    token_bytes: usize,
}

impl CsrfGuard {
    /// Create a guard over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn ExpiringStore>, config: &CsrfConfig) -> Self {
        Self {
            store,
            token_ttl: Duration::from_secs(config.token_ttl_seconds),
            token_bytes: config.token_bytes,
        }
    }

    fn key(session_id: &str) -> String {
        format!("{KEY_PREFIX}{session_id}")
    }

    fn create_random_token(&self) -> String {
        let mut bytes = vec![0u8; self.token_bytes];
        rand::rng().fill(&mut bytes[..]);
        hex::encode(bytes)
    }

    async fn load(&self, session_id: &str) -> Result<Option<CsrfSessionRecord>, SecurityError> {
        let Some(bytes) = self.store.get(&Self::key(session_id)).await? else {
            return Ok(None);
        };
        Ok(serde_json::from_slice(&bytes).ok())
    }

    /// Issue a new token for a session, refreshing the record's ttl.
    ///
    /// Existing tokens stay valid; a session accumulates one token per
    /// issuance until the record expires.
    ///
    /// # Errors
    ///
    /// Returns a store error when persisting fails.
    pub async fn issue(&self, session_id: &str) -> Result<IssuedCsrfToken, SecurityError> {
        let mut record = self.load(session_id).await?.unwrap_or_default();
        if record.created_at.is_none() {
            record.created_at = Some(Utc::now());
        }
        let token = self.create_random_token();
        record.tokens.push(token.clone());
        self.store
            .set(
                &Self::key(session_id),
                serde_json::to_vec(&record)?,
                self.token_ttl,
            )
            .await?;
        let ttl = i64::try_from(self.token_ttl.as_secs()).unwrap_or(i64::MAX);
        Ok(IssuedCsrfToken {
            token,
            session_id: session_id.to_string(),
            expires_at: Utc::now() + chrono::Duration::seconds(ttl),
        })
    }

    /// Check a presented token against a session's token set.
    ///
    /// # Errors
    ///
    /// [`SecurityError::CsrfTokenMissing`] when no token was presented,
    /// [`SecurityError::CsrfTokenInvalid`] when it is not a member of this
    /// session's set (a token issued to a different session never matches).
    pub async fn check(
        &self,
        session_id: &str,
        presented: Option<&str>,
    ) -> Result<(), SecurityError> {
        let Some(presented) = presented else {
            return Err(SecurityError::CsrfTokenMissing);
        };
        let Some(record) = self.load(session_id).await? else {
            return Err(SecurityError::CsrfTokenInvalid);
        };
        let presented_bytes = presented.as_bytes();
        let matched = record.tokens.iter().any(|token| {
            let token_bytes = token.as_bytes();
            token_bytes.len() == presented_bytes.len()
                && bool::from(token_bytes.ct_eq(presented_bytes))
        });
        if matched {
            Ok(())
        } else {
            Err(SecurityError::CsrfTokenInvalid)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::token::AccessClaims;
    use crate::store::MemoryStore;

    fn guard() -> CsrfGuard {
        CsrfGuard::new(Arc::new(MemoryStore::new()), &CsrfConfig::default())
    }

    #[tokio::test]
    async fn test_issue_and_check() {
        let csrf = guard();
        let issued = csrf.issue("anon:abc").await.unwrap();
        assert_eq!(issued.token.len(), 64); // 32 bytes hex-encoded

        csrf.check("anon:abc", Some(&issued.token)).await.unwrap();
    }

    #[tokio::test]
    async fn test_tokens_are_multi_use() {
        // Checks never consume: the same token passes repeatedly.
        let csrf = guard();
        let issued = csrf.issue("anon:abc").await.unwrap();
        csrf.check("anon:abc", Some(&issued.token)).await.unwrap();
        csrf.check("anon:abc", Some(&issued.token)).await.unwrap();
    }

    #[tokio::test]
    async fn test_sessions_accumulate_tokens() {
        let csrf = guard();
        let first = csrf.issue("anon:abc").await.unwrap();
        let second = csrf.issue("anon:abc").await.unwrap();
        assert_ne!(first.token, second.token);
        // Both remain valid.
        csrf.check("anon:abc", Some(&first.token)).await.unwrap();
        csrf.check("anon:abc", Some(&second.token)).await.unwrap();
    }

    #[tokio::test]
    async fn test_wrong_session_never_matches() {
        let csrf = guard();
        let issued = csrf.issue("anon:session-a").await.unwrap();
        let _ = csrf.issue("anon:session-b").await.unwrap();

        let err = csrf
            .check("anon:session-b", Some(&issued.token))
            .await
            .unwrap_err();
        assert!(matches!(err, SecurityError::CsrfTokenInvalid));
    }

    #[tokio::test]
    async fn test_missing_token_is_distinct_from_invalid() {
        let csrf = guard();
        let _ = csrf.issue("anon:abc").await.unwrap();

        let missing = csrf.check("anon:abc", None).await.unwrap_err();
        assert!(matches!(missing, SecurityError::CsrfTokenMissing));

        let invalid = csrf.check("anon:abc", Some("deadbeef")).await.unwrap_err();
        assert!(matches!(invalid, SecurityError::CsrfTokenInvalid));
    }

    #[tokio::test]
    async fn test_expired_record_invalidates_tokens() {
        let config = CsrfConfig {
            token_ttl_seconds: 0,
            ..CsrfConfig::default()
        };
        let csrf = CsrfGuard::new(Arc::new(MemoryStore::new()), &config);
        let issued = csrf.issue("anon:abc").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let err = csrf
            .check("anon:abc", Some(&issued.token))
            .await
            .unwrap_err();
        assert!(matches!(err, SecurityError::CsrfTokenInvalid));
    }

    #[test]
    fn test_session_resolution_order() {
        let principal = Principal::from_claims(AccessClaims {
            sub: "user-1".to_string(),
            email: "reader@example.com".to_string(),
            username: "reader".to_string(),
            iat: 0,
            exp: 0,
        });

        // Cookie wins over everything.
        let session = CsrfSession::resolve(Some("existing"), Some(&principal));
        assert_eq!(session.id, "existing");
        assert!(!session.fresh);

        // Then the authenticated principal.
        let session = CsrfSession::resolve(None, Some(&principal));
        assert_eq!(session.id, "user:user-1");
        assert!(session.fresh);

        // Anonymous fallback always succeeds and is unique per call.
        let first = CsrfSession::resolve(None, None);
        let second = CsrfSession::resolve(None, None);
        assert!(first.id.starts_with("anon:"));
        assert_eq!(first.id.len(), "anon:".len() + 32);
        assert_ne!(first.id, second.id);
        assert!(first.fresh);
    }
}
