//! Failed-login tracking with temporary lockout.
//!
//! One record per normalized email, living in the expiring store. States:
//! no record (clean) -> counting (1..max-1 failures) -> locked
//! (`locked_until` in the future) -> clean again on success or natural
//! window expiry.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LockoutConfig;
use crate::error::SecurityError;
use crate::store::ExpiringStore;

const KEY_PREFIX: &str = "login_attempts:";

/// Stored per-email attempt record.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AttemptRecord {
    count: u32,
    last_attempt_at: DateTime<Utc>,
    locked_until: Option<DateTime<Utc>>,
}

/// Per-email failed-attempt counter with sliding window and lockout.
#[derive(Clone)]
pub struct LoginLockout {
    store: Arc<dyn ExpiringStore>,
    max_attempts: u32,
    lockout: chrono::Duration,
    window: Duration,
}

impl LoginLockout {
    /// Create a guard over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn ExpiringStore>, config: &LockoutConfig) -> Self {
        Self {
            store,
            max_attempts: config.max_attempts,
            lockout: chrono::Duration::seconds(
                i64::try_from(config.lockout_seconds).unwrap_or(i64::MAX),
            ),
            window: Duration::from_secs(config.window_seconds),
        }
    }

    fn key(email: &str) -> String {
        format!("{KEY_PREFIX}{}", email.trim().to_lowercase())
    }

    async fn load(&self, email: &str) -> Result<Option<AttemptRecord>, SecurityError> {
        let Some(bytes) = self.store.get(&Self::key(email)).await? else {
            return Ok(None);
        };
        // A corrupt record is treated as absent rather than poisoning logins.
        Ok(serde_json::from_slice(&bytes).ok())
    }

    /// Reject when the email is currently locked, before any credential is
    /// consulted.
    ///
    /// # Errors
    ///
    /// Returns [`SecurityError::Locked`] with the lock expiry and a rounded-up
    /// remaining-minutes estimate.
    pub async fn ensure_unlocked(&self, email: &str) -> Result<(), SecurityError> {
        let Some(record) = self.load(email).await? else {
            return Ok(());
        };
        if let Some(locked_until) = record.locked_until {
            let now = Utc::now();
            if locked_until > now {
                let remaining_secs = (locked_until - now).num_seconds().max(1);
                return Err(SecurityError::Locked {
                    locked_until,
                    remaining_minutes: (remaining_secs + 59) / 60,
                });
            }
        }
        Ok(())
    }

    /// Record a failed attempt; locks the email once the threshold is hit.
    ///
    /// Every write refreshes the record's ttl to a full attempt window, so a
    /// caller failing repeatedly keeps the record alive indefinitely. That
    /// behavior is intentional; do not change it without a product decision.
    ///
    /// # Errors
    ///
    /// Returns a store error when persisting fails.
    pub async fn record_failure(&self, email: &str) -> Result<u32, SecurityError> {
        let now = Utc::now();
        let mut record = self.load(email).await?.unwrap_or(AttemptRecord {
            count: 0,
            last_attempt_at: now,
            locked_until: None,
        });
        record.count += 1;
        record.last_attempt_at = now;
        if record.count >= self.max_attempts {
            record.locked_until = Some(now + self.lockout);
        }
        debug!(count = record.count, locked = record.locked_until.is_some(), "login failure recorded");
        self.store
            .set(&Self::key(email), serde_json::to_vec(&record)?, self.window)
            .await?;
        Ok(record.count)
    }

    /// Clear the attempt record unconditionally after a successful login.
    ///
    /// # Errors
    ///
    /// Returns a store error when the delete fails.
    pub async fn record_success(&self, email: &str) -> Result<(), SecurityError> {
        self.store.delete(&Self::key(email)).await?;
        Ok(())
    }
}
