//! Per-client-IP sliding-window request counting.
//!
//! A window is a fixed interval that resets wholesale: once its `reset_at`
//! passes, the next request starts a fresh window at count 1. Incrementing
//! never moves `reset_at`.

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::RateLimitConfig;
use crate::error::SecurityError;
use crate::store::ExpiringStore;

const KEY_PREFIX: &str = "rate:";

/// Stored per-IP window.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RateWindow {
    count: u64,
    reset_at_ms: i64,
}

/// Outcome of recording one request against a client's window.
#[derive(Debug, Clone)]
pub struct RateDecision {
    /// Whether the request is within budget.
    pub allowed: bool,
    /// Configured per-window budget.
    pub limit: u64,
    /// Requests left in the window, floored at 0.
    pub remaining: u64,
    /// Seconds until the window resets, rounded up.
    pub reset_secs: u64,
}

/// Per-IP sliding-window rate limiter.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn ExpiringStore>,
    max_requests: u64,
    window: Duration,
}

impl RateLimiter {
    /// Create a limiter over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn ExpiringStore>, config: &RateLimitConfig) -> Self {
        Self {
            store,
            max_requests: config.max_requests,
            window: Duration::from_secs(config.window_seconds),
        }
    }

    fn key(ip: &str) -> String {
        format!("{KEY_PREFIX}{ip}")
    }

    /// Record a request for `ip` and decide whether it is allowed.
    ///
    /// # Errors
    ///
    /// Returns a store error when the window cannot be read or written.
    pub async fn record(&self, ip: &str) -> Result<RateDecision, SecurityError> {
        let now_ms = Utc::now().timestamp_millis();
        let key = Self::key(ip);

        let current = match self.store.get(&key).await? {
            Some(bytes) => serde_json::from_slice::<RateWindow>(&bytes)
                .ok()
                .filter(|window| window.reset_at_ms > now_ms),
            None => None,
        };

        let window = current.map_or_else(
            || RateWindow {
                count: 1,
                reset_at_ms: now_ms
                    + i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX),
            },
            |mut window| {
                window.count += 1;
                window
            },
        );

        let ttl_ms = u64::try_from(window.reset_at_ms - now_ms).unwrap_or(0).max(1);
        self.store
            .set(
                &key,
                serde_json::to_vec(&window)?,
                Duration::from_millis(ttl_ms),
            )
            .await?;

        Ok(RateDecision {
            allowed: window.count <= self.max_requests,
            limit: self.max_requests,
            remaining: self.max_requests.saturating_sub(window.count),
            reset_secs: ttl_ms.div_ceil(1000),
        })
    }
}

/// Client IP for rate-limiting purposes.
///
/// First hop of `x-forwarded-for`, then `x-real-ip`, else `"unknown"`.
#[must_use]
pub fn client_ip(headers: &HeaderMap) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Ok(value) = forwarded.to_str() {
            if let Some(first) = value.split(',').next() {
                let first = first.trim();
                if !first.is_empty() {
                    return first.to_string();
                }
            }
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(value) = real_ip.to_str() {
            let value = value.trim();
            if !value.is_empty() {
                return value.to_string();
            }
        }
    }
    "unknown".to_string()
}
