//! Typed errors for every guard rejection and their JSON envelope rendering.
//!
//! Guards never write responses themselves; they return a [`SecurityError`]
//! and the error boundary in the pipeline turns it into the
//! `{"success": false, "error": ...}` envelope with the status matching the
//! error kind.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

use crate::directory::DirectoryError;
use crate::store::StoreError;

/// Error raised by any guard or security operation.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// Missing, malformed, or expired credential.
    #[error("{0}")]
    Unauthenticated(String),

    /// Authenticated but not allowed.
    #[error("{0}")]
    Forbidden(String),

    /// A role check failed; carries the required role name for the envelope.
    #[error("role {0} required")]
    MissingRole(String),

    /// Mutating request without a CSRF token header.
    #[error("missing CSRF token")]
    CsrfTokenMissing,

    /// CSRF token not valid for the resolved session.
    #[error("invalid CSRF token")]
    CsrfTokenInvalid,

    /// Login temporarily locked after repeated failures.
    #[error("account temporarily locked, try again in {remaining_minutes} minute(s)")]
    Locked {
        /// When the lock expires.
        locked_until: DateTime<Utc>,
        /// Whole minutes until the lock expires, rounded up.
        remaining_minutes: i64,
    },

    /// Per-IP request budget exhausted.
    #[error("too many requests")]
    RateLimited {
        /// Seconds until the current window resets.
        retry_after_secs: u64,
    },

    /// Referenced user, role, or permission does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Duplicate unique value (email, username, role assignment).
    #[error("{0}")]
    Conflict(String),

    /// Malformed input rejected before reaching the guards.
    #[error("{0}")]
    Validation(String),

    /// Expiring key-value store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Stored record could not be encoded or decoded.
    #[error("encoding error: {0}")]
    Codec(#[from] serde_json::Error),

    /// User/role directory failure.
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// Token signing failure.
    #[error("token encoding failed: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    /// Anything else; rendered as a 500.
    #[error("{0}")]
    Internal(String),
}

impl SecurityError {
    /// Convenience constructor for [`Self::Unauthenticated`].
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::Unauthenticated(message.into())
    }

    /// HTTP status this error maps to.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_)
            | Self::MissingRole(_)
            | Self::CsrfTokenMissing
            | Self::CsrfTokenInvalid => StatusCode::FORBIDDEN,
            Self::Locked { .. } | Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Directory(err) => match err {
                DirectoryError::NotFound(_) => StatusCode::NOT_FOUND,
                DirectoryError::Conflict(_) => StatusCode::CONFLICT,
                DirectoryError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Store(_) | Self::Codec(_) | Self::Token(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code, where clients need to branch without
    /// string-matching the message.
    #[must_use]
    pub const fn code(&self) -> Option<&'static str> {
        match self {
            Self::CsrfTokenMissing => Some("CSRF_TOKEN_MISSING"),
            Self::CsrfTokenInvalid => Some("CSRF_TOKEN_INVALID"),
            Self::Locked { .. } => Some("ACCOUNT_LOCKED"),
            Self::RateLimited { .. } => Some("RATE_LIMITED"),
            _ => None,
        }
    }
}

impl IntoResponse for SecurityError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = json!({
            "success": false,
            "error": self.to_string(),
        });
        if let Some(code) = self.code() {
            body["code"] = json!(code);
        }
        match &self {
            Self::Locked {
                locked_until,
                remaining_minutes,
            } => {
                body["lockedUntil"] = json!(locked_until.to_rfc3339());
                body["remainingMinutes"] = json!(remaining_minutes);
            }
            Self::RateLimited { retry_after_secs } => {
                body["retryAfterSecs"] = json!(retry_after_secs);
            }
            Self::MissingRole(role) => {
                body["required"] = json!(role);
            }
            _ => {}
        }
        if status.is_server_error() {
            tracing::error!(%status, error = %self, "request failed");
        }
        (status, Json(body)).into_response()
    }
}
