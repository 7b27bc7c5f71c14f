//! Centralized error boundary.
//!
//! Guards and handlers return typed [`crate::error::SecurityError`] values
//! that render themselves as the JSON envelope; this boundary is the one
//! place applying environment-aware redaction, swapping 500 bodies for a
//! generic message in production.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::pipeline::SecurityCore;

/// Redact 500 response bodies when running in production.
pub async fn error_boundary(
    State(core): State<Arc<SecurityCore>>,
    req: Request,
    next: Next,
) -> Response {
    let response = next.run(req).await;
    if core.config.production && response.status() == StatusCode::INTERNAL_SERVER_ERROR {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "success": false,
                "error": "internal server error",
            })),
        )
            .into_response();
    }
    response
}
