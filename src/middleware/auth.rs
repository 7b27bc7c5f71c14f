//! Token verification, principal enrichment, and role gating.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

use crate::error::SecurityError;
use crate::pipeline::SecurityCore;
use crate::principal::{Principal, ROLE_ADMIN};
use crate::services::cookies::{cookie_value, AUTH_COOKIE_NAME};

/// Bearer token from the `Authorization` header, falling back to the auth
/// cookie. Header and cookie carry the same token value; either transport
/// works.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(AUTHORIZATION) {
        if let Ok(value) = value.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return Some(token.trim().to_string());
            }
        }
    }
    cookie_value(headers, AUTH_COOKIE_NAME)
}

/// Verify the request credential and attach an enriched [`Principal`].
///
/// An absent credential and an invalid one are treated identically: the
/// request is simply not authenticated.
///
/// # Errors
///
/// 401 without a verifiable credential; enrichment errors propagate.
pub async fn authenticate(
    State(core): State<Arc<SecurityCore>>,
    mut req: Request,
    next: Next,
) -> Result<Response, SecurityError> {
    let token = bearer_token(req.headers())
        .ok_or_else(|| SecurityError::unauthenticated("authentication required"))?;
    let claims = core
        .tokens
        .verify(&token)
        .ok_or_else(|| SecurityError::unauthenticated("invalid or expired credentials"))?;

    let mut principal = Principal::from_claims(claims);
    core.authz.enrich(&mut principal).await?;

    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}

/// Gate a route on the `ADMIN` role.
///
/// Assumes [`authenticate`] already ran; re-checks membership explicitly
/// rather than trusting the informational `is_admin` flag.
///
/// # Errors
///
/// 401 without a principal, 403 without the role.
pub async fn require_admin(
    State(core): State<Arc<SecurityCore>>,
    mut req: Request,
    next: Next,
) -> Result<Response, SecurityError> {
    let mut principal = req
        .extensions()
        .get::<Principal>()
        .cloned()
        .ok_or_else(|| SecurityError::unauthenticated("authentication required"))?;
    core.authz
        .require_role(&mut principal, ROLE_ADMIN, false)
        .await?;
    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}

/// Extractor handing handlers the authenticated principal.
///
/// Rejects with a 401 envelope when no upstream middleware attached one.
pub struct Authenticated(pub Principal);

impl<S> axum::extract::FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
{
    type Rejection = SecurityError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .map(Self)
            .ok_or_else(|| SecurityError::unauthenticated("authentication required"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_prefers_the_header() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("access_token=from-cookie"),
        );
        assert_eq!(bearer_token(&headers), Some("abc123".to_string()));
    }

    #[test]
    fn test_bearer_token_falls_back_to_the_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("access_token=from-cookie"),
        );
        assert_eq!(bearer_token(&headers), Some("from-cookie".to_string()));

        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_non_bearer_authorization_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert_eq!(bearer_token(&headers), None);
    }
}
