//! CSRF check for mutating requests.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::Response;

use crate::error::SecurityError;
use crate::pipeline::SecurityCore;
use crate::principal::Principal;
use crate::services::cookies::{cookie_value, CSRF_SESSION_COOKIE_NAME};
use crate::services::csrf::CsrfSession;

/// Header names a client may use to present its token.
pub const CSRF_HEADER: &str = "x-csrf-token";
/// Alternate header name accepted for the token.
pub const CSRF_HEADER_ALT: &str = "csrf-token";

fn is_safe(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD || *method == Method::OPTIONS
}

/// Enforce the double-submit token on mutating methods.
///
/// Safe methods (`GET`/`HEAD`/`OPTIONS`) always pass. For everything else
/// the token must arrive in a header and belong to the request's resolved
/// session.
///
/// # Errors
///
/// `CSRF_TOKEN_MISSING` without a token header, `CSRF_TOKEN_INVALID` when
/// the token is not in this session's set.
pub async fn csrf_protect(
    State(core): State<Arc<SecurityCore>>,
    req: Request,
    next: Next,
) -> Result<Response, SecurityError> {
    if is_safe(req.method()) {
        return Ok(next.run(req).await);
    }

    let headers = req.headers();
    let cookie = cookie_value(headers, CSRF_SESSION_COOKIE_NAME);
    let session = CsrfSession::resolve(cookie.as_deref(), req.extensions().get::<Principal>());

    let presented = headers
        .get(CSRF_HEADER)
        .or_else(|| headers.get(CSRF_HEADER_ALT))
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);

    core.csrf.check(&session.id, presented.as_deref()).await?;
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_methods() {
        assert!(is_safe(&Method::GET));
        assert!(is_safe(&Method::HEAD));
        assert!(is_safe(&Method::OPTIONS));
        assert!(!is_safe(&Method::POST));
        assert!(!is_safe(&Method::PUT));
        assert!(!is_safe(&Method::PATCH));
        assert!(!is_safe(&Method::DELETE));
    }
}
