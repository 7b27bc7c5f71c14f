//! Builders for the security cookies and helpers for reading them back.
//!
//! The access token travels in an `HttpOnly` cookie so scripts can never
//! read it; the same token is also returned in the login/register JSON body
//! for non-browser clients, and both transports always carry the same value.

use axum::http::header::COOKIE;
use axum::http::HeaderMap;

/// Name of the cookie carrying the access token.
pub const AUTH_COOKIE_NAME: &str = "access_token";

/// Name of the cookie carrying the CSRF session id.
pub const CSRF_SESSION_COOKIE_NAME: &str = "csrf_session";

/// Builds `Set-Cookie` values for the auth and CSRF session cookies.
#[derive(Debug, Clone)]
pub struct SessionCookies {
    /// Adds the `Secure` attribute when running in production.
    secure: bool,
    /// Auth cookie lifetime in seconds; matches the token ttl.
    auth_max_age_secs: u64,
    /// CSRF session cookie lifetime in seconds.
    csrf_max_age_secs: u64,
}

impl SessionCookies {
    /// Create a builder.
    #[must_use]
    pub const fn new(secure: bool, auth_max_age_secs: u64, csrf_max_age_secs: u64) -> Self {
        Self {
            secure,
            auth_max_age_secs,
            csrf_max_age_secs,
        }
    }

    fn build(&self, name: &str, value: &str, max_age_secs: u64) -> String {
        let mut cookie =
            format!("{name}={value}; Path=/; Max-Age={max_age_secs}; SameSite=Strict; HttpOnly");
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// Cookie carrying the bearer token.
    #[must_use]
    pub fn auth_cookie(&self, token: &str) -> String {
        self.build(AUTH_COOKIE_NAME, token, self.auth_max_age_secs)
    }

    /// Cookie clearing the bearer token.
    #[must_use]
    pub fn clear_auth_cookie(&self) -> String {
        self.build(AUTH_COOKIE_NAME, "", 0)
    }

    /// Cookie carrying the CSRF session id.
    #[must_use]
    pub fn csrf_session_cookie(&self, session_id: &str) -> String {
        self.build(CSRF_SESSION_COOKIE_NAME, session_id, self.csrf_max_age_secs)
    }
}

/// Extract a named cookie value from request headers.
#[must_use]
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookie_header = headers.get(COOKIE)?;
    let cookie_str = cookie_header.to_str().ok()?;

    for cookie in cookie_str.split(';') {
        let cookie = cookie.trim();
        if let Some((cookie_name, value)) = cookie.split_once('=') {
            if cookie_name.trim() == name {
                return Some(value.trim().to_string());
            }
        }
    }

    None
}
