//! HTTP handlers for the security surface: registration, login, logout,
//! the current principal, CSRF token issuance, and admin role management.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::directory::{NewUser, User};
use crate::error::SecurityError;
use crate::middleware::Authenticated;
use crate::pipeline::SecurityCore;
use crate::principal::ROLE_USER;
use crate::services::cookies::{cookie_value, CSRF_SESSION_COOKIE_NAME};
use crate::services::csrf::CsrfSession;

/// Registration request body.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    /// Account email; must be unique.
    pub email: String,
    /// Display name; must be unique.
    pub username: String,
    /// Plaintext password; hashed before storage.
    pub password: String,
}

/// Login request body.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Account email.
    pub email: String,
    /// Plaintext password.
    pub password: String,
}

/// Public profile fields of a user; never includes the password hash.
#[derive(Debug, Serialize)]
pub struct UserProfile {
    /// Opaque identifier.
    pub id: String,
    /// Account email.
    pub email: String,
    /// Display name.
    pub username: String,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            username: user.username.clone(),
        }
    }
}

/// Body returned by register and login.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    /// Always `true` on this path.
    pub success: bool,
    /// The bearer token, duplicated from the cookie for non-browser
    /// clients.
    pub token: String,
    /// The authenticated user's profile.
    pub user: UserProfile,
}

fn auth_success(
    core: &SecurityCore,
    status: StatusCode,
    user: &User,
    token: &str,
) -> Response {
    let body = AuthResponse {
        success: true,
        token: token.to_string(),
        user: UserProfile::from(user),
    };
    let mut response = (status, Json(body)).into_response();
    if let Ok(cookie) = core.cookies.auth_cookie(token).parse() {
        response.headers_mut().append(SET_COOKIE, cookie);
    }
    response
}

/// `POST /auth/register`
///
/// # Errors
///
/// 400 on malformed input, 409 on duplicate email or username.
pub async fn register(
    State(core): State<Arc<SecurityCore>>,
    Json(body): Json<RegisterRequest>,
) -> Result<Response, SecurityError> {
    let email = body.email.trim().to_lowercase();
    let username = body.username.trim().to_string();
    if !email.contains('@') {
        return Err(SecurityError::Validation("a valid email is required".to_string()));
    }
    if username.is_empty() {
        return Err(SecurityError::Validation("username is required".to_string()));
    }
    if body.password.len() < 8 {
        return Err(SecurityError::Validation(
            "password must be at least 8 characters".to_string(),
        ));
    }

    let password_hash = core
        .passwords
        .hash(&body.password)
        .map_err(|e| SecurityError::Internal(e.to_string()))?;
    let user = core
        .users
        .create(NewUser {
            email,
            username,
            password_hash,
        })
        .await?;

    // Every account starts with the USER system role.
    if let Some(role) = core.roles.find_role_by_name(ROLE_USER).await? {
        core.authz.assign_role(&user.id, role.id, None).await?;
    }

    let token = core.tokens.issue(&user)?;
    info!(user_id = %user.id, "user registered");
    Ok(auth_success(&core, StatusCode::CREATED, &user, &token))
}

/// `POST /auth/login`
///
/// The lockout gate runs before any credential is compared; a locked email
/// is rejected even with the correct password.
///
/// # Errors
///
/// 429 while locked, 401 on bad credentials.
pub async fn login(
    State(core): State<Arc<SecurityCore>>,
    Json(body): Json<LoginRequest>,
) -> Result<Response, SecurityError> {
    let email = body.email.trim().to_lowercase();
    core.lockout.ensure_unlocked(&email).await?;

    let Some(user) = core.users.find_by_email(&email).await? else {
        // Unknown emails count as failures too; the response is
        // indistinguishable from a bad password.
        core.lockout.record_failure(&email).await?;
        return Err(SecurityError::unauthenticated("invalid email or password"));
    };

    if !core.passwords.verify(&user.password_hash, &body.password) {
        core.lockout.record_failure(&email).await?;
        return Err(SecurityError::unauthenticated("invalid email or password"));
    }

    core.lockout.record_success(&email).await?;
    core.users.update_last_login(&user.id).await?;
    let token = core.tokens.issue(&user)?;
    info!(user_id = %user.id, "login succeeded");
    Ok(auth_success(&core, StatusCode::OK, &user, &token))
}

/// `POST /auth/logout`
///
/// Clears the auth cookie; the bearer token itself simply ages out.
pub async fn logout(State(core): State<Arc<SecurityCore>>) -> Response {
    let mut response = Json(json!({ "success": true })).into_response();
    if let Ok(cookie) = core.cookies.clear_auth_cookie().parse() {
        response.headers_mut().append(SET_COOKIE, cookie);
    }
    response
}

/// `GET /auth/me`
pub async fn me(Authenticated(principal): Authenticated) -> Json<serde_json::Value> {
    let roles: Vec<&str> = principal
        .roles
        .iter()
        .flatten()
        .map(|role| role.name.as_str())
        .collect();
    let permissions: Vec<&str> = principal
        .permissions
        .iter()
        .flatten()
        .map(|permission| permission.label.as_str())
        .collect();
    Json(json!({
        "success": true,
        "user": {
            "id": principal.id,
            "email": principal.email,
            "username": principal.username,
            "roles": roles,
            "permissions": permissions,
            "isAdmin": principal.is_admin,
        },
    }))
}

/// `GET /csrf-token`
///
/// Issues a token for the request's session, creating an anonymous session
/// (and setting its cookie) when none exists yet. No other side effects.
///
/// # Errors
///
/// Store errors only.
pub async fn csrf_token(
    State(core): State<Arc<SecurityCore>>,
    headers: HeaderMap,
) -> Result<Response, SecurityError> {
    let cookie = cookie_value(&headers, CSRF_SESSION_COOKIE_NAME);
    let session = CsrfSession::resolve(cookie.as_deref(), None);
    let issued = core.csrf.issue(&session.id).await?;

    let display_id: String = issued.session_id.chars().take(8).collect();
    let mut response = Json(json!({
        "success": true,
        "token": issued.token,
        "sessionId": display_id,
        "expiresAt": issued.expires_at.to_rfc3339(),
    }))
    .into_response();

    // Only a fresh session gets a cookie; an existing one is never
    // overwritten.
    if session.fresh {
        if let Ok(cookie) = core.cookies.csrf_session_cookie(&session.id).parse() {
            response.headers_mut().append(SET_COOKIE, cookie);
        }
    }
    Ok(response)
}

/// `POST /admin/users/{user_id}/roles/{role_id}`
///
/// # Errors
///
/// 404 for unknown user or role, 409 when already assigned.
pub async fn assign_role(
    State(core): State<Arc<SecurityCore>>,
    Authenticated(admin): Authenticated,
    Path((user_id, role_id)): Path<(String, i64)>,
) -> Result<Json<serde_json::Value>, SecurityError> {
    let role = core
        .authz
        .assign_role(&user_id, role_id, Some(&admin.id))
        .await?;
    Ok(Json(json!({ "success": true, "role": role.name })))
}

/// `DELETE /admin/users/{user_id}/roles/{role_id}`
///
/// # Errors
///
/// 403 for protected roles (`USER`, the last `ADMIN`), 404 otherwise.
pub async fn remove_role(
    State(core): State<Arc<SecurityCore>>,
    Authenticated(_admin): Authenticated,
    Path((user_id, role_id)): Path<(String, i64)>,
) -> Result<Json<serde_json::Value>, SecurityError> {
    let role = core.authz.remove_role(&user_id, role_id).await?;
    Ok(Json(json!({ "success": true, "role": role.name })))
}

/// `POST /admin/users/{user_id}/promote`
///
/// # Errors
///
/// 404 for an unknown user, 409 when already an admin.
pub async fn promote(
    State(core): State<Arc<SecurityCore>>,
    Authenticated(admin): Authenticated,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>, SecurityError> {
    let role = core.authz.make_admin(&user_id, Some(&admin.id)).await?;
    Ok(Json(json!({ "success": true, "role": role.name })))
}
