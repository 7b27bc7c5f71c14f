//! Composition root: one [`SecurityCore`] built at startup, injected into
//! every guard, and assembled into the ordered middleware pipeline.

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::{CorsConfig, SecurityConfig};
use crate::directory::{RoleStore, UserStore};
use crate::handlers;
use crate::middleware::{
    authenticate, csrf_protect, error_boundary, require_admin, security_headers, RateLimitLayer,
};
use crate::services::{
    AuthorizationEngine, CsrfGuard, LoginLockout, PasswordService, RateLimiter, SessionCookies,
    TokenService,
};
use crate::store::ExpiringStore;

/// Everything the guards need, constructed once at process start.
///
/// No global state: the expiring store and the directory are injected here
/// and passed to each guard explicitly, which is also what makes the guards
/// unit-testable against fakes.
pub struct SecurityCore {
    /// Loaded configuration.
    pub config: SecurityConfig,
    /// The shared expiring key-value store.
    pub store: Arc<dyn ExpiringStore>,
    /// User account storage.
    pub users: Arc<dyn UserStore>,
    /// Role and permission storage.
    pub roles: Arc<dyn RoleStore>,
    /// Password hashing.
    pub passwords: PasswordService,
    /// Bearer token issuance and verification.
    pub tokens: TokenService,
    /// Cookie building.
    pub cookies: SessionCookies,
    /// Failed-login lockout guard.
    pub lockout: LoginLockout,
    /// CSRF token guard.
    pub csrf: CsrfGuard,
    /// Per-IP rate limiter.
    pub limiter: RateLimiter,
    /// RBAC engine.
    pub authz: AuthorizationEngine,
}

impl SecurityCore {
    /// Build the core from validated configuration and injected stores.
    ///
    /// # Errors
    ///
    /// Fails fast on a missing JWT secret or invalid Argon2 parameters.
    pub fn new(
        config: SecurityConfig,
        store: Arc<dyn ExpiringStore>,
        users: Arc<dyn UserStore>,
        roles: Arc<dyn RoleStore>,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let passwords = PasswordService::from_config(&config.password)?;
        let tokens = TokenService::new(&config.jwt.secret, config.jwt.ttl_seconds);
        let cookies = SessionCookies::new(
            config.production,
            config.jwt.ttl_seconds,
            config.csrf.session_cookie_ttl_seconds,
        );
        let lockout = LoginLockout::new(store.clone(), &config.lockout);
        let csrf = CsrfGuard::new(store.clone(), &config.csrf);
        let limiter = RateLimiter::new(store.clone(), &config.rate_limit);
        let authz = AuthorizationEngine::new(
            store.clone(),
            users.clone(),
            roles.clone(),
            Duration::from_secs(config.cache.rbac_ttl_seconds),
        );

        Ok(Self {
            config,
            store,
            users,
            roles,
            passwords,
            tokens,
            cookies,
            lockout,
            csrf,
            limiter,
            authz,
        })
    }
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if config.allowed_origins.iter().any(|origin| origin == "*") {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

/// Assemble the request pipeline.
///
/// Outermost first: trace, CORS (so even 429s and preflights carry CORS
/// headers), rate limiting, security headers, the error boundary, the CSRF
/// check for mutating methods, then the routes. Protected routes add token
/// verification + enrichment; admin routes add the `ADMIN` role gate on top.
pub fn router(core: Arc<SecurityCore>) -> Router {
    let admin = Router::new()
        .route(
            "/admin/users/{user_id}/roles/{role_id}",
            post(handlers::assign_role).delete(handlers::remove_role),
        )
        .route("/admin/users/{user_id}/promote", post(handlers::promote))
        .route_layer(from_fn_with_state(core.clone(), require_admin))
        .route_layer(from_fn_with_state(core.clone(), authenticate));

    let protected = Router::new()
        .route("/auth/me", get(handlers::me))
        .route_layer(from_fn_with_state(core.clone(), authenticate));

    Router::new()
        .route("/auth/register", post(handlers::register))
        .route("/auth/login", post(handlers::login))
        .route("/auth/logout", post(handlers::logout))
        .route("/csrf-token", get(handlers::csrf_token))
        .merge(protected)
        .merge(admin)
        .layer(from_fn_with_state(core.clone(), csrf_protect))
        .layer(from_fn_with_state(core.clone(), error_boundary))
        .layer(from_fn(security_headers))
        .layer(RateLimitLayer::new(core.limiter.clone()))
        .layer(cors_layer(&core.config.cors))
        .layer(TraceLayer::new_for_http())
        .with_state(core)
}
