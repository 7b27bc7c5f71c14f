//! Configuration for the security core.
//!
//! Loaded from `config/default.toml`, overridden by `config/local.toml`,
//! then by `SHELFGUARD_`-prefixed environment variables (sections split on
//! `__`, e.g. `SHELFGUARD_JWT__SECRET`).

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use thiserror::Error;

/// Error raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration files or environment could not be read.
    #[error("configuration could not be loaded: {0}")]
    Load(#[from] Box<figment::Error>),
    /// The JWT signing secret is mandatory; refusing to start without it.
    #[error("jwt.secret is not configured; set SHELFGUARD_JWT__SECRET")]
    MissingJwtSecret,
}

/// Top-level security configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityConfig {
    /// HTTP server binding.
    #[serde(default)]
    pub server: ServerConfig,
    /// Production flag; controls the `Secure` cookie attribute and 500-body
    /// redaction.
    #[serde(default)]
    pub production: bool,
    /// Token signing configuration.
    #[serde(default)]
    pub jwt: JwtConfig,
    /// Allowed CORS origins.
    #[serde(default)]
    pub cors: CorsConfig,
    /// Per-IP rate limiting.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Failed-login lockout.
    #[serde(default)]
    pub lockout: LockoutConfig,
    /// CSRF token management.
    #[serde(default)]
    pub csrf: CsrfConfig,
    /// Expiring key-value store backend and RBAC cache ttl.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Argon2 parameters.
    #[serde(default)]
    pub password: PasswordConfig,
}

/// Server endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// JWT configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    /// Signing secret. Empty is treated as unconfigured and is fatal at
    /// startup, not at request time.
    #[serde(default)]
    pub secret: String,
    /// Access token lifetime in seconds.
    #[serde(default = "default_token_ttl")]
    pub ttl_seconds: u64,
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins; `*` allows any origin.
    #[serde(default = "default_origins")]
    pub allowed_origins: Vec<String>,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per window per client IP.
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,
    /// Window length in seconds.
    #[serde(default = "default_rate_window")]
    pub window_seconds: u64,
}

/// Login lockout configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LockoutConfig {
    /// Failed attempts before the account locks.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Lock duration in seconds once the threshold is reached.
    #[serde(default = "default_lockout_seconds")]
    pub lockout_seconds: u64,
    /// Attempt-record lifetime in seconds, refreshed on every write.
    #[serde(default = "default_attempt_window")]
    pub window_seconds: u64,
}

/// CSRF configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CsrfConfig {
    /// Token set lifetime in seconds, refreshed on every issuance.
    #[serde(default = "default_csrf_ttl")]
    pub token_ttl_seconds: u64,
    /// `csrf_session` cookie lifetime in seconds.
    #[serde(default = "default_csrf_cookie_ttl")]
    pub session_cookie_ttl_seconds: u64,
    /// Token length in bytes before hex encoding.
    #[serde(default = "default_token_bytes")]
    pub token_bytes: usize,
}

/// Expiring store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Redis URL; when absent or unreachable the in-process store is used.
    #[serde(default)]
    pub url: Option<String>,
    /// RBAC role/permission cache ttl in seconds.
    #[serde(default = "default_rbac_ttl")]
    pub rbac_ttl_seconds: u64,
}

/// Password hashing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PasswordConfig {
    /// Argon2 memory cost in KiB.
    #[serde(default = "default_memory_cost")]
    pub memory_cost: u32,
    /// Argon2 time cost (iterations).
    #[serde(default = "default_time_cost")]
    pub time_cost: u32,
    /// Argon2 parallelism factor.
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
    /// Output hash length in bytes.
    #[serde(default = "default_hash_length")]
    pub hash_length: usize,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    8080
}

const fn default_token_ttl() -> u64 {
    28_800 // 8 hours, matches the auth cookie Max-Age
}

fn default_origins() -> Vec<String> {
    vec!["*".to_string()]
}

const fn default_max_requests() -> u64 {
    500
}

const fn default_rate_window() -> u64 {
    3600 // 60 minutes
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_lockout_seconds() -> u64 {
    900 // 15 minutes
}

const fn default_attempt_window() -> u64 {
    900 // 15 minutes
}

const fn default_csrf_ttl() -> u64 {
    3600 // 1 hour
}

const fn default_csrf_cookie_ttl() -> u64 {
    86_400 // 24 hours
}

const fn default_token_bytes() -> usize {
    32
}

const fn default_rbac_ttl() -> u64 {
    60
}

const fn default_memory_cost() -> u32 {
    19_456 // OWASP recommended minimum
}

const fn default_time_cost() -> u32 {
    2
}

const fn default_parallelism() -> u32 {
    1
}

const fn default_hash_length() -> usize {
    32
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: None,
            rbac_ttl_seconds: default_rbac_ttl(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            ttl_seconds: default_token_ttl(),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_origins(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_seconds: default_rate_window(),
        }
    }
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            lockout_seconds: default_lockout_seconds(),
            window_seconds: default_attempt_window(),
        }
    }
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            token_ttl_seconds: default_csrf_ttl(),
            session_cookie_ttl_seconds: default_csrf_cookie_ttl(),
            token_bytes: default_token_bytes(),
        }
    }
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_cost: default_memory_cost(),
            time_cost: default_time_cost(),
            parallelism: default_parallelism(),
            hash_length: default_hash_length(),
        }
    }
}

impl SecurityConfig {
    /// Load configuration from files and environment, then validate it.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded or the JWT secret
    /// is missing.
    pub fn load() -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Toml::file("config/local.toml"))
            .merge(Env::prefixed("SHELFGUARD_").split("__"))
            .extract()
            .map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that must hold before the process can serve traffic.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingJwtSecret`] when no signing secret is
    /// configured.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt.secret.trim().is_empty() {
            return Err(ConfigError::MissingJwtSecret);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SecurityConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.jwt.ttl_seconds, 28_800);
        assert_eq!(config.rate_limit.max_requests, 500);
        assert_eq!(config.rate_limit.window_seconds, 3600);
        assert_eq!(config.lockout.max_attempts, 5);
        assert_eq!(config.lockout.lockout_seconds, 900);
        assert_eq!(config.csrf.token_ttl_seconds, 3600);
        assert_eq!(config.cache.rbac_ttl_seconds, 60);
        assert_eq!(config.password.memory_cost, 19_456);
        assert!(!config.production);
    }

    #[test]
    fn test_missing_secret_is_fatal() {
        let config = SecurityConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingJwtSecret)
        ));

        let mut config = SecurityConfig::default();
        config.jwt.secret = "unit-test-secret".to_string();
        assert!(config.validate().is_ok());
    }
}
