//! Request middlewares composing the guards into the pipeline.
//!
//! Ordering is load-bearing and assembled in [`crate::pipeline`]: CORS and
//! rate limiting first (always, even on error paths), then static security
//! headers, then the error boundary, then CSRF, then authentication and
//! authorization for the routes that want them.

pub mod auth;
pub mod csrf;
pub mod errors;
pub mod headers;
pub mod rate_limit;

pub use auth::{authenticate, require_admin, Authenticated};
pub use csrf::csrf_protect;
pub use errors::error_boundary;
pub use headers::security_headers;
pub use rate_limit::RateLimitLayer;
