//! Security services: the guards and the primitives they are built from.

pub mod authz;
pub mod cookies;
pub mod csrf;
pub mod lockout;
pub mod password;
pub mod rate_limit;
pub mod token;

pub use authz::AuthorizationEngine;
pub use cookies::SessionCookies;
pub use csrf::CsrfGuard;
pub use lockout::LoginLockout;
pub use password::PasswordService;
pub use rate_limit::RateLimiter;
pub use token::TokenService;
