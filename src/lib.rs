//! Security core for a book-cataloguing REST service.
//!
//! Covers authentication, session security, and authorization: HS256 bearer
//! tokens carried in an `HttpOnly` cookie, Argon2id password hashing, a
//! failed-login lockout state machine, double-submit CSRF tokens, per-IP
//! sliding-window rate limiting, and a two-tier role + permission model
//! fronted by a short-TTL cache. [`pipeline::router`] composes all of it
//! into an ordered axum middleware chain.
//!
//! The relational layer is consumed only through the
//! [`directory::UserStore`]/[`directory::RoleStore`] traits, and every
//! stateful guard keeps its records behind [`store::ExpiringStore`], so the
//! whole core runs against in-memory fakes in tests and against redis plus
//! a real database in production.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod directory;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod pipeline;
pub mod principal;
pub mod services;
pub mod store;

pub use config::SecurityConfig;
pub use error::SecurityError;
pub use pipeline::{router, SecurityCore};
pub use principal::{Permission, Principal, Role};
