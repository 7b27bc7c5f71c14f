//! Abstract user and role storage.
//!
//! The relational schema and ORM layer live elsewhere; the security core
//! consumes them only through these narrow async traits. An in-memory
//! implementation backs the demo binary and the tests.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::principal::{Permission, Role};

pub use memory::MemoryDirectory;

/// Error raised by the user/role directory.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Referenced record does not exist.
    #[error("{0} not found")]
    NotFound(String),
    /// Unique constraint violated.
    #[error("{0}")]
    Conflict(String),
    /// Backing store failure.
    #[error("directory error: {0}")]
    Backend(String),
}

/// A stored user account.
#[derive(Debug, Clone)]
pub struct User {
    /// Opaque identifier.
    pub id: String,
    /// Unique email, stored lowercased.
    pub email: String,
    /// Unique display name.
    pub username: String,
    /// Argon2 hash of the password; never leaves the directory layer in a
    /// response body.
    pub password_hash: String,
    /// Last successful login.
    pub last_login_at: Option<DateTime<Utc>>,
    /// Soft-deletion marker; soft-deleted users are excluded from lookups
    /// and from active-role-holder counts.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Input for creating a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    /// Unique email.
    pub email: String,
    /// Unique display name.
    pub username: String,
    /// Already-hashed password.
    pub password_hash: String,
}

/// A role held by a user, with assignment provenance.
#[derive(Debug, Clone)]
pub struct RoleAssignment {
    /// The assigned role.
    pub role_id: i64,
    /// When the role was assigned.
    pub assigned_at: DateTime<Utc>,
    /// Who assigned it; cleared when that user is deleted.
    pub assigned_by: Option<String>,
}

/// User account storage.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Look a user up by id. Excludes soft-deleted users.
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, DirectoryError>;

    /// Look a user up by email (case-insensitive). Excludes soft-deleted
    /// users.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, DirectoryError>;

    /// Create a user.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Conflict`] when the email or username is
    /// already taken.
    async fn create(&self, new_user: NewUser) -> Result<User, DirectoryError>;

    /// Stamp the user's last successful login.
    async fn update_last_login(&self, id: &str) -> Result<(), DirectoryError>;
}

/// Role and permission storage.
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// All roles held by a user.
    async fn roles_for_user(&self, user_id: &str) -> Result<Vec<Role>, DirectoryError>;

    /// Permissions flattened across all the user's roles, deduplicated by
    /// permission id.
    async fn permissions_for_user(&self, user_id: &str)
        -> Result<Vec<Permission>, DirectoryError>;

    /// Look a role up by id.
    async fn find_role(&self, role_id: i64) -> Result<Option<Role>, DirectoryError>;

    /// Look a role up by its unique name.
    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, DirectoryError>;

    /// Assign a role to a user.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Conflict`] when the user already holds the
    /// role.
    async fn assign_role(
        &self,
        user_id: &str,
        role_id: i64,
        assigned_by: Option<&str>,
    ) -> Result<(), DirectoryError>;

    /// Remove a role from a user.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::NotFound`] when the user does not hold the
    /// role.
    async fn remove_role(&self, user_id: &str, role_id: i64) -> Result<(), DirectoryError>;

    /// Count users currently holding a role, excluding soft-deleted users.
    async fn count_active_holders(&self, role_id: i64) -> Result<u64, DirectoryError>;
}
