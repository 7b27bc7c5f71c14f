//! Role and permission resolution with a short-TTL cache.
//!
//! Enrichment reads cache-first with write-through; the `require_*` checks
//! re-fetch authoritative state when asked to bypass the cache or when the
//! principal has not been enriched. Every role mutation deletes the user's
//! cached entries before returning, so the very next check sees authoritative
//! state; the 60-second ttl only bounds staleness for reads that never see a
//! mutation.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::directory::{RoleStore, UserStore};
use crate::error::SecurityError;
use crate::principal::{Permission, Principal, Role, ROLE_ADMIN, ROLE_USER};
use crate::store::ExpiringStore;

const ROLES_KEY_PREFIX: &str = "rbac:roles:";
const PERMS_KEY_PREFIX: &str = "rbac:perms:";

/// Two-tier RBAC checks backed by an abstract role store and a short-TTL
/// cache.
#[derive(Clone)]
pub struct AuthorizationEngine {
    cache: Arc<dyn ExpiringStore>,
    users: Arc<dyn UserStore>,
    roles: Arc<dyn RoleStore>,
    cache_ttl: Duration,
}

impl AuthorizationEngine {
    /// Create an engine over the given stores.
    #[must_use]
    pub fn new(
        cache: Arc<dyn ExpiringStore>,
        users: Arc<dyn UserStore>,
        roles: Arc<dyn RoleStore>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            cache,
            users,
            roles,
            cache_ttl,
        }
    }

    fn roles_key(user_id: &str) -> String {
        format!("{ROLES_KEY_PREFIX}{user_id}")
    }

    fn perms_key(user_id: &str) -> String {
        format!("{PERMS_KEY_PREFIX}{user_id}")
    }

    async fn cached<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SecurityError> {
        let Some(bytes) = self.cache.get(key).await? else {
            return Ok(None);
        };
        Ok(serde_json::from_slice(&bytes).ok())
    }

    async fn cache_put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), SecurityError> {
        self.cache
            .set(key, serde_json::to_vec(value)?, self.cache_ttl)
            .await?;
        Ok(())
    }

    async fn ensure_user(&self, user_id: &str) -> Result<(), SecurityError> {
        if self.users.find_by_id(user_id).await?.is_none() {
            return Err(SecurityError::NotFound("user".to_string()));
        }
        Ok(())
    }

    /// Populate a principal's roles and permissions, cache-first.
    ///
    /// # Errors
    ///
    /// 404 when the user no longer exists; store errors otherwise.
    pub async fn enrich(&self, principal: &mut Principal) -> Result<(), SecurityError> {
        let roles_key = Self::roles_key(&principal.id);
        let roles: Vec<Role> = match self.cached(&roles_key).await? {
            Some(roles) => roles,
            None => {
                self.ensure_user(&principal.id).await?;
                let roles = self.roles.roles_for_user(&principal.id).await?;
                self.cache_put(&roles_key, &roles).await?;
                debug!(user_id = %principal.id, "role cache refreshed");
                roles
            }
        };

        let perms_key = Self::perms_key(&principal.id);
        let permissions: Vec<Permission> = match self.cached(&perms_key).await? {
            Some(permissions) => permissions,
            None => {
                let permissions = self.roles.permissions_for_user(&principal.id).await?;
                self.cache_put(&perms_key, &permissions).await?;
                permissions
            }
        };

        principal.set_roles(roles);
        principal.permissions = Some(permissions);
        Ok(())
    }

    /// Require the principal to hold a role, by exact case-sensitive name.
    ///
    /// When `bypass_cache` is set, or the principal carries no roles yet,
    /// the authoritative store is consulted and the principal repopulated.
    ///
    /// # Errors
    ///
    /// 404 when the user does not exist, 403 (with the required role echoed)
    /// when the role is missing.
    pub async fn require_role(
        &self,
        principal: &mut Principal,
        role_name: &str,
        bypass_cache: bool,
    ) -> Result<(), SecurityError> {
        if bypass_cache || principal.roles.is_none() {
            self.ensure_user(&principal.id).await?;
            let roles = self.roles.roles_for_user(&principal.id).await?;
            principal.set_roles(roles);
        }
        if principal.has_role(role_name) {
            Ok(())
        } else {
            Err(SecurityError::MissingRole(role_name.to_string()))
        }
    }

    /// Require the principal to hold a permission matching `action` and
    /// `resource` exactly; `None` only matches `None`, no wildcards.
    ///
    /// # Errors
    ///
    /// 404 when the user does not exist, 403 when no permission matches.
    pub async fn require_permission(
        &self,
        principal: &mut Principal,
        action: Option<&str>,
        resource: Option<&str>,
        bypass_cache: bool,
    ) -> Result<(), SecurityError> {
        if bypass_cache || principal.permissions.is_none() {
            self.ensure_user(&principal.id).await?;
            let permissions = self.roles.permissions_for_user(&principal.id).await?;
            principal.permissions = Some(permissions);
        }
        let matched = principal.permissions.as_ref().is_some_and(|permissions| {
            permissions.iter().any(|permission| {
                permission.action.as_deref() == action
                    && permission.resource.as_deref() == resource
            })
        });
        if matched {
            Ok(())
        } else {
            Err(SecurityError::Forbidden("insufficient permissions".to_string()))
        }
    }

    /// Assign a role to a user and invalidate their cached entries.
    ///
    /// # Errors
    ///
    /// 404 for a missing user or role, 409 when already assigned.
    pub async fn assign_role(
        &self,
        user_id: &str,
        role_id: i64,
        assigned_by: Option<&str>,
    ) -> Result<Role, SecurityError> {
        self.ensure_user(user_id).await?;
        let role = self
            .roles
            .find_role(role_id)
            .await?
            .ok_or_else(|| SecurityError::NotFound("role".to_string()))?;
        self.roles.assign_role(user_id, role_id, assigned_by).await?;
        self.invalidate(user_id).await?;
        debug!(%user_id, role = %role.name, "role assigned");
        Ok(role)
    }

    /// Remove a role from a user, enforcing the protected-role invariants,
    /// and invalidate their cached entries.
    ///
    /// # Errors
    ///
    /// 403 when removing `USER` (always protected) or the last active
    /// `ADMIN` holder's `ADMIN` role; 404 for a missing user, role, or
    /// assignment.
    pub async fn remove_role(&self, user_id: &str, role_id: i64) -> Result<Role, SecurityError> {
        self.ensure_user(user_id).await?;
        let role = self
            .roles
            .find_role(role_id)
            .await?
            .ok_or_else(|| SecurityError::NotFound("role".to_string()))?;
        if role.name == ROLE_USER {
            return Err(SecurityError::Forbidden(
                "the USER role cannot be removed".to_string(),
            ));
        }
        if role.name == ROLE_ADMIN {
            let holders = self.roles.count_active_holders(role_id).await?;
            if holders <= 1 {
                return Err(SecurityError::Forbidden(
                    "cannot remove the last remaining ADMIN".to_string(),
                ));
            }
        }
        self.roles.remove_role(user_id, role_id).await?;
        self.invalidate(user_id).await?;
        debug!(%user_id, role = %role.name, "role removed");
        Ok(role)
    }

    /// Grant the `ADMIN` role.
    ///
    /// # Errors
    ///
    /// 404 when the user or the `ADMIN` role is missing, 409 when already an
    /// admin.
    pub async fn make_admin(
        &self,
        user_id: &str,
        assigned_by: Option<&str>,
    ) -> Result<Role, SecurityError> {
        let role = self
            .roles
            .find_role_by_name(ROLE_ADMIN)
            .await?
            .ok_or_else(|| SecurityError::NotFound("ADMIN role".to_string()))?;
        self.assign_role(user_id, role.id, assigned_by).await
    }

    /// Drop a user's cached role and permission sets.
    ///
    /// Called synchronously by every mutation here; also the hook for any
    /// external operation (e.g. editing a role's permission set) that
    /// changes a user's effective permissions.
    ///
    /// # Errors
    ///
    /// Returns a store error when a delete fails.
    pub async fn invalidate(&self, user_id: &str) -> Result<(), SecurityError> {
        self.cache.delete(&Self::roles_key(user_id)).await?;
        self.cache.delete(&Self::perms_key(user_id)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{MemoryDirectory, NewUser};
    use crate::store::MemoryStore;

    const USER_ROLE_ID: i64 = 1;
    const ADMIN_ROLE_ID: i64 = 2;

    struct Fixture {
        engine: AuthorizationEngine,
        directory: Arc<MemoryDirectory>,
    }

    fn fixture() -> Fixture {
        let directory = Arc::new(MemoryDirectory::seeded());
        let engine = AuthorizationEngine::new(
            Arc::new(MemoryStore::new()),
            directory.clone(),
            directory.clone(),
            Duration::from_secs(60),
        );
        Fixture { engine, directory }
    }

    async fn create_user(directory: &MemoryDirectory, email: &str, username: &str) -> String {
        let user = directory
            .create(NewUser {
                email: email.to_string(),
                username: username.to_string(),
                password_hash: "$argon2id$test".to_string(),
            })
            .await
            .unwrap();
        directory
            .assign_role(&user.id, USER_ROLE_ID, None)
            .await
            .unwrap();
        user.id
    }

    fn principal_for(id: &str) -> Principal {
        Principal {
            id: id.to_string(),
            email: format!("{id}@example.com"),
            username: id.to_string(),
            roles: None,
            permissions: None,
            is_admin: false,
        }
    }

    #[tokio::test]
    async fn test_enrichment_populates_roles_and_permissions() {
        let Fixture { engine, directory } = fixture();
        let user_id = create_user(&directory, "reader@example.com", "reader").await;

        let mut principal = principal_for(&user_id);
        engine.enrich(&mut principal).await.unwrap();

        assert!(principal.has_role(ROLE_USER));
        assert!(!principal.is_admin);
        let permissions = principal.permissions.as_ref().unwrap();
        assert!(permissions
            .iter()
            .any(|permission| permission.label == "book:read"));
    }

    #[tokio::test]
    async fn test_require_role_matches_exactly() {
        let Fixture { engine, directory } = fixture();
        let user_id = create_user(&directory, "reader@example.com", "reader").await;

        let mut principal = principal_for(&user_id);
        engine
            .require_role(&mut principal, ROLE_USER, false)
            .await
            .unwrap();

        let err = engine
            .require_role(&mut principal, ROLE_ADMIN, false)
            .await
            .unwrap_err();
        match err {
            SecurityError::MissingRole(role) => assert_eq!(role, ROLE_ADMIN),
            other => panic!("expected MissingRole, got {other:?}"),
        }

        // Case matters.
        assert!(engine
            .require_role(&mut principal, "user", false)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_found() {
        let Fixture { engine, .. } = fixture();
        let mut principal = principal_for("ghost");
        let err = engine.enrich(&mut principal).await.unwrap_err();
        assert!(matches!(err, SecurityError::NotFound(_)));

        let err = engine
            .require_role(&mut principal, ROLE_USER, false)
            .await
            .unwrap_err();
        assert!(matches!(err, SecurityError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_permission_matching_has_no_wildcards() {
        let Fixture { engine, directory } = fixture();
        let user_id = create_user(&directory, "reader@example.com", "reader").await;
        // A permission with no action only matches a check with no action.
        directory.insert_role(
            Role {
                id: 7,
                name: "ANNOUNCER".to_string(),
                description: None,
            },
            vec![Permission {
                id: 30,
                label: "announce".to_string(),
                action: None,
                resource: Some("feed".to_string()),
            }],
        );
        directory.assign_role(&user_id, 7, None).await.unwrap();

        let mut principal = principal_for(&user_id);
        engine
            .require_permission(&mut principal, Some("read"), Some("book"), false)
            .await
            .unwrap();
        engine
            .require_permission(&mut principal, None, Some("feed"), false)
            .await
            .unwrap();

        // No wildcard: a None action in the check does not match "read".
        assert!(engine
            .require_permission(&mut principal, None, Some("book"), false)
            .await
            .is_err());
        assert!(engine
            .require_permission(&mut principal, Some("write"), Some("book"), false)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_mutations_invalidate_the_cache() {
        let Fixture { engine, directory } = fixture();
        let user_id = create_user(&directory, "reader@example.com", "reader").await;

        // Warm the cache.
        let mut before = principal_for(&user_id);
        engine.enrich(&mut before).await.unwrap();
        assert!(!before.has_role(ROLE_ADMIN));

        engine.assign_role(&user_id, ADMIN_ROLE_ID, None).await.unwrap();

        // The very next enrichment sees the new role, well inside the 60s ttl.
        let mut after = principal_for(&user_id);
        engine.enrich(&mut after).await.unwrap();
        assert!(after.has_role(ROLE_ADMIN));
        assert!(after.is_admin);

        engine.remove_role(&user_id, ADMIN_ROLE_ID).await.unwrap_err();
        // Removal of the last admin is rejected, so the role is still there;
        // grant a second admin and retry.
        let other = create_user(&directory, "other@example.com", "other").await;
        engine.assign_role(&other, ADMIN_ROLE_ID, None).await.unwrap();
        engine.remove_role(&user_id, ADMIN_ROLE_ID).await.unwrap();

        let mut refetched = principal_for(&user_id);
        engine.enrich(&mut refetched).await.unwrap();
        assert!(!refetched.has_role(ROLE_ADMIN));
    }

    #[tokio::test]
    async fn test_user_role_can_never_be_removed() {
        let Fixture { engine, directory } = fixture();
        let user_id = create_user(&directory, "reader@example.com", "reader").await;
        engine.assign_role(&user_id, ADMIN_ROLE_ID, None).await.unwrap();

        let err = engine.remove_role(&user_id, USER_ROLE_ID).await.unwrap_err();
        assert!(matches!(err, SecurityError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_last_admin_is_protected() {
        let Fixture { engine, directory } = fixture();
        let first = create_user(&directory, "a@example.com", "a").await;
        engine.assign_role(&first, ADMIN_ROLE_ID, None).await.unwrap();

        let err = engine.remove_role(&first, ADMIN_ROLE_ID).await.unwrap_err();
        assert!(matches!(err, SecurityError::Forbidden(_)));

        // With two admins, removal succeeds.
        let second = create_user(&directory, "b@example.com", "b").await;
        engine.assign_role(&second, ADMIN_ROLE_ID, None).await.unwrap();
        engine.remove_role(&first, ADMIN_ROLE_ID).await.unwrap();
    }

    #[tokio::test]
    async fn test_soft_deleted_admins_do_not_count() {
        let Fixture { engine, directory } = fixture();
        let first = create_user(&directory, "a@example.com", "a").await;
        let second = create_user(&directory, "b@example.com", "b").await;
        engine.assign_role(&first, ADMIN_ROLE_ID, None).await.unwrap();
        engine.assign_role(&second, ADMIN_ROLE_ID, None).await.unwrap();

        directory.soft_delete(&second);

        let err = engine.remove_role(&first, ADMIN_ROLE_ID).await.unwrap_err();
        assert!(matches!(err, SecurityError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_duplicate_assignment_conflicts() {
        let Fixture { engine, directory } = fixture();
        let user_id = create_user(&directory, "reader@example.com", "reader").await;

        let err = engine
            .assign_role(&user_id, USER_ROLE_ID, None)
            .await
            .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_make_admin_assigns_by_name() {
        let Fixture { engine, directory } = fixture();
        let user_id = create_user(&directory, "reader@example.com", "reader").await;

        let role = engine.make_admin(&user_id, None).await.unwrap();
        assert_eq!(role.name, ROLE_ADMIN);

        let mut principal = principal_for(&user_id);
        engine.enrich(&mut principal).await.unwrap();
        assert!(principal.is_admin);
    }

    #[tokio::test]
    async fn test_is_admin_does_not_bypass_checks() {
        let Fixture { engine, directory } = fixture();
        let user_id = create_user(&directory, "reader@example.com", "reader").await;

        let mut principal = principal_for(&user_id);
        engine.enrich(&mut principal).await.unwrap();
        // Forcing the informational flag changes nothing for the checks.
        principal.is_admin = true;
        let err = engine
            .require_role(&mut principal, ROLE_ADMIN, false)
            .await
            .unwrap_err();
        assert!(matches!(err, SecurityError::MissingRole(_)));
    }
}
