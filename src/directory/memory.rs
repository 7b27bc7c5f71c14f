//! In-memory directory backend.
//!
//! Backs the demo binary and the tests; production deployments implement
//! [`UserStore`]/[`RoleStore`] over the relational schema instead.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::principal::{Permission, Role, ROLE_ADMIN, ROLE_USER};

use super::{DirectoryError, NewUser, RoleAssignment, RoleStore, User, UserStore};

/// DashMap-backed [`UserStore`] + [`RoleStore`].
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    users: DashMap<String, User>,
    roles: DashMap<i64, Role>,
    role_permissions: DashMap<i64, Vec<Permission>>,
    user_roles: DashMap<String, Vec<RoleAssignment>>,
}

impl MemoryDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a directory seeded with the `USER` and `ADMIN` system roles
    /// and their permissions.
    #[must_use]
    pub fn seeded() -> Self {
        let directory = Self::new();
        directory.insert_role(
            Role {
                id: 1,
                name: ROLE_USER.to_string(),
                description: Some("Registered reader".to_string()),
            },
            vec![
                Permission {
                    id: 1,
                    label: "book:read".to_string(),
                    action: Some("read".to_string()),
                    resource: Some("book".to_string()),
                },
                Permission {
                    id: 2,
                    label: "review:write".to_string(),
                    action: Some("write".to_string()),
                    resource: Some("review".to_string()),
                },
            ],
        );
        directory.insert_role(
            Role {
                id: 2,
                name: ROLE_ADMIN.to_string(),
                description: Some("Catalogue administrator".to_string()),
            },
            vec![
                Permission {
                    id: 10,
                    label: "user:manage".to_string(),
                    action: Some("manage".to_string()),
                    resource: Some("user".to_string()),
                },
                Permission {
                    id: 11,
                    label: "role:manage".to_string(),
                    action: Some("manage".to_string()),
                    resource: Some("role".to_string()),
                },
            ],
        );
        directory
    }

    /// Register a role and its permissions.
    pub fn insert_role(&self, role: Role, permissions: Vec<Permission>) {
        self.role_permissions.insert(role.id, permissions);
        self.roles.insert(role.id, role);
    }

    /// Soft-delete a user; they disappear from lookups and active-holder
    /// counts, and assignments they made lose their back-reference.
    pub fn soft_delete(&self, user_id: &str) {
        if let Some(mut user) = self.users.get_mut(user_id) {
            user.deleted_at = Some(Utc::now());
        }
        for mut assignments in self.user_roles.iter_mut() {
            for assignment in assignments.iter_mut() {
                if assignment.assigned_by.as_deref() == Some(user_id) {
                    assignment.assigned_by = None;
                }
            }
        }
    }

    fn is_active(&self, user_id: &str) -> bool {
        self.users
            .get(user_id)
            .is_some_and(|user| user.deleted_at.is_none())
    }
}

#[async_trait]
impl UserStore for MemoryDirectory {
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, DirectoryError> {
        Ok(self
            .users
            .get(id)
            .filter(|user| user.deleted_at.is_none())
            .map(|user| user.value().clone()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, DirectoryError> {
        let needle = email.trim().to_lowercase();
        Ok(self
            .users
            .iter()
            .find(|user| user.deleted_at.is_none() && user.email == needle)
            .map(|user| user.value().clone()))
    }

    async fn create(&self, new_user: NewUser) -> Result<User, DirectoryError> {
        let email = new_user.email.trim().to_lowercase();
        for user in &self.users {
            if user.email == email {
                return Err(DirectoryError::Conflict(
                    "email already registered".to_string(),
                ));
            }
            if user.username == new_user.username {
                return Err(DirectoryError::Conflict(
                    "username already taken".to_string(),
                ));
            }
        }
        let user = User {
            id: Uuid::new_v4().to_string(),
            email,
            username: new_user.username,
            password_hash: new_user.password_hash,
            last_login_at: None,
            deleted_at: None,
        };
        self.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn update_last_login(&self, id: &str) -> Result<(), DirectoryError> {
        let mut user = self
            .users
            .get_mut(id)
            .ok_or_else(|| DirectoryError::NotFound("user".to_string()))?;
        user.last_login_at = Some(Utc::now());
        Ok(())
    }
}

#[async_trait]
impl RoleStore for MemoryDirectory {
    async fn roles_for_user(&self, user_id: &str) -> Result<Vec<Role>, DirectoryError> {
        let assignments = self
            .user_roles
            .get(user_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        Ok(assignments
            .iter()
            .filter_map(|assignment| {
                self.roles
                    .get(&assignment.role_id)
                    .map(|role| role.value().clone())
            })
            .collect())
    }

    async fn permissions_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<Permission>, DirectoryError> {
        let roles = self.roles_for_user(user_id).await?;
        let mut seen = Vec::new();
        let mut permissions = Vec::new();
        for role in roles {
            if let Some(role_permissions) = self.role_permissions.get(&role.id) {
                for permission in role_permissions.iter() {
                    if !seen.contains(&permission.id) {
                        seen.push(permission.id);
                        permissions.push(permission.clone());
                    }
                }
            }
        }
        Ok(permissions)
    }

    async fn find_role(&self, role_id: i64) -> Result<Option<Role>, DirectoryError> {
        Ok(self.roles.get(&role_id).map(|role| role.value().clone()))
    }

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, DirectoryError> {
        Ok(self
            .roles
            .iter()
            .find(|role| role.name == name)
            .map(|role| role.value().clone()))
    }

    async fn assign_role(
        &self,
        user_id: &str,
        role_id: i64,
        assigned_by: Option<&str>,
    ) -> Result<(), DirectoryError> {
        if !self.roles.contains_key(&role_id) {
            return Err(DirectoryError::NotFound("role".to_string()));
        }
        let mut assignments = self.user_roles.entry(user_id.to_string()).or_default();
        if assignments
            .iter()
            .any(|assignment| assignment.role_id == role_id)
        {
            return Err(DirectoryError::Conflict("role already assigned".to_string()));
        }
        assignments.push(RoleAssignment {
            role_id,
            assigned_at: Utc::now(),
            assigned_by: assigned_by.map(ToString::to_string),
        });
        Ok(())
    }

    async fn remove_role(&self, user_id: &str, role_id: i64) -> Result<(), DirectoryError> {
        let mut assignments = self
            .user_roles
            .get_mut(user_id)
            .ok_or_else(|| DirectoryError::NotFound("role assignment".to_string()))?;
        let before = assignments.len();
        assignments.retain(|assignment| assignment.role_id != role_id);
        if assignments.len() == before {
            return Err(DirectoryError::NotFound("role assignment".to_string()));
        }
        Ok(())
    }

    async fn count_active_holders(&self, role_id: i64) -> Result<u64, DirectoryError> {
        let mut count = 0;
        for entry in &self.user_roles {
            if entry
                .value()
                .iter()
                .any(|assignment| assignment.role_id == role_id)
                && self.is_active(entry.key())
            {
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str, username: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            username: username.to_string(),
            password_hash: "$argon2id$test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let directory = MemoryDirectory::seeded();
        let user = directory
            .create(new_user("Reader@Example.com", "reader"))
            .await
            .unwrap();
        // Email is normalized on the way in.
        assert_eq!(user.email, "reader@example.com");

        let by_email = directory
            .find_by_email("reader@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_email.id, user.id);
        let by_id = directory.find_by_id(&user.id).await.unwrap().unwrap();
        assert_eq!(by_id.username, "reader");
    }

    #[tokio::test]
    async fn test_duplicate_email_and_username_conflict() {
        let directory = MemoryDirectory::seeded();
        directory
            .create(new_user("reader@example.com", "reader"))
            .await
            .unwrap();

        let duplicate_email = directory
            .create(new_user("reader@example.com", "other"))
            .await;
        assert!(matches!(duplicate_email, Err(DirectoryError::Conflict(_))));

        let duplicate_username = directory
            .create(new_user("other@example.com", "reader"))
            .await;
        assert!(matches!(
            duplicate_username,
            Err(DirectoryError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_soft_deleted_users_are_invisible() {
        let directory = MemoryDirectory::seeded();
        let user = directory
            .create(new_user("reader@example.com", "reader"))
            .await
            .unwrap();
        directory.assign_role(&user.id, 2, None).await.unwrap();
        assert_eq!(directory.count_active_holders(2).await.unwrap(), 1);

        directory.soft_delete(&user.id);
        assert!(directory.find_by_id(&user.id).await.unwrap().is_none());
        assert!(directory
            .find_by_email("reader@example.com")
            .await
            .unwrap()
            .is_none());
        assert_eq!(directory.count_active_holders(2).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_permissions_flatten_and_dedupe() {
        let directory = MemoryDirectory::seeded();
        // A third role sharing a permission id with USER.
        directory.insert_role(
            Role {
                id: 3,
                name: "LIBRARIAN".to_string(),
                description: None,
            },
            vec![
                Permission {
                    id: 1,
                    label: "book:read".to_string(),
                    action: Some("read".to_string()),
                    resource: Some("book".to_string()),
                },
                Permission {
                    id: 20,
                    label: "library:manage".to_string(),
                    action: Some("manage".to_string()),
                    resource: Some("library".to_string()),
                },
            ],
        );
        let user = directory
            .create(new_user("reader@example.com", "reader"))
            .await
            .unwrap();
        directory.assign_role(&user.id, 1, None).await.unwrap();
        directory.assign_role(&user.id, 3, None).await.unwrap();

        let permissions = directory.permissions_for_user(&user.id).await.unwrap();
        let labels: Vec<&str> = permissions
            .iter()
            .map(|permission| permission.label.as_str())
            .collect();
        assert_eq!(labels, vec!["book:read", "review:write", "library:manage"]);
    }

    #[tokio::test]
    async fn test_assign_and_remove_role() {
        let directory = MemoryDirectory::seeded();
        let admin = directory
            .create(new_user("admin@example.com", "admin"))
            .await
            .unwrap();
        let user = directory
            .create(new_user("reader@example.com", "reader"))
            .await
            .unwrap();

        directory
            .assign_role(&user.id, 1, Some(&admin.id))
            .await
            .unwrap();
        let duplicate = directory.assign_role(&user.id, 1, None).await;
        assert!(matches!(duplicate, Err(DirectoryError::Conflict(_))));

        directory.remove_role(&user.id, 1).await.unwrap();
        let missing = directory.remove_role(&user.id, 1).await;
        assert!(matches!(missing, Err(DirectoryError::NotFound(_))));
    }
}
