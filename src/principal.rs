//! The resolved request identity and the role/permission model it carries.

use serde::{Deserialize, Serialize};

use crate::services::token::AccessClaims;

/// Name of the system role every registered user holds.
pub const ROLE_USER: &str = "USER";

/// Name of the administrative system role.
pub const ROLE_ADMIN: &str = "ADMIN";

/// A named role, e.g. `USER` or `ADMIN`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Role identifier.
    pub id: i64,
    /// Unique role name; matching is exact and case-sensitive.
    pub name: String,
    /// Human-readable description.
    pub description: Option<String>,
}

/// A permission owned by a role.
///
/// `action` and `resource` are both optional; a check matches only on exact
/// equality of both fields, so a `None` action matches only a check that
/// also passes `None` — there are no wildcard semantics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// Permission identifier.
    pub id: i64,
    /// Unique display label, e.g. `book:read`.
    pub label: String,
    /// Action component, e.g. `read`.
    pub action: Option<String>,
    /// Resource component, e.g. `book`.
    pub resource: Option<String>,
}

/// The authenticated identity attached to a request after token
/// verification.
///
/// Reconstructed per request from verified claims; `roles`, `permissions`,
/// and `is_admin` stay empty until the enrichment step populates them.
#[derive(Debug, Clone, Serialize)]
pub struct Principal {
    /// Opaque user identifier.
    pub id: String,
    /// Account email.
    pub email: String,
    /// Display name.
    pub username: String,
    /// Roles at last enrichment; `None` before enrichment.
    pub roles: Option<Vec<Role>>,
    /// Flattened permissions at last enrichment; `None` before enrichment.
    pub permissions: Option<Vec<Permission>>,
    /// Whether any enriched role is named `ADMIN`. Informational only; the
    /// role and permission checks always re-evaluate explicitly.
    pub is_admin: bool,
}

impl Principal {
    /// Build an unenriched principal from verified token claims.
    #[must_use]
    pub fn from_claims(claims: AccessClaims) -> Self {
        Self {
            id: claims.sub,
            email: claims.email,
            username: claims.username,
            roles: None,
            permissions: None,
            is_admin: false,
        }
    }

    /// Replace the enrichment fields and re-derive `is_admin`.
    pub fn set_roles(&mut self, roles: Vec<Role>) {
        self.is_admin = roles.iter().any(|role| role.name == ROLE_ADMIN);
        self.roles = Some(roles);
    }

    /// Exact, case-sensitive role membership test over the enriched roles.
    #[must_use]
    pub fn has_role(&self, name: &str) -> bool {
        self.roles
            .as_ref()
            .is_some_and(|roles| roles.iter().any(|role| role.name == name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(id: i64, name: &str) -> Role {
        Role {
            id,
            name: name.to_string(),
            description: None,
        }
    }

    #[test]
    fn test_principal_starts_unenriched() {
        let principal = Principal::from_claims(AccessClaims {
            sub: "u1".to_string(),
            email: "reader@example.com".to_string(),
            username: "reader".to_string(),
            iat: 0,
            exp: 0,
        });
        assert!(principal.roles.is_none());
        assert!(principal.permissions.is_none());
        assert!(!principal.is_admin);
        assert!(!principal.has_role(ROLE_USER));
    }

    #[test]
    fn test_is_admin_derived_from_roles() {
        let mut principal = Principal::from_claims(AccessClaims {
            sub: "u1".to_string(),
            email: "reader@example.com".to_string(),
            username: "reader".to_string(),
            iat: 0,
            exp: 0,
        });
        principal.set_roles(vec![role(1, ROLE_USER)]);
        assert!(!principal.is_admin);

        principal.set_roles(vec![role(1, ROLE_USER), role(2, ROLE_ADMIN)]);
        assert!(principal.is_admin);
        assert!(principal.has_role(ROLE_ADMIN));
        // Matching is case-sensitive.
        assert!(!principal.has_role("admin"));
    }
}
