//! User / role / permission graph.
//!
//! Users reach permissions only through roles. Both associations are pure
//! junction relations owned by the store; the types here are snapshots loaded
//! from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{PermissionId, RoleId, UserId};

/// A user account.
///
/// `credential` holds an opaque, verifiable credential (a PHC hash string in
/// practice). It is never serialized and redacted from `Debug` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(skip)]
    pub credential: String,
}

impl core::fmt::Debug for User {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("credential", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub description: String,
}

/// A named capability.
///
/// Permissions are soft-deleted: a row with `deleted_at` set stays in the store
/// but must never satisfy a permission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Permission {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A user with its roles eager-loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserWithRoles {
    pub user: User,
    pub roles: Vec<Role>,
}

impl UserWithRoles {
    pub fn role_names(&self) -> Vec<String> {
        self.roles.iter().map(|r| r.name.clone()).collect()
    }
}

/// A role with its live (non-deleted) permissions eager-loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleWithPermissions {
    pub role: Role,
    pub permissions: Vec<Permission>,
}

/// Everything needed to decide a permission check for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAccess {
    pub user: User,
    pub roles: Vec<RoleWithPermissions>,
}

impl UserAccess {
    pub fn role_names(&self) -> Vec<String> {
        self.roles.iter().map(|r| r.role.name.clone()).collect()
    }
}
