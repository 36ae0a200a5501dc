//! Entity Store: the persisted user/role/permission graph.
//!
//! Every operation that touches more than one table runs inside a single
//! transaction. No authentication or authorization logic lives here.

use std::collections::BTreeSet;

use async_trait::async_trait;
use thiserror::Error;

use rbac_core::{
    Permission, PermissionId, RbacError, Role, RoleId, RoleWithPermissions, User, UserAccess,
    UserId, UserWithRoles,
};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryEntityStore;
pub use postgres::PostgresEntityStore;

/// Store operation error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    Conflict(String),

    #[error("backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(what: impl Into<String>) -> Self {
        Self::Conflict(what.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

impl From<StoreError> for RbacError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(what) => RbacError::NotFound(what),
            StoreError::Conflict(what) => RbacError::Conflict(what),
            StoreError::Backend(msg) => RbacError::Store(msg),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Seed data for the bootstrap administrator.
#[derive(Clone)]
pub struct AdminSeed {
    pub username: String,
    /// Already-hashed credential.
    pub credential: String,
    pub role: String,
    pub role_description: String,
    pub permission: String,
    pub permission_description: String,
}

impl core::fmt::Debug for AdminSeed {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AdminSeed")
            .field("username", &self.username)
            .field("role", &self.role)
            .field("permission", &self.permission)
            .finish_non_exhaustive()
    }
}

/// What a bootstrap run had to create (all false on a re-run).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub created_role: bool,
    pub created_permission: bool,
    pub linked_role_permission: bool,
    pub created_user: bool,
    pub linked_user_role: bool,
}

impl BootstrapReport {
    pub fn changed_anything(&self) -> bool {
        self.created_role
            || self.created_permission
            || self.linked_role_permission
            || self.created_user
            || self.linked_user_role
    }
}

/// Repository over users, roles, permissions and their junction tables.
///
/// Listings are returned in insertion (id) order. Soft-deleted permissions are
/// hidden from every read and cannot be assigned.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Cheap connectivity check used by health checks.
    async fn ping(&self) -> StoreResult<()>;

    async fn find_user_by_name(&self, username: &str) -> StoreResult<User>;

    async fn find_user_by_id(&self, id: UserId) -> StoreResult<User>;

    async fn find_user_with_roles(&self, id: UserId) -> StoreResult<UserWithRoles>;

    /// User, its roles, and each role's live permissions.
    async fn load_user_access(&self, id: UserId) -> StoreResult<UserAccess>;

    async fn find_role_by_id(&self, id: RoleId) -> StoreResult<Role>;

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Role>;

    async fn find_role_with_permissions(&self, id: RoleId) -> StoreResult<RoleWithPermissions>;

    async fn find_permission_by_name(&self, name: &str) -> StoreResult<Permission>;

    async fn create_user(&self, username: &str, credential: &str) -> StoreResult<User>;

    /// Create a user already bound to `roles`, atomically.
    async fn create_user_with_roles(
        &self,
        username: &str,
        credential: &str,
        roles: &[RoleId],
    ) -> StoreResult<User>;

    /// Rename a user and optionally replace its credential.
    async fn update_user(
        &self,
        id: UserId,
        username: &str,
        credential: Option<&str>,
    ) -> StoreResult<User>;

    async fn create_role(&self, name: &str, description: &str) -> StoreResult<Role>;

    async fn create_permission(&self, name: &str, description: &str) -> StoreResult<Permission>;

    async fn soft_delete_permission(&self, id: PermissionId) -> StoreResult<()>;

    /// Replace the user's role set.
    async fn assign_roles_to_user(&self, user: UserId, roles: &[RoleId]) -> StoreResult<()>;

    /// Replace the role's permission set.
    async fn assign_permissions_to_role(
        &self,
        role: RoleId,
        permissions: &[PermissionId],
    ) -> StoreResult<()>;

    /// Clear the user's role associations, then delete the row; all-or-nothing.
    async fn delete_user(&self, id: UserId) -> StoreResult<()>;

    async fn list_users(&self) -> StoreResult<Vec<UserWithRoles>>;

    async fn list_permissions(&self) -> StoreResult<Vec<Permission>>;

    /// Idempotently provision the admin role, permission, user and both links.
    async fn bootstrap_admin(&self, seed: &AdminSeed) -> StoreResult<BootstrapReport>;
}

/// Rows to add and remove to turn a junction set `current` into `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement<T> {
    pub insert: Vec<T>,
    pub remove: Vec<T>,
}

impl<T> Replacement<T> {
    pub fn is_noop(&self) -> bool {
        self.insert.is_empty() && self.remove.is_empty()
    }
}

/// Compute the set difference for a replace-semantics assignment.
pub fn plan_replacement<T: Ord + Copy>(
    current: &BTreeSet<T>,
    target: &BTreeSet<T>,
) -> Replacement<T> {
    Replacement {
        insert: target.difference(current).copied().collect(),
        remove: current.difference(target).copied().collect(),
    }
}
