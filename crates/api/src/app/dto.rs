//! Request/response shapes shared by the HTTP routes and the RPC service.
//!
//! RPC bodies carry identifiers inline; the HTTP routes take them from the
//! path and use the `*Body` variants for the rest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rbac_core::{Permission, PermissionId, RoleId, RoleWithPermissions, UserId, UserWithRoles};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetUserRolesRequest {
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckPermissionRequest {
    pub user_id: UserId,
    pub permission: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetUserRequest {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateUserRequest {
    pub user_id: UserId,
    pub username: String,
    /// Empty keeps the current credential.
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateUserBody {
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteUserRequest {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignRolesRequest {
    pub user_id: UserId,
    #[serde(default)]
    pub role_ids: Vec<RoleId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignRolesBody {
    #[serde(default)]
    pub role_ids: Vec<RoleId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePermissionRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletePermissionRequest {
    pub permission_id: PermissionId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignPermissionsRequest {
    pub role_id: RoleId,
    #[serde(default)]
    pub permission_ids: Vec<PermissionId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignPermissionsBody {
    #[serde(default)]
    pub permission_ids: Vec<PermissionId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRolePermissionsRequest {
    pub role_id: RoleId,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ServingStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServingStatus {
    Serving,
    NotServing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhoAmIResponse {
    pub username: String,
    pub roles: Vec<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolesResponse {
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckPermissionResponse {
    pub allowed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: UserId,
    pub username: String,
    pub roles: Vec<String>,
}

impl From<UserWithRoles> for UserInfo {
    fn from(value: UserWithRoles) -> Self {
        Self {
            roles: value.role_names(),
            id: value.user.id,
            username: value.user.username,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListUsersResponse {
    pub users: Vec<UserInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateUserResponse {
    pub message: String,
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionInfo {
    pub id: PermissionId,
    pub name: String,
    pub description: String,
}

impl From<Permission> for PermissionInfo {
    fn from(value: Permission) -> Self {
        Self {
            id: value.id,
            name: value.name,
            description: value.description,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePermissionResponse {
    pub id: PermissionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListPermissionsResponse {
    pub permissions: Vec<PermissionInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRoleResponse {
    pub message: String,
    pub role_id: RoleId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePermissionsResponse {
    pub role_id: RoleId,
    pub role: String,
    pub permissions: Vec<PermissionInfo>,
}

impl From<RoleWithPermissions> for RolePermissionsResponse {
    fn from(value: RoleWithPermissions) -> Self {
        Self {
            role_id: value.role.id,
            role: value.role.name,
            permissions: value.permissions.into_iter().map(Into::into).collect(),
        }
    }
}
