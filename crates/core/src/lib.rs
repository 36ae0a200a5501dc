//! `rbac-core` — shared domain model for the RBAC service.
//!
//! This crate contains **pure** types only: identifiers, the user/role/permission
//! graph and the error taxonomy used across every layer.

pub mod error;
pub mod id;
pub mod model;

pub use error::{RbacError, RbacResult};
pub use id::{PermissionId, RoleId, UserId};
pub use model::{Permission, Role, RoleWithPermissions, User, UserAccess, UserWithRoles};
