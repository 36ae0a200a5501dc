//! The operation table shared by both enforcement gateways.
//!
//! Each row names an operation once, with its RPC method, its HTTP route and
//! whether it may be called without a token. Both allow-lists are derived from
//! this table.

/// Fully-qualified RPC service prefix.
pub const RPC_SERVICE: &str = "rbac.RBACService";

/// Every operation exposed by the service.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    Login,
    Register,
    HealthCheck,
    WhoAmI,
    GetUserRoles,
    CheckPermission,
    ListUsers,
    CreateUser,
    GetUser,
    UpdateUser,
    DeleteUser,
    AssignRoles,
    CreatePermission,
    ListPermissions,
    DeletePermission,
    CreateRole,
    AssignPermissions,
    GetRolePermissions,
}

/// HTTP route of an operation (`{name}` marks a path parameter).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HttpRoute {
    pub method: &'static str,
    pub path: &'static str,
}

const fn route(method: &'static str, path: &'static str) -> HttpRoute {
    HttpRoute { method, path }
}

impl Operation {
    pub const ALL: [Operation; 18] = [
        Operation::Login,
        Operation::Register,
        Operation::HealthCheck,
        Operation::WhoAmI,
        Operation::GetUserRoles,
        Operation::CheckPermission,
        Operation::ListUsers,
        Operation::CreateUser,
        Operation::GetUser,
        Operation::UpdateUser,
        Operation::DeleteUser,
        Operation::AssignRoles,
        Operation::CreatePermission,
        Operation::ListPermissions,
        Operation::DeletePermission,
        Operation::CreateRole,
        Operation::AssignPermissions,
        Operation::GetRolePermissions,
    ];

    /// Short name, as used in logs and in the RPC method suffix.
    pub fn name(self) -> &'static str {
        match self {
            Operation::Login => "Login",
            Operation::Register => "Register",
            Operation::HealthCheck => "Check",
            Operation::WhoAmI => "WhoAmI",
            Operation::GetUserRoles => "GetUserRoles",
            Operation::CheckPermission => "CheckPermission",
            Operation::ListUsers => "ListUsers",
            Operation::CreateUser => "CreateUser",
            Operation::GetUser => "GetUser",
            Operation::UpdateUser => "UpdateUser",
            Operation::DeleteUser => "DeleteUser",
            Operation::AssignRoles => "AssignRoles",
            Operation::CreatePermission => "CreatePermission",
            Operation::ListPermissions => "ListPermissions",
            Operation::DeletePermission => "DeletePermission",
            Operation::CreateRole => "CreateRole",
            Operation::AssignPermissions => "AssignPermissions",
            Operation::GetRolePermissions => "GetRolePermissions",
        }
    }

    /// Fully-qualified RPC method name, e.g. `/rbac.RBACService/Login`.
    pub fn rpc_method(self) -> String {
        match self {
            Operation::HealthCheck => "/grpc.health.v1.Health/Check".to_string(),
            other => format!("/{RPC_SERVICE}/{}", other.name()),
        }
    }

    pub fn http_route(self) -> HttpRoute {
        match self {
            Operation::Login => route("POST", "/v1/login"),
            Operation::Register => route("POST", "/v1/register"),
            Operation::HealthCheck => route("GET", "/health"),
            Operation::WhoAmI => route("GET", "/v1/whoami"),
            Operation::GetUserRoles => route("GET", "/v1/user-roles/{username}"),
            Operation::CheckPermission => route("POST", "/v1/check-permission"),
            Operation::ListUsers => route("GET", "/v1/users"),
            Operation::CreateUser => route("POST", "/v1/users"),
            Operation::GetUser => route("GET", "/v1/users/{id}"),
            Operation::UpdateUser => route("PUT", "/v1/users/{id}"),
            Operation::DeleteUser => route("DELETE", "/v1/users/{id}"),
            Operation::AssignRoles => route("PUT", "/v1/users/{id}/roles"),
            Operation::CreatePermission => route("POST", "/v1/permissions"),
            Operation::ListPermissions => route("GET", "/v1/permissions"),
            Operation::DeletePermission => route("DELETE", "/v1/permissions/{id}"),
            Operation::CreateRole => route("POST", "/v1/roles"),
            Operation::AssignPermissions => route("PUT", "/v1/roles/{id}/permissions"),
            Operation::GetRolePermissions => route("GET", "/v1/roles/{id}/permissions"),
        }
    }

    /// Operations callable without a bearer token.
    pub fn is_public(self) -> bool {
        matches!(
            self,
            Operation::Login | Operation::Register | Operation::HealthCheck
        )
    }

    /// Operations that mutate the user/role/permission graph on behalf of an
    /// administrator.
    pub fn is_administrative(self) -> bool {
        matches!(
            self,
            Operation::CreateUser
                | Operation::UpdateUser
                | Operation::DeleteUser
                | Operation::AssignRoles
                | Operation::CreatePermission
                | Operation::DeletePermission
                | Operation::CreateRole
                | Operation::AssignPermissions
        )
    }

    pub fn from_rpc_method(method: &str) -> Option<Operation> {
        Operation::ALL.into_iter().find(|op| op.rpc_method() == method)
    }
}

impl core::fmt::Display for Operation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}
