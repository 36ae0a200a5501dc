//! Demo client: log in as the bootstrap admin, then query roles and a
//! permission over the RPC gateway.

use anyhow::Context;

use rbac_api::app::dto::{
    CheckPermissionRequest, CheckPermissionResponse, GetUserRequest, GetUserRolesRequest,
    ListUsersResponse, RolesResponse, UserInfo,
};
use rbac_api::rpc::RpcClient;
use rbac_auth::Operation;
use rbac_infra::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env()?;
    rbac_observability::init(settings.log_format);

    let mut client = RpcClient::connect(settings.rpc_addr)
        .await
        .with_context(|| format!("failed to connect to {}", settings.rpc_addr))?;

    let login = client
        .login(&settings.admin_username, &settings.admin_password)
        .await
        .context("login failed")?;
    println!("logged in; token expires at {}", login.expires_at);

    let roles: RolesResponse = client
        .call(
            Operation::GetUserRoles,
            &GetUserRolesRequest {
                username: settings.admin_username.clone(),
            },
        )
        .await
        .context("GetUserRoles failed")?;
    println!("roles of {}: {:?}", settings.admin_username, roles.roles);

    let users: ListUsersResponse = client
        .call(Operation::ListUsers, &serde_json::Value::Null)
        .await
        .context("ListUsers failed")?;
    let admin = users
        .users
        .iter()
        .find(|u| u.username == settings.admin_username)
        .context("admin user not listed")?;

    let user: UserInfo = client
        .call(Operation::GetUser, &GetUserRequest { user_id: admin.id })
        .await
        .context("GetUser failed")?;

    let check: CheckPermissionResponse = client
        .call(
            Operation::CheckPermission,
            &CheckPermissionRequest {
                user_id: user.id,
                permission: "write".to_string(),
            },
        )
        .await
        .context("CheckPermission failed")?;
    println!("{} has 'write': {}", user.username, check.allowed);

    Ok(())
}
