//! Service wiring shared by both gateways.
//!
//! Every operation in the table has one typed method here. The HTTP handlers
//! and the RPC dispatcher both call these, so the two boundaries cannot differ
//! in what an operation does.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Duration as ChronoDuration;

use rbac_auth::{AccessPolicy, Operation, SigningSecret, TokenService};
use rbac_core::{RbacError, RbacResult};
use rbac_infra::{
    AccountService, EntityStore, InMemoryEntityStore, PostgresEntityStore, Settings,
};

use crate::app::dto::*;
use crate::authz;
use crate::context::RequestContext;

const STORE_MAX_CONNECTIONS: u32 = 10;

#[derive(Clone)]
pub struct AppServices {
    accounts: AccountService,
    policy: AccessPolicy,
    admin_permission: Option<String>,
    call_timeout: Duration,
}

/// Connect the configured store, bootstrap the admin account and assemble the
/// services. Store failures here are fatal for the process.
pub async fn build_services(settings: &Settings) -> anyhow::Result<AppServices> {
    let store: Arc<dyn EntityStore> = match &settings.database_url {
        Some(url) => {
            let store = PostgresEntityStore::connect(url, STORE_MAX_CONNECTIONS, settings.store_timeout)
                .await
                .context("failed to connect to the entity store")?;
            tracing::info!("using postgres entity store");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory entity store");
            Arc::new(InMemoryEntityStore::new())
        }
    };

    let secret = SigningSecret::new(&settings.jwt_secret).context("invalid JWT_SECRET")?;
    let ttl = ChronoDuration::from_std(settings.token_ttl).context("TOKEN_TTL_SECS out of range")?;
    let tokens = Arc::new(TokenService::new(&secret, ttl));

    let services = AppServices::new(
        store,
        tokens,
        settings.admin_permission.clone(),
        settings.store_timeout,
    );

    services
        .accounts()
        .bootstrap(&settings.admin_username, &settings.admin_password)
        .await
        .context("admin bootstrap failed")?;

    Ok(services)
}

impl AppServices {
    pub fn new(
        store: Arc<dyn EntityStore>,
        tokens: Arc<TokenService>,
        admin_permission: Option<String>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            accounts: AccountService::new(store, tokens.clone()),
            policy: AccessPolicy::new(tokens),
            admin_permission,
            call_timeout,
        }
    }

    pub fn accounts(&self) -> &AccountService {
        &self.accounts
    }

    /// The enforcement policy both gateways consult.
    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    /// Run one operation: administrative guard, then the body, both bounded by
    /// the call timeout. On expiry the future is dropped at its next await
    /// point: an open store transaction rolls back, but a statement already sent
    /// to the database may still run to completion there.
    async fn call<T>(
        &self,
        ctx: Option<&RequestContext>,
        operation: Operation,
        body: impl Future<Output = RbacResult<T>>,
    ) -> RbacResult<T> {
        let guarded = async {
            authz::authorize_operation(
                self.accounts.engine(),
                self.admin_permission.as_deref(),
                ctx,
                operation,
            )
            .await?;
            body.await
        };

        match tokio::time::timeout(self.call_timeout, guarded).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(%operation, timeout_ms = self.call_timeout.as_millis() as u64, "call timed out");
                Err(RbacError::DeadlineExceeded(format!(
                    "{operation} did not complete within {}ms",
                    self.call_timeout.as_millis()
                )))
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Public operations
    // ─────────────────────────────────────────────────────────────────────

    pub async fn login(&self, req: LoginRequest) -> RbacResult<LoginResponse> {
        self.call(None, Operation::Login, async {
            let issued = self.accounts.login(&req.username, &req.password).await?;
            let expires_at = issued
                .claims
                .expires_at()
                .ok_or_else(|| RbacError::store("issued token has no expiry"))?;
            Ok(LoginResponse {
                token: issued.token,
                expires_at,
            })
        })
        .await
    }

    pub async fn register(&self, req: RegisterRequest) -> RbacResult<MessageResponse> {
        self.call(None, Operation::Register, async {
            self.accounts.register(&req.username, &req.password).await?;
            Ok(MessageResponse::new("registration succeeded"))
        })
        .await
    }

    /// Never fails; an unreachable store reports `NOT_SERVING`.
    pub async fn health(&self) -> HealthResponse {
        let status = match self.call(None, Operation::HealthCheck, self.accounts.health()).await {
            Ok(()) => ServingStatus::Serving,
            Err(e) => {
                tracing::warn!(error = %e, "health check failed");
                ServingStatus::NotServing
            }
        };
        HealthResponse { status }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Authenticated operations
    // ─────────────────────────────────────────────────────────────────────

    pub async fn whoami(&self, ctx: &RequestContext) -> RbacResult<WhoAmIResponse> {
        let identity = ctx.identity();
        Ok(WhoAmIResponse {
            username: identity.username.clone(),
            roles: identity.roles.clone(),
            issued_at: identity.issued_at,
            expires_at: identity.expires_at,
        })
    }

    pub async fn get_user_roles(
        &self,
        ctx: &RequestContext,
        req: GetUserRolesRequest,
    ) -> RbacResult<RolesResponse> {
        self.call(Some(ctx), Operation::GetUserRoles, async {
            let roles = self.accounts.get_user_roles(&req.username).await?;
            Ok(RolesResponse { roles })
        })
        .await
    }

    pub async fn check_permission(
        &self,
        ctx: &RequestContext,
        req: CheckPermissionRequest,
    ) -> RbacResult<CheckPermissionResponse> {
        self.call(Some(ctx), Operation::CheckPermission, async {
            let allowed = self
                .accounts
                .check_permission(req.user_id, &req.permission)
                .await?;
            Ok(CheckPermissionResponse { allowed })
        })
        .await
    }

    pub async fn list_users(&self, ctx: &RequestContext) -> RbacResult<ListUsersResponse> {
        self.call(Some(ctx), Operation::ListUsers, async {
            let users = self.accounts.list_users().await?;
            Ok(ListUsersResponse {
                users: users.into_iter().map(UserInfo::from).collect(),
            })
        })
        .await
    }

    pub async fn create_user(
        &self,
        ctx: &RequestContext,
        req: CreateUserRequest,
    ) -> RbacResult<CreateUserResponse> {
        self.call(Some(ctx), Operation::CreateUser, async {
            let user = self.accounts.create_user(&req.username, &req.password).await?;
            Ok(CreateUserResponse {
                message: "user created".to_string(),
                user_id: user.id,
            })
        })
        .await
    }

    pub async fn get_user(&self, ctx: &RequestContext, req: GetUserRequest) -> RbacResult<UserInfo> {
        self.call(Some(ctx), Operation::GetUser, async {
            Ok(self.accounts.get_user(req.user_id).await?.into())
        })
        .await
    }

    pub async fn update_user(
        &self,
        ctx: &RequestContext,
        req: UpdateUserRequest,
    ) -> RbacResult<MessageResponse> {
        self.call(Some(ctx), Operation::UpdateUser, async {
            self.accounts
                .update_user(req.user_id, &req.username, &req.password)
                .await?;
            Ok(MessageResponse::new("user updated"))
        })
        .await
    }

    pub async fn delete_user(
        &self,
        ctx: &RequestContext,
        req: DeleteUserRequest,
    ) -> RbacResult<MessageResponse> {
        self.call(Some(ctx), Operation::DeleteUser, async {
            self.accounts.delete_user(req.user_id).await?;
            Ok(MessageResponse::new("user deleted"))
        })
        .await
    }

    pub async fn assign_roles(
        &self,
        ctx: &RequestContext,
        req: AssignRolesRequest,
    ) -> RbacResult<MessageResponse> {
        self.call(Some(ctx), Operation::AssignRoles, async {
            self.accounts.assign_roles(req.user_id, &req.role_ids).await?;
            Ok(MessageResponse::new("roles assigned"))
        })
        .await
    }

    pub async fn create_permission(
        &self,
        ctx: &RequestContext,
        req: CreatePermissionRequest,
    ) -> RbacResult<CreatePermissionResponse> {
        self.call(Some(ctx), Operation::CreatePermission, async {
            let permission = self
                .accounts
                .create_permission(&req.name, &req.description)
                .await?;
            Ok(CreatePermissionResponse { id: permission.id })
        })
        .await
    }

    pub async fn list_permissions(&self, ctx: &RequestContext) -> RbacResult<ListPermissionsResponse> {
        self.call(Some(ctx), Operation::ListPermissions, async {
            let permissions = self.accounts.list_permissions().await?;
            Ok(ListPermissionsResponse {
                permissions: permissions.into_iter().map(PermissionInfo::from).collect(),
            })
        })
        .await
    }

    pub async fn delete_permission(
        &self,
        ctx: &RequestContext,
        req: DeletePermissionRequest,
    ) -> RbacResult<MessageResponse> {
        self.call(Some(ctx), Operation::DeletePermission, async {
            self.accounts.delete_permission(req.permission_id).await?;
            Ok(MessageResponse::new("permission deleted"))
        })
        .await
    }

    pub async fn create_role(
        &self,
        ctx: &RequestContext,
        req: CreateRoleRequest,
    ) -> RbacResult<CreateRoleResponse> {
        self.call(Some(ctx), Operation::CreateRole, async {
            let role = self.accounts.create_role(&req.name, &req.description).await?;
            Ok(CreateRoleResponse {
                message: "role created".to_string(),
                role_id: role.id,
            })
        })
        .await
    }

    pub async fn assign_permissions(
        &self,
        ctx: &RequestContext,
        req: AssignPermissionsRequest,
    ) -> RbacResult<MessageResponse> {
        self.call(Some(ctx), Operation::AssignPermissions, async {
            self.accounts
                .assign_permissions(req.role_id, &req.permission_ids)
                .await?;
            Ok(MessageResponse::new("permissions assigned"))
        })
        .await
    }

    pub async fn get_role_permissions(
        &self,
        ctx: &RequestContext,
        req: GetRolePermissionsRequest,
    ) -> RbacResult<RolePermissionsResponse> {
        self.call(Some(ctx), Operation::GetRolePermissions, async {
            Ok(self.accounts.get_role_permissions(req.role_id).await?.into())
        })
        .await
    }
}

impl core::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AppServices")
            .field("admin_permission", &self.admin_permission)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use rbac_auth::Identity;

    use super::*;

    fn services(admin_permission: Option<&str>) -> AppServices {
        let tokens = Arc::new(TokenService::new(
            &SigningSecret::new("svc-secret").unwrap(),
            ChronoDuration::hours(2),
        ));
        AppServices::new(
            Arc::new(InMemoryEntityStore::new()),
            tokens,
            admin_permission.map(str::to_string),
            Duration::from_secs(5),
        )
    }

    fn ctx(username: &str) -> RequestContext {
        let now = Utc::now();
        RequestContext::new(Identity {
            username: username.to_string(),
            roles: vec![],
            issued_at: now,
            expires_at: now + ChronoDuration::hours(2),
        })
    }

    #[tokio::test]
    async fn admin_guard_denies_without_permission() {
        let svc = services(Some("write"));
        svc.accounts().bootstrap("admin", "123456").await.unwrap();
        svc.accounts().create_user("bob", "pw").await.unwrap();

        let denied = svc
            .create_role(
                &ctx("bob"),
                CreateRoleRequest {
                    name: "editor".into(),
                    description: String::new(),
                },
            )
            .await;
        assert!(matches!(denied, Err(RbacError::PermissionDenied(_))));

        let allowed = svc
            .create_role(
                &ctx("admin"),
                CreateRoleRequest {
                    name: "editor".into(),
                    description: String::new(),
                },
            )
            .await;
        assert!(allowed.is_ok());
    }

    #[tokio::test]
    async fn read_operations_skip_the_guard() {
        let svc = services(Some("write"));
        svc.accounts().create_user("bob", "pw").await.unwrap();
        assert!(svc.list_users(&ctx("bob")).await.is_ok());
    }

    #[tokio::test]
    async fn deleted_caller_is_denied_not_missing() {
        let svc = services(Some("write"));
        let err = svc
            .delete_user(&ctx("ghost"), DeleteUserRequest { user_id: rbac_core::UserId::new(1) })
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn stalled_call_surfaces_deadline_exceeded() {
        let tokens = Arc::new(TokenService::new(
            &SigningSecret::new("svc-secret").unwrap(),
            ChronoDuration::hours(2),
        ));
        let svc = AppServices::new(
            Arc::new(InMemoryEntityStore::new()),
            tokens,
            None,
            Duration::from_millis(10),
        );
        let err = svc
            .call(
                None,
                Operation::ListUsers,
                std::future::pending::<RbacResult<()>>(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::DeadlineExceeded(_)));
    }

    #[tokio::test]
    async fn timed_out_body_is_dropped() {
        use std::sync::atomic::{AtomicBool, Ordering};

        struct SetOnDrop(Arc<AtomicBool>);
        impl Drop for SetOnDrop {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let tokens = Arc::new(TokenService::new(
            &SigningSecret::new("svc-secret").unwrap(),
            ChronoDuration::hours(2),
        ));
        let svc = AppServices::new(
            Arc::new(InMemoryEntityStore::new()),
            tokens,
            None,
            Duration::from_millis(10),
        );

        let dropped = Arc::new(AtomicBool::new(false));
        let guard = SetOnDrop(dropped.clone());
        let body = async move {
            let _guard = guard;
            std::future::pending::<RbacResult<()>>().await
        };

        let err = svc.call(None, Operation::ListUsers, body).await.unwrap_err();
        assert!(matches!(err, RbacError::DeadlineExceeded(_)));
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn health_reports_serving() {
        assert_eq!(services(None).health().await.status, ServingStatus::Serving);
    }
}
