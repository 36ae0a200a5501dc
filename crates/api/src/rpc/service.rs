//! Method dispatch onto the shared service layer.

use chrono::Utc;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use rbac_auth::Operation;
use rbac_core::{RbacError, RbacResult};

use super::frame::{Code, RpcRequest, RpcResponse};
use super::interceptor;
use crate::app::services::AppServices;
use crate::context::RequestContext;

/// Authenticate, dispatch and answer one call. Never fails: every error
/// becomes a status-bearing response.
pub async fn handle(services: &AppServices, req: RpcRequest) -> RpcResponse {
    let id = req.id;

    let ctx = match interceptor::intercept(services.policy(), &req, Utc::now()) {
        Ok(ctx) => ctx,
        Err(err) => {
            tracing::info!(method = %req.method, reason = %err, "rpc call rejected");
            return RpcResponse::error(id, Code::Unauthenticated, err.to_string());
        }
    };

    let Some(operation) = Operation::from_rpc_method(&req.method) else {
        return RpcResponse::error(id, Code::Unimplemented, format!("unknown method {}", req.method));
    };

    match dispatch(services, operation, ctx.as_ref(), req.body).await {
        Ok(body) => RpcResponse::ok(id, body),
        Err(err) => {
            tracing::debug!(%operation, error = %err, "rpc call failed");
            RpcResponse::from_error(id, &err)
        }
    }
}

async fn dispatch(
    services: &AppServices,
    operation: Operation,
    ctx: Option<&RequestContext>,
    body: Value,
) -> RbacResult<Value> {
    match operation {
        Operation::Login => reply(services.login(decode(body)?).await),
        Operation::Register => reply(services.register(decode(body)?).await),
        Operation::HealthCheck => encode(services.health().await),
        Operation::WhoAmI => reply(services.whoami(caller(ctx)?).await),
        Operation::GetUserRoles => reply(services.get_user_roles(caller(ctx)?, decode(body)?).await),
        Operation::CheckPermission => {
            reply(services.check_permission(caller(ctx)?, decode(body)?).await)
        }
        Operation::ListUsers => reply(services.list_users(caller(ctx)?).await),
        Operation::CreateUser => reply(services.create_user(caller(ctx)?, decode(body)?).await),
        Operation::GetUser => reply(services.get_user(caller(ctx)?, decode(body)?).await),
        Operation::UpdateUser => reply(services.update_user(caller(ctx)?, decode(body)?).await),
        Operation::DeleteUser => reply(services.delete_user(caller(ctx)?, decode(body)?).await),
        Operation::AssignRoles => reply(services.assign_roles(caller(ctx)?, decode(body)?).await),
        Operation::CreatePermission => {
            reply(services.create_permission(caller(ctx)?, decode(body)?).await)
        }
        Operation::ListPermissions => reply(services.list_permissions(caller(ctx)?).await),
        Operation::DeletePermission => {
            reply(services.delete_permission(caller(ctx)?, decode(body)?).await)
        }
        Operation::CreateRole => reply(services.create_role(caller(ctx)?, decode(body)?).await),
        Operation::AssignPermissions => {
            reply(services.assign_permissions(caller(ctx)?, decode(body)?).await)
        }
        Operation::GetRolePermissions => {
            reply(services.get_role_permissions(caller(ctx)?, decode(body)?).await)
        }
    }
}

fn caller(ctx: Option<&RequestContext>) -> RbacResult<&RequestContext> {
    ctx.ok_or_else(|| RbacError::unauthenticated("identity required"))
}

fn decode<T: DeserializeOwned>(body: Value) -> RbacResult<T> {
    serde_json::from_value(body).map_err(|e| RbacError::invalid(format!("malformed request body: {e}")))
}

fn encode<T: Serialize>(value: T) -> RbacResult<Value> {
    serde_json::to_value(value).map_err(|e| RbacError::store(format!("response encoding failed: {e}")))
}

fn reply<T: Serialize>(result: RbacResult<T>) -> RbacResult<Value> {
    result.and_then(encode)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    use rbac_auth::{SigningSecret, TokenService};
    use rbac_infra::InMemoryEntityStore;

    use super::*;
    use crate::rpc::frame::Metadata;

    async fn services() -> AppServices {
        let tokens = Arc::new(TokenService::new(
            &SigningSecret::new("dispatch-secret").unwrap(),
            ChronoDuration::hours(2),
        ));
        let services = AppServices::new(
            Arc::new(InMemoryEntityStore::new()),
            tokens,
            None,
            Duration::from_secs(5),
        );
        services.accounts().bootstrap("admin", "123456").await.unwrap();
        services
    }

    fn call(method: &str, metadata: Metadata, body: Value) -> RpcRequest {
        RpcRequest {
            id: 9,
            method: method.to_string(),
            metadata,
            body,
        }
    }

    #[tokio::test]
    async fn protected_call_without_metadata_is_unauthenticated() {
        let svc = services().await;
        let resp = handle(&svc, call("/rbac.RBACService/ListUsers", Metadata::new(), Value::Null)).await;
        assert_eq!(resp.id, 9);
        assert_eq!(resp.code, Code::Unauthenticated);
    }

    #[tokio::test]
    async fn login_without_metadata_succeeds_and_token_opens_protected_calls() {
        let svc = services().await;
        let resp = handle(
            &svc,
            call(
                "/rbac.RBACService/Login",
                Metadata::new(),
                json!({ "username": "admin", "password": "123456" }),
            ),
        )
        .await;
        assert_eq!(resp.code, Code::Ok);
        let token = resp.body.unwrap()["token"].as_str().unwrap().to_string();

        let resp = handle(
            &svc,
            call(
                "/rbac.RBACService/GetUserRoles",
                Metadata::with_bearer(&token),
                json!({ "username": "admin" }),
            ),
        )
        .await;
        assert_eq!(resp.code, Code::Ok);
        assert_eq!(resp.body.unwrap(), json!({ "roles": ["admin"] }));
    }

    #[tokio::test]
    async fn unknown_method_needs_a_token_first() {
        let svc = services().await;
        let resp = handle(&svc, call("/rbac.RBACService/Nope", Metadata::new(), Value::Null)).await;
        assert_eq!(resp.code, Code::Unauthenticated);

        let issued = svc.policy().tokens().issue("admin", vec![], Utc::now()).unwrap();
        let resp = handle(
            &svc,
            call("/rbac.RBACService/Nope", Metadata::with_bearer(&issued.token), Value::Null),
        )
        .await;
        assert_eq!(resp.code, Code::Unimplemented);
    }

    #[tokio::test]
    async fn malformed_body_is_invalid_argument() {
        let svc = services().await;
        let resp = handle(
            &svc,
            call("/rbac.RBACService/Login", Metadata::new(), json!({ "user": 1 })),
        )
        .await;
        assert_eq!(resp.code, Code::InvalidArgument);
    }

    #[tokio::test]
    async fn health_check_is_public() {
        let svc = services().await;
        let resp = handle(&svc, call("/grpc.health.v1.Health/Check", Metadata::new(), Value::Null)).await;
        assert_eq!(resp.code, Code::Ok);
        assert_eq!(resp.body.unwrap(), json!({ "status": "SERVING" }));
    }
}
