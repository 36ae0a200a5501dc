use std::sync::Arc;

use axum::{
    Json,
    extract::{
        Extension, Path,
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
    response::IntoResponse,
};

use rbac_core::UserId;

use crate::app::dto::{
    AssignRolesBody, AssignRolesRequest, CheckPermissionRequest, CreateUserRequest,
    DeleteUserRequest, GetUserRequest, GetUserRolesRequest, UpdateUserBody, UpdateUserRequest,
};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::context::RequestContext;

/// GET /v1/user-roles/:username
pub async fn get_user_roles(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    path: Result<Path<String>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(username) = path?;
    let resp = services
        .get_user_roles(&ctx, GetUserRolesRequest { username })
        .await?;
    Ok(Json(resp))
}

/// POST /v1/check-permission
pub async fn check_permission(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    payload: Result<Json<CheckPermissionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    Ok(Json(services.check_permission(&ctx, req).await?))
}

/// GET /v1/users
pub async fn list_users(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(services.list_users(&ctx).await?))
}

/// POST /v1/users
pub async fn create_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    Ok((StatusCode::CREATED, Json(services.create_user(&ctx, req).await?)))
}

/// GET /v1/users/:id
pub async fn get_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    path: Result<Path<UserId>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(user_id) = path?;
    Ok(Json(services.get_user(&ctx, GetUserRequest { user_id }).await?))
}

/// PUT /v1/users/:id
pub async fn update_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    path: Result<Path<UserId>, PathRejection>,
    payload: Result<Json<UpdateUserBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(user_id) = path?;
    let Json(body) = payload?;
    let req = UpdateUserRequest {
        user_id,
        username: body.username,
        password: body.password,
    };
    Ok(Json(services.update_user(&ctx, req).await?))
}

/// DELETE /v1/users/:id
pub async fn delete_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    path: Result<Path<UserId>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(user_id) = path?;
    Ok(Json(services.delete_user(&ctx, DeleteUserRequest { user_id }).await?))
}

/// PUT /v1/users/:id/roles
pub async fn assign_roles(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    path: Result<Path<UserId>, PathRejection>,
    payload: Result<Json<AssignRolesBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(user_id) = path?;
    let Json(body) = payload?;
    let req = AssignRolesRequest {
        user_id,
        role_ids: body.role_ids,
    };
    Ok(Json(services.assign_roles(&ctx, req).await?))
}
