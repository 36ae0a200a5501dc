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

use rbac_core::RoleId;

use crate::app::dto::{
    AssignPermissionsBody, AssignPermissionsRequest, CreateRoleRequest, GetRolePermissionsRequest,
};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::context::RequestContext;

/// POST /v1/roles
pub async fn create_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    payload: Result<Json<CreateRoleRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    Ok((StatusCode::CREATED, Json(services.create_role(&ctx, req).await?)))
}

/// PUT /v1/roles/:id/permissions - replace the role's permission set
pub async fn assign_permissions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    path: Result<Path<RoleId>, PathRejection>,
    payload: Result<Json<AssignPermissionsBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(role_id) = path?;
    let Json(body) = payload?;
    let req = AssignPermissionsRequest {
        role_id,
        permission_ids: body.permission_ids,
    };
    Ok(Json(services.assign_permissions(&ctx, req).await?))
}

/// GET /v1/roles/:id/permissions
pub async fn get_role_permissions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    path: Result<Path<RoleId>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(role_id) = path?;
    let resp = services
        .get_role_permissions(&ctx, GetRolePermissionsRequest { role_id })
        .await?;
    Ok(Json(resp))
}
