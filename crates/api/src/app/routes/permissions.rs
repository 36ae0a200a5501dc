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

use rbac_core::PermissionId;

use crate::app::dto::{CreatePermissionRequest, DeletePermissionRequest};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::context::RequestContext;

/// GET /v1/permissions - live permissions only
pub async fn list_permissions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(services.list_permissions(&ctx).await?))
}

/// POST /v1/permissions
pub async fn create_permission(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    payload: Result<Json<CreatePermissionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    Ok((StatusCode::CREATED, Json(services.create_permission(&ctx, req).await?)))
}

/// DELETE /v1/permissions/:id - soft delete
pub async fn delete_permission(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    path: Result<Path<PermissionId>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(permission_id) = path?;
    let resp = services
        .delete_permission(&ctx, DeletePermissionRequest { permission_id })
        .await?;
    Ok(Json(resp))
}
