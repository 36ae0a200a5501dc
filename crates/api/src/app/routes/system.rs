use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};

use crate::app::dto::ServingStatus;
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::context::RequestContext;

/// GET /health
pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    let health = services.health().await;
    let status = match health.status {
        ServingStatus::Serving => StatusCode::OK,
        ServingStatus::NotServing => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(health))
}

/// GET /v1/whoami
pub async fn whoami(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(services.whoami(&ctx).await?))
}
