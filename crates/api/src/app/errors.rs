use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use rbac_core::RbacError;

/// Handler error: an [`RbacError`] rendered as a JSON error body.
#[derive(Debug)]
pub struct ApiError(pub RbacError);

impl From<RbacError> for ApiError {
    fn from(value: RbacError) -> Self {
        Self(value)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(value: JsonRejection) -> Self {
        Self(RbacError::invalid(value.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(value: PathRejection) -> Self {
        Self(RbacError::invalid(value.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        rbac_error_to_response(self.0)
    }
}

pub fn status_for(err: &RbacError) -> StatusCode {
    match err {
        RbacError::NotFound(_) => StatusCode::NOT_FOUND,
        RbacError::Conflict(_) => StatusCode::CONFLICT,
        RbacError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
        RbacError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        RbacError::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
        RbacError::Invalid(_) => StatusCode::BAD_REQUEST,
        RbacError::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
        RbacError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn rbac_error_to_response(err: RbacError) -> Response {
    if let RbacError::Store(detail) = &err {
        tracing::error!(%detail, "request failed in the store");
    }
    json_error(status_for(&err), err.code(), err.public_message())
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
