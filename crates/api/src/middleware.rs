//! HTTP enforcement gateway.

use axum::{
    extract::State,
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;

use rbac_auth::{AccessPolicy, AuthnError};

use crate::context::RequestContext;

#[derive(Clone)]
pub struct AuthState {
    pub policy: AccessPolicy,
}

/// Let allow-listed paths through; everything else needs a valid bearer token,
/// whose identity is attached to the request as a [`RequestContext`].
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    if state.policy.is_public_path(req.uri().path()) {
        return next.run(req).await;
    }

    let header = match req.headers().get(header::AUTHORIZATION) {
        None => None,
        Some(value) => match value.to_str() {
            Ok(value) => Some(value),
            Err(_) => return unauthorized(req.uri().path(), &AuthnError::MalformedHeader),
        },
    };

    let identity = match state.policy.authenticate(header, Utc::now()) {
        Ok(identity) => identity,
        Err(err) => return unauthorized(req.uri().path(), &err),
    };

    req.extensions_mut().insert(RequestContext::new(identity));
    next.run(req).await
}

fn unauthorized(path: &str, err: &AuthnError) -> Response {
    tracing::info!(path, reason = %err, "http request rejected");
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Bearer")],
        format!("Unauthorized: {err}"),
    )
        .into_response()
}
