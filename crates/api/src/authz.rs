//! API-side authorization guard for operations.
//!
//! Authentication happens in the gateways; this adds the optional live
//! permission requirement on administrative operations.

use rbac_auth::Operation;
use rbac_core::{RbacError, RbacResult};
use rbac_infra::AuthorizationEngine;

use crate::context::RequestContext;

/// Check the caller may run `operation`.
///
/// Intended to be called **before** the operation touches the store. With no
/// `admin_permission` configured every authenticated caller passes.
pub async fn authorize_operation(
    engine: &AuthorizationEngine,
    admin_permission: Option<&str>,
    ctx: Option<&RequestContext>,
    operation: Operation,
) -> RbacResult<()> {
    if !operation.is_administrative() {
        return Ok(());
    }
    let Some(required) = admin_permission else {
        return Ok(());
    };
    let ctx = ctx.ok_or_else(|| RbacError::unauthenticated("identity required"))?;

    engine.require_permission(ctx.username(), required).await.map_err(|e| match e {
        // The token outlived its account.
        RbacError::NotFound(_) => {
            RbacError::permission_denied(format!("'{}' no longer exists", ctx.username()))
        }
        other => other,
    })
}
