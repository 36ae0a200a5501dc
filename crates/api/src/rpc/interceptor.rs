//! Authentication for every incoming call, keyed on the method name.

use chrono::{DateTime, Utc};

use rbac_auth::{AccessPolicy, AuthnError};

use super::frame::RpcRequest;
use crate::context::RequestContext;

/// `Ok(None)` for allow-listed methods; otherwise the verified caller.
pub fn intercept(
    policy: &AccessPolicy,
    req: &RpcRequest,
    now: DateTime<Utc>,
) -> Result<Option<RequestContext>, AuthnError> {
    if policy.is_public_rpc(&req.method) {
        return Ok(None);
    }
    if req.metadata.is_empty() {
        return Err(AuthnError::MissingMetadata);
    }

    let identity = policy.authenticate(req.metadata.get("authorization"), now)?;
    Ok(Some(RequestContext::new(identity)))
}
