//! Shared enforcement policy.
//!
//! One [`AccessPolicy`] is built at startup and handed to both the RPC
//! interceptor and the HTTP middleware. It owns the allow-lists (derived from
//! [`Operation`]) and the token verification path, so the two boundaries agree
//! on which calls are public and which tokens are valid.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use rbac_core::RbacError;

use crate::{Identity, Operation, TokenError, TokenService};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthnError {
    #[error("missing metadata")]
    MissingMetadata,

    #[error("missing token")]
    MissingToken,

    #[error("malformed authorization header")]
    MalformedHeader,

    #[error("invalid token")]
    InvalidToken(#[source] TokenError),
}

impl From<AuthnError> for RbacError {
    fn from(value: AuthnError) -> Self {
        RbacError::unauthenticated(value.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct AccessPolicy {
    tokens: Arc<TokenService>,
    public_rpc_methods: HashSet<String>,
    public_http_paths: HashSet<&'static str>,
}

impl AccessPolicy {
    pub fn new(tokens: Arc<TokenService>) -> Self {
        let public: Vec<Operation> = Operation::ALL
            .into_iter()
            .filter(|op| op.is_public())
            .collect();

        Self {
            tokens,
            public_rpc_methods: public.iter().map(|op| op.rpc_method()).collect(),
            public_http_paths: public.iter().map(|op| op.http_route().path).collect(),
        }
    }

    pub fn tokens(&self) -> &Arc<TokenService> {
        &self.tokens
    }

    /// Whether an RPC method may be invoked without a token.
    pub fn is_public_rpc(&self, method: &str) -> bool {
        self.public_rpc_methods.contains(method)
    }

    /// Whether an HTTP path may be requested without a token.
    pub fn is_public_path(&self, path: &str) -> bool {
        self.public_http_paths.contains(path)
    }

    /// Verify an `authorization` header value and produce the request identity.
    pub fn authenticate(
        &self,
        authorization: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Identity, AuthnError> {
        let header = authorization.ok_or(AuthnError::MissingToken)?;
        let token = extract_bearer(header)?;

        let claims = self
            .tokens
            .verify(token, now)
            .map_err(AuthnError::InvalidToken)?;

        Identity::try_from(claims).map_err(AuthnError::InvalidToken)
    }
}

/// Extract the token from a `Bearer <token>` header value.
pub fn extract_bearer(header: &str) -> Result<&str, AuthnError> {
    let header = header.trim();
    let (scheme, token) = header.split_once(' ').ok_or(AuthnError::MalformedHeader)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthnError::MalformedHeader);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(AuthnError::MissingToken);
    }

    Ok(token)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::{SigningSecret, default_token_ttl};

    fn policy() -> AccessPolicy {
        let secret = SigningSecret::new("policy-secret").unwrap();
        AccessPolicy::new(Arc::new(TokenService::new(&secret, default_token_ttl())))
    }

    #[test]
    fn allow_lists_cover_login_register_and_health() {
        let p = policy();
        assert!(p.is_public_rpc("/rbac.RBACService/Login"));
        assert!(p.is_public_rpc("/rbac.RBACService/Register"));
        assert!(p.is_public_rpc("/grpc.health.v1.Health/Check"));
        assert!(!p.is_public_rpc("/rbac.RBACService/ListUsers"));

        assert!(p.is_public_path("/v1/login"));
        assert!(p.is_public_path("/v1/register"));
        assert!(p.is_public_path("/health"));
        assert!(!p.is_public_path("/v1/users"));
    }

    #[test]
    fn every_public_operation_is_public_on_both_boundaries() {
        let p = policy();
        for op in Operation::ALL {
            assert_eq!(p.is_public_rpc(&op.rpc_method()), op.is_public(), "{op}");
            assert_eq!(p.is_public_path(op.http_route().path), op.is_public(), "{op}");
        }
    }

    #[test]
    fn bearer_extraction() {
        assert_eq!(extract_bearer("Bearer abc.def.ghi"), Ok("abc.def.ghi"));
        assert_eq!(extract_bearer("bearer   tok "), Ok("tok"));
        assert_eq!(extract_bearer("Basic dXNlcjpwdw=="), Err(AuthnError::MalformedHeader));
        assert_eq!(extract_bearer("abc.def.ghi"), Err(AuthnError::MalformedHeader));
        assert_eq!(extract_bearer("Bearer "), Err(AuthnError::MalformedHeader));
    }

    #[test]
    fn authenticate_maps_failures_to_unauthenticated() {
        let p = policy();
        let now = Utc::now();

        assert_eq!(p.authenticate(None, now), Err(AuthnError::MissingToken));
        assert!(matches!(
            p.authenticate(Some("Bearer junk"), now),
            Err(AuthnError::InvalidToken(_))
        ));

        let err: RbacError = AuthnError::MissingToken.into();
        assert!(matches!(err, RbacError::Unauthenticated(_)));
    }

    #[test]
    fn authenticate_accepts_fresh_token_and_rejects_stale_one() {
        let p = policy();
        let now = Utc::now();
        let issued = p.tokens().issue("alice", vec!["user".into()], now).unwrap();
        let header = format!("Bearer {}", issued.token);

        let identity = p.authenticate(Some(&header), now).unwrap();
        assert_eq!(identity.username, "alice");
        assert!(identity.has_role("user"));

        assert_eq!(
            p.authenticate(Some(&header), now + Duration::hours(3)),
            Err(AuthnError::InvalidToken(TokenError::Expired))
        );
    }
}
