use rbac_auth::Identity;

/// Request-scoped caller context.
///
/// Built by an enforcement gateway once the bearer token verifies, then passed
/// explicitly to the service layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    identity: Identity,
}

impl RequestContext {
    pub fn new(identity: Identity) -> Self {
        Self { identity }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn username(&self) -> &str {
        &self.identity.username
    }

    /// Role snapshot carried by the token.
    pub fn roles(&self) -> &[String] {
        &self.identity.roles
    }
}
