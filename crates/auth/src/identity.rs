use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::Claims;

/// Authenticated identity of a request.
///
/// Built by an enforcement gateway from verified claims and passed explicitly
/// down the call chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub username: String,
    /// Role snapshot from the token, not the live role set.
    pub roles: Vec<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Identity {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

impl TryFrom<Claims> for Identity {
    type Error = crate::TokenError;

    fn try_from(claims: Claims) -> Result<Self, Self::Error> {
        let issued_at = claims
            .issued_at()
            .ok_or_else(|| crate::TokenError::Malformed("iat out of range".to_string()))?;
        let expires_at = claims
            .expires_at()
            .ok_or_else(|| crate::TokenError::Malformed("exp out of range".to_string()))?;
        Ok(Self {
            username: claims.username,
            roles: claims.roles,
            issued_at,
            expires_at,
        })
    }
}
