//! Authorization Engine: live permission checks against the persisted graph.
//!
//! Decisions are never cached and never consult a token's role snapshot.

use std::sync::Arc;

use tracing::instrument;

use rbac_auth::{Decision, decide};
use rbac_core::{RbacError, RbacResult, UserId};

use crate::store::EntityStore;

#[derive(Clone)]
pub struct AuthorizationEngine {
    store: Arc<dyn EntityStore>,
}

impl AuthorizationEngine {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Does user `user` currently hold `permission` through any of its roles?
    ///
    /// `Err(NotFound)` when the user does not exist; `Ok(false)` when it exists
    /// but lacks the permission.
    #[instrument(skip(self), fields(user_id = %user), err)]
    pub async fn check_permission(&self, user: UserId, permission: &str) -> RbacResult<bool> {
        let access = self.store.load_user_access(user).await?;
        let decision = decide(&access, permission);
        tracing::debug!(?decision, "permission evaluated");
        Ok(decision.is_allowed())
    }

    /// Like [`check_permission`](Self::check_permission) but keyed by username
    /// and failing with `PermissionDenied` when the permission is absent.
    #[instrument(skip(self), err)]
    pub async fn require_permission(&self, username: &str, permission: &str) -> RbacResult<()> {
        let user = self.store.find_user_by_name(username).await?;
        let access = self.store.load_user_access(user.id).await?;
        match decide(&access, permission) {
            Decision::Allowed { .. } => Ok(()),
            Decision::Denied => {
                tracing::warn!(username, permission, "administrative permission missing");
                Err(RbacError::permission_denied(format!(
                    "'{username}' lacks permission '{permission}'"
                )))
            }
        }
    }
}

impl core::fmt::Debug for AuthorizationEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuthorizationEngine").finish_non_exhaustive()
    }
}
