//! Account lifecycle: login, registration, bootstrap and the CRUD surface.
//!
//! CRUD and assignment calls delegate to the [`EntityStore`]; the only extra
//! logic here is input validation and credential hashing.

use std::sync::Arc;

use chrono::Utc;
use tracing::instrument;

use rbac_auth::{
    IssuedToken, TokenService, UNKNOWN_USER_CREDENTIAL, hash_credential, verify_credential,
};
use rbac_core::{
    Permission, PermissionId, RbacError, RbacResult, Role, RoleId, RoleWithPermissions, User,
    UserId, UserWithRoles,
};

use crate::authorization::AuthorizationEngine;
use crate::store::{AdminSeed, BootstrapReport, EntityStore};

/// Role every self-registered account receives. Provisioned out-of-band.
pub const DEFAULT_ROLE: &str = "user";

pub const ADMIN_ROLE: &str = "admin";
pub const ADMIN_ROLE_DESCRIPTION: &str = "Administrator with full access";
pub const ADMIN_PERMISSION: &str = "write";
pub const ADMIN_PERMISSION_DESCRIPTION: &str = "write blogs";

const MAX_NAME_LEN: usize = 64;
const MAX_DESCRIPTION_LEN: usize = 255;
const INVALID_CREDENTIALS: &str = "invalid credentials";

#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn EntityStore>,
    tokens: Arc<TokenService>,
    engine: AuthorizationEngine,
}

impl AccountService {
    pub fn new(store: Arc<dyn EntityStore>, tokens: Arc<TokenService>) -> Self {
        let engine = AuthorizationEngine::new(store.clone());
        Self {
            store,
            tokens,
            engine,
        }
    }

    pub fn engine(&self) -> &AuthorizationEngine {
        &self.engine
    }

    pub fn tokens(&self) -> &Arc<TokenService> {
        &self.tokens
    }

    /// Store liveness, for health checks.
    pub async fn health(&self) -> RbacResult<()> {
        self.store.ping().await.map_err(Into::into)
    }

    /// Verify credentials and issue a token carrying the user's current role names.
    ///
    /// Unknown user and wrong credential are indistinguishable to the caller.
    #[instrument(skip(self, credential), err)]
    pub async fn login(&self, username: &str, credential: &str) -> RbacResult<IssuedToken> {
        let found = match self.store.find_user_by_name(username).await {
            Ok(user) => Some(user),
            Err(crate::store::StoreError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };

        let stored = stored_credential(found.as_ref()).to_string();
        let verified = verify_blocking(credential.to_string(), stored).await?;
        let user = match found {
            Some(user) if verified => user,
            Some(_) => {
                tracing::info!(username, "login rejected: credential mismatch");
                return Err(RbacError::unauthenticated(INVALID_CREDENTIALS));
            }
            None => {
                tracing::info!(username, "login rejected: unknown user");
                return Err(RbacError::unauthenticated(INVALID_CREDENTIALS));
            }
        };

        let roles = self.store.find_user_with_roles(user.id).await?.role_names();
        let issued = self
            .tokens
            .issue(&user.username, roles, Utc::now())
            .map_err(|e| RbacError::store(format!("token signing failed: {e}")))?;

        tracing::info!(username, "login succeeded");
        Ok(issued)
    }

    /// Self-registration, bound to the default role.
    #[instrument(skip(self, credential), err)]
    pub async fn register(&self, username: &str, credential: &str) -> RbacResult<User> {
        validate_name("username", username)?;
        validate_credential(credential)?;

        match self.store.find_user_by_name(username).await {
            Ok(_) => return Err(RbacError::conflict(format!("username '{username}'"))),
            Err(crate::store::StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let role = match self.store.find_role_by_name(DEFAULT_ROLE).await {
            Ok(role) => role,
            Err(crate::store::StoreError::NotFound(_)) => {
                tracing::warn!("registration refused: default role '{DEFAULT_ROLE}' missing");
                return Err(RbacError::precondition_failed(format!(
                    "default role '{DEFAULT_ROLE}' is not provisioned"
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let hashed = hash_blocking(credential.to_string()).await?;
        let user = self
            .store
            .create_user_with_roles(username, &hashed, &[role.id])
            .await?;
        tracing::info!(user_id = %user.id, "user registered");
        Ok(user)
    }

    /// Current role names of the named user.
    pub async fn get_user_roles(&self, username: &str) -> RbacResult<Vec<String>> {
        let user = self.store.find_user_by_name(username).await?;
        Ok(self.store.find_user_with_roles(user.id).await?.role_names())
    }

    pub async fn check_permission(&self, user: UserId, permission: &str) -> RbacResult<bool> {
        validate_name("permission", permission)?;
        self.engine.check_permission(user, permission).await
    }

    pub async fn list_users(&self) -> RbacResult<Vec<UserWithRoles>> {
        Ok(self.store.list_users().await?)
    }

    #[instrument(skip(self, credential), err)]
    pub async fn create_user(&self, username: &str, credential: &str) -> RbacResult<User> {
        validate_name("username", username)?;
        validate_credential(credential)?;
        let hashed = hash_blocking(credential.to_string()).await?;
        Ok(self.store.create_user(username, &hashed).await?)
    }

    pub async fn get_user(&self, id: UserId) -> RbacResult<UserWithRoles> {
        Ok(self.store.find_user_with_roles(id).await?)
    }

    /// Rename a user; an empty `credential` leaves the stored one untouched.
    #[instrument(skip(self, credential), fields(user_id = %id), err)]
    pub async fn update_user(&self, id: UserId, username: &str, credential: &str) -> RbacResult<User> {
        validate_name("username", username)?;
        let hashed = if credential.is_empty() {
            None
        } else {
            Some(hash_blocking(credential.to_string()).await?)
        };
        Ok(self
            .store
            .update_user(id, username, hashed.as_deref())
            .await?)
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    pub async fn delete_user(&self, id: UserId) -> RbacResult<()> {
        self.store.delete_user(id).await?;
        tracing::info!("user deleted");
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %user), err)]
    pub async fn assign_roles(&self, user: UserId, roles: &[RoleId]) -> RbacResult<()> {
        Ok(self.store.assign_roles_to_user(user, roles).await?)
    }

    #[instrument(skip(self), err)]
    pub async fn create_role(&self, name: &str, description: &str) -> RbacResult<Role> {
        validate_name("role name", name)?;
        validate_description(description)?;
        Ok(self.store.create_role(name, description).await?)
    }

    #[instrument(skip(self), err)]
    pub async fn create_permission(&self, name: &str, description: &str) -> RbacResult<Permission> {
        validate_name("permission name", name)?;
        validate_description(description)?;
        Ok(self.store.create_permission(name, description).await?)
    }

    pub async fn list_permissions(&self) -> RbacResult<Vec<Permission>> {
        Ok(self.store.list_permissions().await?)
    }

    #[instrument(skip(self), fields(permission_id = %id), err)]
    pub async fn delete_permission(&self, id: PermissionId) -> RbacResult<()> {
        Ok(self.store.soft_delete_permission(id).await?)
    }

    #[instrument(skip(self), fields(role_id = %role), err)]
    pub async fn assign_permissions(
        &self,
        role: RoleId,
        permissions: &[PermissionId],
    ) -> RbacResult<()> {
        Ok(self
            .store
            .assign_permissions_to_role(role, permissions)
            .await?)
    }

    pub async fn get_role_permissions(&self, role: RoleId) -> RbacResult<RoleWithPermissions> {
        Ok(self.store.find_role_with_permissions(role).await?)
    }

    /// Ensure the admin role, the `write` permission, the admin user and both
    /// associations exist. Re-running changes nothing.
    #[instrument(skip(self, password), err)]
    pub async fn bootstrap(&self, username: &str, password: &str) -> RbacResult<BootstrapReport> {
        validate_name("admin username", username)?;
        validate_credential(password)?;

        let seed = AdminSeed {
            username: username.to_string(),
            credential: hash_blocking(password.to_string()).await?,
            role: ADMIN_ROLE.to_string(),
            role_description: ADMIN_ROLE_DESCRIPTION.to_string(),
            permission: ADMIN_PERMISSION.to_string(),
            permission_description: ADMIN_PERMISSION_DESCRIPTION.to_string(),
        };
        let report = self.store.bootstrap_admin(&seed).await?;

        if report.changed_anything() {
            tracing::info!(?report, "bootstrap provisioned admin data");
        } else {
            tracing::info!("bootstrap: admin data already present");
        }
        Ok(report)
    }
}

impl core::fmt::Debug for AccountService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AccountService")
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}

fn validate_name(what: &str, value: &str) -> RbacResult<()> {
    if value.trim().is_empty() {
        return Err(RbacError::invalid(format!("{what} must not be empty")));
    }
    if value.chars().count() > MAX_NAME_LEN {
        return Err(RbacError::invalid(format!(
            "{what} must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(())
}

// Matches the VARCHAR width of both description columns.
fn validate_description(description: &str) -> RbacResult<()> {
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(RbacError::invalid(format!(
            "description must be at most {MAX_DESCRIPTION_LEN} characters"
        )));
    }
    Ok(())
}

/// Hash to verify a login against. Unknown users get a placeholder so both
/// rejection paths pay for one Argon2 verification.
fn stored_credential(user: Option<&User>) -> &str {
    user.map_or(UNKNOWN_USER_CREDENTIAL, |u| u.credential.as_str())
}

fn validate_credential(credential: &str) -> RbacResult<()> {
    if credential.is_empty() {
        return Err(RbacError::invalid("credential must not be empty"));
    }
    Ok(())
}

// Argon2 blocks for tens of milliseconds; run it on the blocking pool.
async fn hash_blocking(plain: String) -> RbacResult<String> {
    tokio::task::spawn_blocking(move || hash_credential(&plain))
        .await
        .map_err(|e| RbacError::store(format!("hashing task failed: {e}")))?
        .map_err(|e| RbacError::invalid(e.to_string()))
}

async fn verify_blocking(plain: String, stored: String) -> RbacResult<bool> {
    tokio::task::spawn_blocking(move || verify_credential(&plain, &stored))
        .await
        .map_err(|e| RbacError::store(format!("verification task failed: {e}")))
}
