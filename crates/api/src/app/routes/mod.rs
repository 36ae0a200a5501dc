use axum::{
    Router,
    routing::{delete, get, post, put},
};

pub mod auth;
pub mod permissions;
pub mod roles;
pub mod system;
pub mod users;

/// Router for every operation. Which paths need a token is decided by the
/// auth middleware, not by the shape of this tree.
pub fn router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/v1/login", post(auth::login))
        .route("/v1/register", post(auth::register))
        .route("/v1/whoami", get(system::whoami))
        .route("/v1/user-roles/:username", get(users::get_user_roles))
        .route("/v1/check-permission", post(users::check_permission))
        .route("/v1/users", get(users::list_users).post(users::create_user))
        .route(
            "/v1/users/:id",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        .route("/v1/users/:id/roles", put(users::assign_roles))
        .route(
            "/v1/permissions",
            get(permissions::list_permissions).post(permissions::create_permission),
        )
        .route("/v1/permissions/:id", delete(permissions::delete_permission))
        .route("/v1/roles", post(roles::create_role))
        .route(
            "/v1/roles/:id/permissions",
            get(roles::get_role_permissions).put(roles::assign_permissions),
        )
}
