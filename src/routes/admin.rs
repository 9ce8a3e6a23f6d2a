use crate::{
    AppState,
    handlers::{catalog, users},
};
use axum::{
    Router,
    routing::{delete, get, post},
};

/// Admin Router Module
///
/// Routes that only admins (or superusers) may use. The router is mounted behind the
/// authentication layer; the admin check itself happens in each handler so a non-admin
/// gets 403 rather than 401.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // --- Users collection ---
        // GET /users?search=  |  POST /users
        .route("/users", get(users::list_users).post(users::create_user))
        // GET/PATCH/DELETE /users/{username}
        // `/users/me` is a static segment and wins over this pattern.
        .route(
            "/users/{username}",
            get(users::get_user)
                .patch(users::update_user)
                .delete(users::delete_user),
        )
        // --- Catalog writes ---
        .route("/categories", post(catalog::create_category))
        .route("/categories/{slug}", delete(catalog::delete_category))
        .route("/genres", post(catalog::create_genre))
        .route("/genres/{slug}", delete(catalog::delete_genre))
        .route("/titles", post(catalog::create_title))
        .route(
            "/titles/{title_id}",
            axum::routing::patch(catalog::update_title).delete(catalog::delete_title),
        )
}
