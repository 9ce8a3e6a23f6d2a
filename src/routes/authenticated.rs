use crate::{
    AppState,
    handlers::{reviews, users},
};
use axum::{
    Router,
    routing::{get, post},
};

/// Authenticated Router Module
///
/// Routes open to any role once the caller presents a valid token. Ownership
/// (author vs. moderator vs. admin) is decided inside each handler.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // GET/PATCH /users/me
        // The caller's own record. `role` is ignored unless the caller is an admin.
        .route("/users/me", get(users::get_me).patch(users::update_me))
        // --- Reviews ---
        // POST /titles/{title_id}/reviews
        // One review per (title, author); a second attempt is a 409.
        .route("/titles/{title_id}/reviews", post(reviews::create_review))
        .route(
            "/titles/{title_id}/reviews/{review_id}",
            axum::routing::patch(reviews::update_review).delete(reviews::delete_review),
        )
        // --- Comments ---
        .route(
            "/titles/{title_id}/reviews/{review_id}/comments",
            post(reviews::create_comment),
        )
        .route(
            "/titles/{title_id}/reviews/{review_id}/comments/{comment_id}",
            axum::routing::patch(reviews::update_comment).delete(reviews::delete_comment),
        )
}
