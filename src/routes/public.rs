use crate::{
    AppState,
    handlers::{auth, catalog, reviews},
};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints reachable without a token. Writes on the same paths are registered by the
/// authenticated and admin routers; axum merges the method routers per path.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // --- Auth flow ---
        // POST /auth/signup
        // Creates or reuses the account and mails a confirmation code.
        .route("/auth/signup", post(auth::signup))
        // POST /auth/token
        // Confirmation code in, access token out.
        .route("/auth/token", post(auth::obtain_token))
        // --- Catalog ---
        .route("/categories", get(catalog::list_categories))
        .route("/genres", get(catalog::list_genres))
        // GET /titles?category=&genre=&name=&year=
        .route("/titles", get(catalog::list_titles))
        .route("/titles/{title_id}", get(catalog::get_title))
        // --- Reviews & Comments ---
        .route("/titles/{title_id}/reviews", get(reviews::list_reviews))
        .route(
            "/titles/{title_id}/reviews/{review_id}",
            get(reviews::get_review),
        )
        .route(
            "/titles/{title_id}/reviews/{review_id}/comments",
            get(reviews::list_comments),
        )
        .route(
            "/titles/{title_id}/reviews/{review_id}/comments/{comment_id}",
            get(reviews::get_comment),
        )
}
