//! HTTP handlers, grouped by resource. Each handler resolves the caller (when it needs
//! one), asks the authorization rules, and delegates to the services or the repository.

use crate::{
    AppState,
    error::AppError,
    models::{Review, Title},
};

pub mod auth;
pub mod catalog;
pub mod reviews;
pub mod users;

/// Loads a title or fails with 404.
pub(crate) async fn require_title(state: &AppState, title_id: i64) -> Result<Title, AppError> {
    state
        .repo
        .get_title(title_id)
        .await?
        .ok_or_else(|| AppError::not_found("title"))
}

/// Loads a review that belongs to `title_id`, or fails with 404.
pub(crate) async fn require_review(
    state: &AppState,
    title_id: i64,
    review_id: i64,
) -> Result<Review, AppError> {
    state
        .repo
        .get_review(title_id, review_id)
        .await?
        .ok_or_else(|| AppError::not_found("review"))
}
