use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use crate::{
    AppState,
    auth::AuthUser,
    error::AppError,
    handlers::{require_review, require_title},
    models::{Comment, CommentRequest, CreateReviewRequest, Review, UpdateReviewRequest},
    permissions::{Action, Resource, ensure},
    validation::{validate_score, validate_text},
};

// --- Reviews ---

/// list_reviews
///
/// [Public Route] Reviews of one title, oldest first.
#[utoipa::path(
    get,
    path = "/api/v1/titles/{title_id}/reviews",
    params(("title_id" = i64, Path, description = "Title ID")),
    responses(
        (status = 200, description = "Reviews", body = [Review]),
        (status = 404, description = "Title not found")
    )
)]
pub async fn list_reviews(
    State(state): State<AppState>,
    Path(title_id): Path<i64>,
) -> Result<Json<Vec<Review>>, AppError> {
    require_title(&state, title_id).await?;
    let reviews = state.repo.list_reviews(title_id).await?;
    Ok(Json(reviews))
}

/// get_review
///
/// [Public Route]
#[utoipa::path(
    get,
    path = "/api/v1/titles/{title_id}/reviews/{review_id}",
    params(
        ("title_id" = i64, Path, description = "Title ID"),
        ("review_id" = i64, Path, description = "Review ID")
    ),
    responses(
        (status = 200, description = "Found", body = Review),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_review(
    State(state): State<AppState>,
    Path((title_id, review_id)): Path<(i64, i64)>,
) -> Result<Json<Review>, AppError> {
    let review = require_review(&state, title_id, review_id).await?;
    Ok(Json(review))
}

/// create_review
///
/// [Authenticated Route] Posts the caller's review of a title.
/// 1. Validation: score within 1..=10, non-empty text.
/// 2. Integrity: a second review by the same author on the same title is a 409.
/// 3. The title rating is recomputed in the same unit of work.
#[utoipa::path(
    post,
    path = "/api/v1/titles/{title_id}/reviews",
    params(("title_id" = i64, Path, description = "Title ID")),
    request_body = CreateReviewRequest,
    responses(
        (status = 201, description = "Created", body = Review),
        (status = 400, description = "Invalid score or text"),
        (status = 404, description = "Title not found"),
        (status = 409, description = "Already reviewed by this author")
    )
)]
pub async fn create_review(
    identity: AuthUser,
    State(state): State<AppState>,
    Path(title_id): Path<i64>,
    Json(payload): Json<CreateReviewRequest>,
) -> Result<(StatusCode, Json<Review>), AppError> {
    ensure(&identity, Action::Create, Resource::Review { author_id: identity.id })?;
    validate_text(&payload.text)?;
    validate_score(payload.score)?;

    let review = state
        .repo
        .create_review(
            title_id,
            identity.id,
            payload.text,
            payload.score,
            state.clock.utc(),
        )
        .await?;
    tracing::info!(user = %identity.username, title_id, review_id = review.id, "review posted");
    Ok((StatusCode::CREATED, Json(review)))
}

/// update_review
///
/// [Authenticated Route] Author, moderator or admin. A score change re-rates the title.
#[utoipa::path(
    patch,
    path = "/api/v1/titles/{title_id}/reviews/{review_id}",
    params(
        ("title_id" = i64, Path, description = "Title ID"),
        ("review_id" = i64, Path, description = "Review ID")
    ),
    request_body = UpdateReviewRequest,
    responses(
        (status = 200, description = "Updated", body = Review),
        (status = 403, description = "Not the author or a moderator"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn update_review(
    identity: AuthUser,
    State(state): State<AppState>,
    Path((title_id, review_id)): Path<(i64, i64)>,
    Json(payload): Json<UpdateReviewRequest>,
) -> Result<Json<Review>, AppError> {
    let existing = require_review(&state, title_id, review_id).await?;
    ensure(&identity, Action::Update, Resource::Review { author_id: existing.author_id })?;
    if let Some(text) = &payload.text {
        validate_text(text)?;
    }
    if let Some(score) = payload.score {
        validate_score(score)?;
    }

    let review = state
        .repo
        .update_review(title_id, review_id, payload)
        .await?
        .ok_or_else(|| AppError::not_found("review"))?;
    Ok(Json(review))
}

/// delete_review
///
/// [Authenticated Route] Author, moderator or admin. The title is re-rated; with no
/// reviews left its rating becomes null.
#[utoipa::path(
    delete,
    path = "/api/v1/titles/{title_id}/reviews/{review_id}",
    params(
        ("title_id" = i64, Path, description = "Title ID"),
        ("review_id" = i64, Path, description = "Review ID")
    ),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not the author or a moderator"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_review(
    identity: AuthUser,
    State(state): State<AppState>,
    Path((title_id, review_id)): Path<(i64, i64)>,
) -> Result<StatusCode, AppError> {
    let existing = require_review(&state, title_id, review_id).await?;
    ensure(&identity, Action::Delete, Resource::Review { author_id: existing.author_id })?;
    if state.repo.delete_review(title_id, review_id).await? {
        tracing::info!(user = %identity.username, title_id, review_id, "review deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("review"))
    }
}

// --- Comments ---

async fn require_comment(
    state: &AppState,
    title_id: i64,
    review_id: i64,
    comment_id: i64,
) -> Result<Comment, AppError> {
    require_review(state, title_id, review_id).await?;
    state
        .repo
        .get_comment(review_id, comment_id)
        .await?
        .ok_or_else(|| AppError::not_found("comment"))
}

/// list_comments
///
/// [Public Route] Comments on one review, oldest first.
#[utoipa::path(
    get,
    path = "/api/v1/titles/{title_id}/reviews/{review_id}/comments",
    params(
        ("title_id" = i64, Path, description = "Title ID"),
        ("review_id" = i64, Path, description = "Review ID")
    ),
    responses(
        (status = 200, description = "Comments", body = [Comment]),
        (status = 404, description = "Title or review not found")
    )
)]
pub async fn list_comments(
    State(state): State<AppState>,
    Path((title_id, review_id)): Path<(i64, i64)>,
) -> Result<Json<Vec<Comment>>, AppError> {
    require_review(&state, title_id, review_id).await?;
    let comments = state.repo.list_comments(review_id).await?;
    Ok(Json(comments))
}

/// get_comment
///
/// [Public Route]
#[utoipa::path(
    get,
    path = "/api/v1/titles/{title_id}/reviews/{review_id}/comments/{comment_id}",
    params(
        ("title_id" = i64, Path, description = "Title ID"),
        ("review_id" = i64, Path, description = "Review ID"),
        ("comment_id" = i64, Path, description = "Comment ID")
    ),
    responses(
        (status = 200, description = "Found", body = Comment),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_comment(
    State(state): State<AppState>,
    Path((title_id, review_id, comment_id)): Path<(i64, i64, i64)>,
) -> Result<Json<Comment>, AppError> {
    let comment = require_comment(&state, title_id, review_id, comment_id).await?;
    Ok(Json(comment))
}

/// create_comment
///
/// [Authenticated Route]
#[utoipa::path(
    post,
    path = "/api/v1/titles/{title_id}/reviews/{review_id}/comments",
    params(
        ("title_id" = i64, Path, description = "Title ID"),
        ("review_id" = i64, Path, description = "Review ID")
    ),
    request_body = CommentRequest,
    responses(
        (status = 201, description = "Created", body = Comment),
        (status = 404, description = "Title or review not found")
    )
)]
pub async fn create_comment(
    identity: AuthUser,
    State(state): State<AppState>,
    Path((title_id, review_id)): Path<(i64, i64)>,
    Json(payload): Json<CommentRequest>,
) -> Result<(StatusCode, Json<Comment>), AppError> {
    ensure(&identity, Action::Create, Resource::Comment { author_id: identity.id })?;
    validate_text(&payload.text)?;
    require_review(&state, title_id, review_id).await?;

    let comment = state
        .repo
        .create_comment(review_id, identity.id, payload.text, state.clock.utc())
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

/// update_comment
///
/// [Authenticated Route] Author, moderator or admin.
#[utoipa::path(
    patch,
    path = "/api/v1/titles/{title_id}/reviews/{review_id}/comments/{comment_id}",
    params(
        ("title_id" = i64, Path, description = "Title ID"),
        ("review_id" = i64, Path, description = "Review ID"),
        ("comment_id" = i64, Path, description = "Comment ID")
    ),
    request_body = CommentRequest,
    responses(
        (status = 200, description = "Updated", body = Comment),
        (status = 403, description = "Not the author or a moderator"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn update_comment(
    identity: AuthUser,
    State(state): State<AppState>,
    Path((title_id, review_id, comment_id)): Path<(i64, i64, i64)>,
    Json(payload): Json<CommentRequest>,
) -> Result<Json<Comment>, AppError> {
    let existing = require_comment(&state, title_id, review_id, comment_id).await?;
    ensure(&identity, Action::Update, Resource::Comment { author_id: existing.author_id })?;
    validate_text(&payload.text)?;

    let comment = state
        .repo
        .update_comment(review_id, comment_id, payload.text)
        .await?
        .ok_or_else(|| AppError::not_found("comment"))?;
    Ok(Json(comment))
}

/// delete_comment
///
/// [Authenticated Route] Author, moderator or admin.
#[utoipa::path(
    delete,
    path = "/api/v1/titles/{title_id}/reviews/{review_id}/comments/{comment_id}",
    params(
        ("title_id" = i64, Path, description = "Title ID"),
        ("review_id" = i64, Path, description = "Review ID"),
        ("comment_id" = i64, Path, description = "Comment ID")
    ),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not the author or a moderator"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_comment(
    identity: AuthUser,
    State(state): State<AppState>,
    Path((title_id, review_id, comment_id)): Path<(i64, i64, i64)>,
) -> Result<StatusCode, AppError> {
    let existing = require_comment(&state, title_id, review_id, comment_id).await?;
    ensure(&identity, Action::Delete, Resource::Comment { author_id: existing.author_id })?;
    if state.repo.delete_comment(review_id, comment_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("comment"))
    }
}
