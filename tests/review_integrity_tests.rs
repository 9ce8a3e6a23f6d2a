mod common;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use common::{TestContext, identity, seed_user, test_context};
use std::sync::Arc;
use yamdb_api::{
    AppError,
    handlers::reviews,
    models::{CreateReviewRequest, Role, TitleWrite, UpdateReviewRequest},
    rating::mean_rating,
    repository::Repository,
};

async fn seed_title(ctx: &TestContext) -> i64 {
    ctx.repo
        .create_title(TitleWrite {
            name: "Solaris".to_string(),
            year: 1961,
            ..TitleWrite::default()
        })
        .await
        .unwrap()
        .id
}

fn review(score: i16) -> Json<CreateReviewRequest> {
    Json(CreateReviewRequest {
        text: "worth it".to_string(),
        score,
    })
}

async fn rating_of(ctx: &TestContext, title_id: i64) -> Option<i32> {
    ctx.repo.get_title(title_id).await.unwrap().unwrap().rating
}

#[test]
fn test_mean_rating_rounds_half_up() {
    assert_eq!(mean_rating(Vec::<i16>::new()), None);
    assert_eq!(mean_rating([8]), Some(8));
    assert_eq!(mean_rating([8, 6]), Some(7));
    assert_eq!(mean_rating([7, 8]), Some(8));
    assert_eq!(mean_rating([1, 1, 2]), Some(1));
    assert_eq!(mean_rating([10, 10, 9]), Some(10));
}

#[tokio::test]
async fn test_rating_follows_review_lifecycle() {
    let ctx = test_context();
    let alice = seed_user(&ctx.repo, "alice", Role::Regular);
    let bob = seed_user(&ctx.repo, "bob", Role::Regular);
    let title_id = seed_title(&ctx).await;
    assert_eq!(rating_of(&ctx, title_id).await, None);

    let (status, Json(alice_review)) = reviews::create_review(
        identity(&alice),
        State(ctx.state.clone()),
        Path(title_id),
        review(8),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(alice_review.author, "alice");
    assert_eq!(rating_of(&ctx, title_id).await, Some(8));

    let (status, _) =
        reviews::create_review(identity(&bob), State(ctx.state.clone()), Path(title_id), review(6))
            .await
            .unwrap();
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(rating_of(&ctx, title_id).await, Some(7));

    // A second review by the same author is refused and leaves the rating alone.
    let err = reviews::create_review(
        identity(&alice),
        State(ctx.state.clone()),
        Path(title_id),
        review(1),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert_eq!(rating_of(&ctx, title_id).await, Some(7));

    // Updating the existing review is allowed and re-rates.
    let Json(updated) = reviews::update_review(
        identity(&alice),
        State(ctx.state.clone()),
        Path((title_id, alice_review.id)),
        Json(UpdateReviewRequest {
            score: Some(10),
            ..UpdateReviewRequest::default()
        }),
    )
    .await
    .unwrap();
    assert_eq!(updated.score, 10);
    assert_eq!(rating_of(&ctx, title_id).await, Some(8));

    let status = reviews::delete_review(
        identity(&alice),
        State(ctx.state.clone()),
        Path((title_id, alice_review.id)),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(rating_of(&ctx, title_id).await, Some(6));
}

#[tokio::test]
async fn test_rating_is_null_after_last_review_removed() {
    let ctx = test_context();
    let alice = seed_user(&ctx.repo, "alice", Role::Regular);
    let title_id = seed_title(&ctx).await;

    let (_, Json(created)) = reviews::create_review(
        identity(&alice),
        State(ctx.state.clone()),
        Path(title_id),
        review(4),
    )
    .await
    .unwrap();
    let status = reviews::delete_review(
        identity(&alice),
        State(ctx.state.clone()),
        Path((title_id, created.id)),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::NO_CONTENT);

    assert_eq!(rating_of(&ctx, title_id).await, None);
}

#[tokio::test]
async fn test_deleting_author_rerates_their_titles() {
    let ctx = test_context();
    let alice = seed_user(&ctx.repo, "alice", Role::Regular);
    let bob = seed_user(&ctx.repo, "bob", Role::Regular);
    let title_id = seed_title(&ctx).await;
    for (author, score) in [(&alice, 2), (&bob, 9)] {
        let (status, _) = reviews::create_review(
            identity(author),
            State(ctx.state.clone()),
            Path(title_id),
            review(score),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
    }

    assert!(ctx.repo.delete_user("alice").await.unwrap());

    assert_eq!(rating_of(&ctx, title_id).await, Some(9));
    assert_eq!(ctx.repo.list_reviews(title_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_duplicate_reviews_yield_one_success() {
    let ctx = test_context();
    let alice = seed_user(&ctx.repo, "alice", Role::Regular);
    let title_id = seed_title(&ctx).await;
    let repo: Arc<dyn Repository> = ctx.repo.clone();

    let attempts = (0..8).map(|i| {
        let repo = repo.clone();
        let author_id = alice.id;
        tokio::spawn(async move {
            repo.create_review(title_id, author_id, format!("take {i}"), 5, chrono::Utc::now())
                .await
        })
    });
    let mut successes = 0;
    let mut conflicts = 0;
    for handle in attempts.collect::<Vec<_>>() {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(AppError::Conflict(_)) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(conflicts, 7);
    assert_eq!(rating_of(&ctx, title_id).await, Some(5));
}

#[tokio::test]
async fn test_review_on_missing_title_is_not_found() {
    let ctx = test_context();
    let alice = seed_user(&ctx.repo, "alice", Role::Regular);

    let err = reviews::create_review(identity(&alice), State(ctx.state.clone()), Path(404), review(5))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_score_out_of_range_rejected() {
    let ctx = test_context();
    let alice = seed_user(&ctx.repo, "alice", Role::Regular);
    let title_id = seed_title(&ctx).await;

    for score in [0, 11] {
        let err = reviews::create_review(
            identity(&alice),
            State(ctx.state.clone()),
            Path(title_id),
            review(score),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation { ref field, .. } if field == "score"));
    }
    assert_eq!(rating_of(&ctx, title_id).await, None);
}

#[tokio::test]
async fn test_review_of_other_title_is_not_found() {
    let ctx = test_context();
    let alice = seed_user(&ctx.repo, "alice", Role::Regular);
    let first = seed_title(&ctx).await;
    let second = seed_title(&ctx).await;
    let (_, Json(created)) =
        reviews::create_review(identity(&alice), State(ctx.state.clone()), Path(first), review(5))
            .await
            .unwrap();

    let err = reviews::get_review(State(ctx.state.clone()), Path((second, created.id)))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::NotFound(_)));
}
