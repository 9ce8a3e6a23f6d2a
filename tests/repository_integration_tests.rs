use chrono::{Duration, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use tokio::test;
use uuid::Uuid;
use yamdb_api::{
    AppError,
    codes::ConfirmationCodeStore,
    models::{NewUser, Role, SlugEntryRequest, Title, TitleWrite, UpdateReviewRequest, User},
    repository::{PostgresRepository, Repository},
};

// --- Test Context and Setup ---

/// Holds the database pool for tests that run against a real Postgres.
struct DbTestContext {
    pool: PgPool,
}

impl DbTestContext {
    async fn setup() -> Self {
        dotenv::dotenv().ok();

        let db_url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set to run integration tests");

        let pool = PgPool::connect(&db_url)
            .await
            .expect("Failed to connect to database for integration tests.");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run database migrations.");

        DbTestContext { pool }
    }

    fn repository(&self) -> PostgresRepository {
        PostgresRepository::new(self.pool.clone())
    }
}

// --- Test Data Helpers ---

/// The database is shared between runs, so every name carries a fresh suffix.
fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", &Uuid::new_v4().simple().to_string()[..12])
}

async fn create_test_user(repo: &PostgresRepository, role: Role) -> User {
    let username = unique("user");
    repo.create_user(
        NewUser {
            email: format!("{username}@example.com"),
            username,
            role,
            ..NewUser::default()
        },
        Utc::now(),
    )
    .await
    .expect("Failed to create test user")
}

async fn create_test_title(repo: &PostgresRepository, genre_ids: Vec<i64>) -> Title {
    repo.create_title(TitleWrite {
        name: unique("title"),
        year: 1975,
        genre_ids,
        ..TitleWrite::default()
    })
    .await
    .expect("Failed to create test title")
}

async fn rating_of(repo: &PostgresRepository, title_id: i64) -> Option<i32> {
    repo.get_title(title_id)
        .await
        .unwrap()
        .expect("title should exist")
        .rating
}

// --- Tests ---

#[test]
async fn test_rating_follows_review_lifecycle() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let alice = create_test_user(&repo, Role::Regular).await;
    let bob = create_test_user(&repo, Role::Regular).await;
    let title = create_test_title(&repo, vec![]).await;
    assert_eq!(title.rating, None);

    let alice_review = repo
        .create_review(title.id, alice.id, "slow".into(), 8, Utc::now())
        .await
        .unwrap();
    assert_eq!(rating_of(&repo, title.id).await, Some(8));

    repo.create_review(title.id, bob.id, "fine".into(), 6, Utc::now())
        .await
        .unwrap();
    assert_eq!(rating_of(&repo, title.id).await, Some(7));

    let err = repo
        .create_review(title.id, alice.id, "again".into(), 1, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert_eq!(rating_of(&repo, title.id).await, Some(7));

    let updated = repo
        .update_review(
            title.id,
            alice_review.id,
            UpdateReviewRequest {
                score: Some(10),
                ..UpdateReviewRequest::default()
            },
        )
        .await
        .unwrap()
        .expect("review should exist");
    assert_eq!(updated.score, 10);
    assert_eq!(rating_of(&repo, title.id).await, Some(8));
}

#[test]
async fn test_rating_is_null_after_last_delete() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let alice = create_test_user(&repo, Role::Regular).await;
    let title = create_test_title(&repo, vec![]).await;

    let review = repo
        .create_review(title.id, alice.id, "brief".into(), 4, Utc::now())
        .await
        .unwrap();
    assert_eq!(rating_of(&repo, title.id).await, Some(4));

    assert!(repo.delete_review(title.id, review.id).await.unwrap());
    assert_eq!(rating_of(&repo, title.id).await, None);
    assert!(!repo.delete_review(title.id, review.id).await.unwrap());
}

#[test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_reviews_yield_one_success() {
    let ctx = DbTestContext::setup().await;
    let repo = Arc::new(ctx.repository());
    let alice = create_test_user(&repo, Role::Regular).await;
    let title = create_test_title(&repo, vec![]).await;

    let attempts: Vec<_> = (0..8)
        .map(|i| {
            let repo = repo.clone();
            let (title_id, author_id) = (title.id, alice.id);
            tokio::spawn(async move {
                repo.create_review(title_id, author_id, format!("take {i}"), 5, Utc::now())
                    .await
            })
        })
        .collect();

    let mut successes = 0;
    let mut conflicts = 0;
    for handle in attempts {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(AppError::Conflict(_)) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(conflicts, 7);
    assert_eq!(repo.list_reviews(title.id).await.unwrap().len(), 1);
    assert_eq!(rating_of(&repo, title.id).await, Some(5));
}

#[test]
async fn test_review_on_missing_title_is_not_found() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let alice = create_test_user(&repo, Role::Regular).await;

    let err = repo
        .create_review(i64::MAX, alice.id, "void".into(), 5, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[test]
async fn test_deleting_author_rerates_their_titles() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let alice = create_test_user(&repo, Role::Regular).await;
    let bob = create_test_user(&repo, Role::Regular).await;
    let title = create_test_title(&repo, vec![]).await;

    repo.create_review(title.id, alice.id, "weak".into(), 2, Utc::now())
        .await
        .unwrap();
    repo.create_review(title.id, bob.id, "great".into(), 9, Utc::now())
        .await
        .unwrap();
    assert_eq!(rating_of(&repo, title.id).await, Some(6));

    assert!(repo.delete_user(&alice.username).await.unwrap());
    assert_eq!(rating_of(&repo, title.id).await, Some(9));
    assert_eq!(repo.list_reviews(title.id).await.unwrap().len(), 1);
}

#[test]
async fn test_confirmation_code_overwrite_keeps_one_row() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let alice = create_test_user(&repo, Role::Regular).await;
    let now = Utc::now();

    repo.put_confirmation_code(alice.id, "first", now + Duration::minutes(5))
        .await
        .unwrap();
    repo.put_confirmation_code(alice.id, "second", now + Duration::minutes(15))
        .await
        .unwrap();

    let stored = repo
        .get_confirmation_code(alice.id)
        .await
        .unwrap()
        .expect("code should be stored");
    assert_eq!(stored.code, "second");
    assert!(stored.expiration > now + Duration::minutes(10));

    let rows: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM confirmation_codes WHERE user_id = $1")
            .bind(alice.id)
            .fetch_one(&ctx.pool)
            .await
            .unwrap();
    assert_eq!(rows, 1);
}

#[test]
async fn test_unique_violations_map_to_field_errors() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let alice = create_test_user(&repo, Role::Regular).await;

    let err = repo
        .create_user(
            NewUser {
                username: alice.username.clone(),
                email: format!("{}@example.com", unique("other")),
                ..NewUser::default()
            },
            Utc::now(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { ref field, .. } if field == "username"));

    let err = repo
        .create_user(
            NewUser {
                username: unique("other"),
                email: alice.email.clone(),
                ..NewUser::default()
            },
            Utc::now(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { ref field, .. } if field == "email"));

    let slug = unique("g");
    let entry = || SlugEntryRequest {
        name: "Drama".into(),
        slug: slug.clone(),
    };
    repo.create_genre(entry()).await.unwrap();
    let err = repo.create_genre(entry()).await.unwrap_err();
    assert!(matches!(err, AppError::Validation { ref field, .. } if field == "slug"));
}

#[test]
async fn test_repeated_genre_ids_are_linked_once() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let genre = repo
        .create_genre(SlugEntryRequest {
            name: "Drama".into(),
            slug: unique("g"),
        })
        .await
        .unwrap();

    let title = create_test_title(&repo, vec![genre.id, genre.id]).await;
    assert_eq!(title.genre.len(), 1);
    assert_eq!(title.genre[0].slug, genre.slug);

    let updated = repo
        .update_title(
            title.id,
            TitleWrite {
                name: title.name.clone(),
                year: title.year,
                genre_ids: vec![genre.id, genre.id, genre.id],
                ..TitleWrite::default()
            },
        )
        .await
        .unwrap()
        .expect("title should exist");
    assert_eq!(updated.genre.len(), 1);
}
