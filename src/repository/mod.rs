use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    codes::ConfirmationCodeStore,
    error::AppError,
    models::{
        Category, Comment, Genre, NewUser, Review, SlugEntryRequest, Title, TitleFilter,
        TitleWrite, UpdateReviewRequest, UpdateUserRequest, User,
    },
};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryRepository;
pub use postgres::PostgresRepository;

/// Repository Trait
///
/// Defines the abstract contract for all persistence operations, so handlers and
/// services never know whether they talk to Postgres or to the in-memory store.
///
/// Review writes carry the one-review-per-(title, author) rule and the title rating
/// recomputation: an implementation must run the existence check, the write and the
/// rating update as one atomic unit per title.
///
/// **Send + Sync + async_trait** are required to make the trait object (`Arc<dyn Repository>`)
/// safely shareable across Axum's asynchronous task boundaries.
#[async_trait]
pub trait Repository: ConfirmationCodeStore + Send + Sync {
    // --- Users ---
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, AppError>;
    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, AppError>;
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, AppError>;
    // Ordered by username; `search` is a case-insensitive substring of the username.
    async fn list_users(&self, search: Option<String>) -> Result<Vec<User>, AppError>;
    // Fails with a field-level validation error when username or email is taken.
    async fn create_user(&self, user: NewUser, joined_at: DateTime<Utc>) -> Result<User, AppError>;
    // Applies only the `Some` fields. `changes.role` is written as given; callers strip it.
    async fn update_user(
        &self,
        id: Uuid,
        changes: UpdateUserRequest,
    ) -> Result<Option<User>, AppError>;
    // Also recomputes the rating of every title the user had reviewed.
    async fn delete_user(&self, username: &str) -> Result<bool, AppError>;
    async fn touch_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AppError>;

    // --- Catalog ---
    async fn list_categories(&self, search: Option<String>) -> Result<Vec<Category>, AppError>;
    async fn get_category_by_slug(&self, slug: &str) -> Result<Option<Category>, AppError>;
    async fn create_category(&self, req: SlugEntryRequest) -> Result<Category, AppError>;
    async fn delete_category(&self, slug: &str) -> Result<bool, AppError>;

    async fn list_genres(&self, search: Option<String>) -> Result<Vec<Genre>, AppError>;
    async fn get_genre_by_slug(&self, slug: &str) -> Result<Option<Genre>, AppError>;
    async fn create_genre(&self, req: SlugEntryRequest) -> Result<Genre, AppError>;
    async fn delete_genre(&self, slug: &str) -> Result<bool, AppError>;

    async fn list_titles(&self, filter: TitleFilter) -> Result<Vec<Title>, AppError>;
    async fn get_title(&self, id: i64) -> Result<Option<Title>, AppError>;
    async fn create_title(&self, write: TitleWrite) -> Result<Title, AppError>;
    // Replaces every writable field; `rating` is left untouched.
    async fn update_title(&self, id: i64, write: TitleWrite) -> Result<Option<Title>, AppError>;
    async fn delete_title(&self, id: i64) -> Result<bool, AppError>;

    // --- Reviews (integrity-guarded) ---
    async fn list_reviews(&self, title_id: i64) -> Result<Vec<Review>, AppError>;
    async fn get_review(&self, title_id: i64, review_id: i64) -> Result<Option<Review>, AppError>;
    // NotFound when the title is missing, Conflict when the author already reviewed it.
    async fn create_review(
        &self,
        title_id: i64,
        author_id: Uuid,
        text: String,
        score: i16,
        at: DateTime<Utc>,
    ) -> Result<Review, AppError>;
    async fn update_review(
        &self,
        title_id: i64,
        review_id: i64,
        changes: UpdateReviewRequest,
    ) -> Result<Option<Review>, AppError>;
    async fn delete_review(&self, title_id: i64, review_id: i64) -> Result<bool, AppError>;

    // --- Comments ---
    async fn list_comments(&self, review_id: i64) -> Result<Vec<Comment>, AppError>;
    async fn get_comment(&self, review_id: i64, comment_id: i64)
    -> Result<Option<Comment>, AppError>;
    async fn create_comment(
        &self,
        review_id: i64,
        author_id: Uuid,
        text: String,
        at: DateTime<Utc>,
    ) -> Result<Comment, AppError>;
    async fn update_comment(
        &self,
        review_id: i64,
        comment_id: i64,
        text: String,
    ) -> Result<Option<Comment>, AppError>;
    async fn delete_comment(&self, review_id: i64, comment_id: i64) -> Result<bool, AppError>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer access across the application state.
pub type RepositoryState = Arc<dyn Repository>;
