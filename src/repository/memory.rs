use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use super::Repository;
use crate::{
    codes::ConfirmationCodeStore,
    error::AppError,
    models::{
        Category, Comment, ConfirmationCode, Genre, NewUser, Review, SlugEntryRequest, Title,
        TitleFilter, TitleWrite, UpdateReviewRequest, UpdateUserRequest, User,
    },
    rating::{DUPLICATE_REVIEW, mean_rating},
};

#[derive(Clone)]
struct TitleRecord {
    name: String,
    year: i32,
    description: Option<String>,
    category_id: Option<i64>,
    genre_ids: Vec<i64>,
    rating: Option<i32>,
}

#[derive(Clone)]
struct ReviewRecord {
    title_id: i64,
    author_id: Uuid,
    text: String,
    score: i16,
    pub_date: DateTime<Utc>,
}

#[derive(Clone)]
struct CommentRecord {
    review_id: i64,
    author_id: Uuid,
    text: String,
    pub_date: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    codes: HashMap<Uuid, ConfirmationCode>,
    categories: BTreeMap<i64, Category>,
    genres: BTreeMap<i64, Genre>,
    titles: BTreeMap<i64, TitleRecord>,
    reviews: BTreeMap<i64, ReviewRecord>,
    comments: BTreeMap<i64, CommentRecord>,
    next_id: i64,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn username_of(&self, id: Uuid) -> String {
        self.users
            .get(&id)
            .map(|user| user.username.clone())
            .unwrap_or_default()
    }

    fn review(&self, id: i64, record: &ReviewRecord) -> Review {
        Review {
            id,
            title_id: record.title_id,
            author_id: record.author_id,
            author: self.username_of(record.author_id),
            text: record.text.clone(),
            score: record.score,
            pub_date: record.pub_date,
        }
    }

    fn comment(&self, id: i64, record: &CommentRecord) -> Comment {
        Comment {
            id,
            review_id: record.review_id,
            author_id: record.author_id,
            author: self.username_of(record.author_id),
            text: record.text.clone(),
            pub_date: record.pub_date,
        }
    }

    fn title(&self, id: i64, record: &TitleRecord) -> Title {
        let mut genre: Vec<Genre> = record
            .genre_ids
            .iter()
            .filter_map(|genre_id| self.genres.get(genre_id).cloned())
            .collect();
        genre.sort_by(|a, b| a.name.cmp(&b.name));
        Title {
            id,
            name: record.name.clone(),
            year: record.year,
            rating: record.rating,
            description: record.description.clone(),
            genre,
            category: record
                .category_id
                .and_then(|category_id| self.categories.get(&category_id).cloned()),
        }
    }

    fn recompute_rating(&mut self, title_id: i64) {
        let rating = mean_rating(
            self.reviews
                .values()
                .filter(|review| review.title_id == title_id)
                .map(|review| review.score),
        );
        if let Some(title) = self.titles.get_mut(&title_id) {
            title.rating = rating;
        }
    }

    fn check_user_unique(
        &self,
        id: Option<Uuid>,
        username: &str,
        email: &str,
    ) -> Result<(), AppError> {
        let others = || self.users.values().filter(move |user| Some(user.id) != id);
        if others().any(|user| user.username == username) {
            return Err(AppError::validation(
                "username",
                "a user with that username already exists",
            ));
        }
        if others().any(|user| user.email == email) {
            return Err(AppError::validation(
                "email",
                "a user with that email already exists",
            ));
        }
        Ok(())
    }

    /// Removes a review together with its comments.
    fn remove_review(&mut self, review_id: i64) -> Option<ReviewRecord> {
        let removed = self.reviews.remove(&review_id)?;
        self.comments.retain(|_, comment| comment.review_id != review_id);
        Some(removed)
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Genre links form a set, as the `genre_title` primary key enforces in SQL.
fn distinct_ids(mut ids: Vec<i64>) -> Vec<i64> {
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// InMemoryRepository
///
/// A `Repository` kept entirely in process memory, used by the test suite. All state
/// sits behind one mutex, so every operation (including the review check-insert-rate
/// sequence) is atomic with respect to every other.
#[derive(Default)]
pub struct InMemoryRepository {
    state: Mutex<MemoryState>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts a fully formed user (e.g. a superuser) without going through validation.
    pub fn seed_user(&self, user: User) {
        self.lock().users.insert(user.id, user);
    }

    /// Number of stored confirmation-code records.
    pub fn confirmation_code_count(&self) -> usize {
        self.lock().codes.len()
    }
}

#[async_trait]
impl ConfirmationCodeStore for InMemoryRepository {
    async fn put_confirmation_code(
        &self,
        user_id: Uuid,
        code: &str,
        expiration: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.lock().codes.insert(
            user_id,
            ConfirmationCode {
                user_id,
                code: code.to_string(),
                expiration,
            },
        );
        Ok(())
    }

    async fn get_confirmation_code(
        &self,
        user_id: Uuid,
    ) -> Result<Option<ConfirmationCode>, AppError> {
        Ok(self.lock().codes.get(&user_id).cloned())
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, AppError> {
        Ok(self.lock().users.get(&id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        Ok(self
            .lock()
            .users
            .values()
            .find(|user| user.username == username)
            .cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        Ok(self
            .lock()
            .users
            .values()
            .find(|user| user.email == email)
            .cloned())
    }

    async fn list_users(&self, search: Option<String>) -> Result<Vec<User>, AppError> {
        let state = self.lock();
        let mut users: Vec<User> = state
            .users
            .values()
            .filter(|user| search.as_deref().is_none_or(|s| contains_ci(&user.username, s)))
            .cloned()
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    async fn create_user(&self, user: NewUser, joined_at: DateTime<Utc>) -> Result<User, AppError> {
        let mut state = self.lock();
        state.check_user_unique(None, &user.username, &user.email)?;
        let created = User {
            id: Uuid::new_v4(),
            username: user.username,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            bio: user.bio,
            role: user.role,
            is_superuser: false,
            last_login: None,
            date_joined: joined_at,
        };
        state.users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_user(
        &self,
        id: Uuid,
        changes: UpdateUserRequest,
    ) -> Result<Option<User>, AppError> {
        let mut state = self.lock();
        let Some(current) = state.users.get(&id).cloned() else {
            return Ok(None);
        };
        let username = changes.username.unwrap_or(current.username);
        let email = changes.email.unwrap_or(current.email);
        state.check_user_unique(Some(id), &username, &email)?;

        let updated = User {
            username,
            email,
            first_name: changes.first_name.unwrap_or(current.first_name),
            last_name: changes.last_name.unwrap_or(current.last_name),
            bio: changes.bio.or(current.bio),
            role: changes.role.unwrap_or(current.role),
            ..current
        };
        state.users.insert(id, updated.clone());
        Ok(Some(updated))
    }

    async fn delete_user(&self, username: &str) -> Result<bool, AppError> {
        let mut state = self.lock();
        let Some(id) = state
            .users
            .values()
            .find(|user| user.username == username)
            .map(|user| user.id)
        else {
            return Ok(false);
        };
        state.users.remove(&id);
        state.codes.remove(&id);
        state.comments.retain(|_, comment| comment.author_id != id);

        let authored: Vec<(i64, i64)> = state
            .reviews
            .iter()
            .filter(|(_, review)| review.author_id == id)
            .map(|(review_id, review)| (*review_id, review.title_id))
            .collect();
        for (review_id, title_id) in authored {
            state.remove_review(review_id);
            state.recompute_rating(title_id);
        }
        Ok(true)
    }

    async fn touch_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        if let Some(user) = self.lock().users.get_mut(&id) {
            user.last_login = Some(at);
        }
        Ok(())
    }

    async fn list_categories(&self, search: Option<String>) -> Result<Vec<Category>, AppError> {
        let state = self.lock();
        let mut categories: Vec<Category> = state
            .categories
            .values()
            .filter(|c| search.as_deref().is_none_or(|s| contains_ci(&c.name, s)))
            .cloned()
            .collect();
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(categories)
    }

    async fn get_category_by_slug(&self, slug: &str) -> Result<Option<Category>, AppError> {
        Ok(self
            .lock()
            .categories
            .values()
            .find(|c| c.slug == slug)
            .cloned())
    }

    async fn create_category(&self, req: SlugEntryRequest) -> Result<Category, AppError> {
        let mut state = self.lock();
        if state.categories.values().any(|c| c.slug == req.slug) {
            return Err(AppError::validation("slug", "this slug is already in use"));
        }
        let category = Category {
            id: state.next_id(),
            name: req.name,
            slug: req.slug,
        };
        state.categories.insert(category.id, category.clone());
        Ok(category)
    }

    async fn delete_category(&self, slug: &str) -> Result<bool, AppError> {
        let mut state = self.lock();
        let Some(id) = state
            .categories
            .values()
            .find(|c| c.slug == slug)
            .map(|c| c.id)
        else {
            return Ok(false);
        };
        state.categories.remove(&id);
        for title in state.titles.values_mut() {
            if title.category_id == Some(id) {
                title.category_id = None;
            }
        }
        Ok(true)
    }

    async fn list_genres(&self, search: Option<String>) -> Result<Vec<Genre>, AppError> {
        let state = self.lock();
        let mut genres: Vec<Genre> = state
            .genres
            .values()
            .filter(|g| search.as_deref().is_none_or(|s| contains_ci(&g.name, s)))
            .cloned()
            .collect();
        genres.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(genres)
    }

    async fn get_genre_by_slug(&self, slug: &str) -> Result<Option<Genre>, AppError> {
        Ok(self
            .lock()
            .genres
            .values()
            .find(|g| g.slug == slug)
            .cloned())
    }

    async fn create_genre(&self, req: SlugEntryRequest) -> Result<Genre, AppError> {
        let mut state = self.lock();
        if state.genres.values().any(|g| g.slug == req.slug) {
            return Err(AppError::validation("slug", "this slug is already in use"));
        }
        let genre = Genre {
            id: state.next_id(),
            name: req.name,
            slug: req.slug,
        };
        state.genres.insert(genre.id, genre.clone());
        Ok(genre)
    }

    async fn delete_genre(&self, slug: &str) -> Result<bool, AppError> {
        let mut state = self.lock();
        let Some(id) = state.genres.values().find(|g| g.slug == slug).map(|g| g.id) else {
            return Ok(false);
        };
        state.genres.remove(&id);
        for title in state.titles.values_mut() {
            title.genre_ids.retain(|genre_id| *genre_id != id);
        }
        Ok(true)
    }

    async fn list_titles(&self, filter: TitleFilter) -> Result<Vec<Title>, AppError> {
        let state = self.lock();
        let mut titles: Vec<Title> = state
            .titles
            .iter()
            .map(|(id, record)| state.title(*id, record))
            .filter(|title| {
                filter.category.as_deref().is_none_or(|slug| {
                    title.category.as_ref().is_some_and(|c| c.slug == slug)
                })
            })
            .filter(|title| {
                filter
                    .genre
                    .as_deref()
                    .is_none_or(|slug| title.genre.iter().any(|g| g.slug == slug))
            })
            .filter(|title| {
                filter
                    .name
                    .as_deref()
                    .is_none_or(|name| contains_ci(&title.name, name))
            })
            .filter(|title| filter.year.is_none_or(|year| title.year == year))
            .collect();
        titles.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(titles)
    }

    async fn get_title(&self, id: i64) -> Result<Option<Title>, AppError> {
        let state = self.lock();
        Ok(state.titles.get(&id).map(|record| state.title(id, record)))
    }

    async fn create_title(&self, write: TitleWrite) -> Result<Title, AppError> {
        let mut state = self.lock();
        let id = state.next_id();
        let record = TitleRecord {
            name: write.name,
            year: write.year,
            description: write.description,
            category_id: write.category_id,
            genre_ids: distinct_ids(write.genre_ids),
            rating: None,
        };
        let title = state.title(id, &record);
        state.titles.insert(id, record);
        Ok(title)
    }

    async fn update_title(&self, id: i64, write: TitleWrite) -> Result<Option<Title>, AppError> {
        let mut state = self.lock();
        let Some(rating) = state.titles.get(&id).map(|record| record.rating) else {
            return Ok(None);
        };
        let record = TitleRecord {
            name: write.name,
            year: write.year,
            description: write.description,
            category_id: write.category_id,
            genre_ids: distinct_ids(write.genre_ids),
            rating,
        };
        let title = state.title(id, &record);
        state.titles.insert(id, record);
        Ok(Some(title))
    }

    async fn delete_title(&self, id: i64) -> Result<bool, AppError> {
        let mut state = self.lock();
        if state.titles.remove(&id).is_none() {
            return Ok(false);
        }
        let reviews: Vec<i64> = state
            .reviews
            .iter()
            .filter(|(_, review)| review.title_id == id)
            .map(|(review_id, _)| *review_id)
            .collect();
        for review_id in reviews {
            state.remove_review(review_id);
        }
        Ok(true)
    }

    async fn list_reviews(&self, title_id: i64) -> Result<Vec<Review>, AppError> {
        let state = self.lock();
        let mut reviews: Vec<Review> = state
            .reviews
            .iter()
            .filter(|(_, review)| review.title_id == title_id)
            .map(|(id, record)| state.review(*id, record))
            .collect();
        reviews.sort_by(|a, b| a.pub_date.cmp(&b.pub_date).then(a.id.cmp(&b.id)));
        Ok(reviews)
    }

    async fn get_review(&self, title_id: i64, review_id: i64) -> Result<Option<Review>, AppError> {
        let state = self.lock();
        Ok(state
            .reviews
            .get(&review_id)
            .filter(|review| review.title_id == title_id)
            .map(|record| state.review(review_id, record)))
    }

    async fn create_review(
        &self,
        title_id: i64,
        author_id: Uuid,
        text: String,
        score: i16,
        at: DateTime<Utc>,
    ) -> Result<Review, AppError> {
        let mut state = self.lock();
        if !state.titles.contains_key(&title_id) {
            return Err(AppError::not_found("title"));
        }
        if state
            .reviews
            .values()
            .any(|review| review.title_id == title_id && review.author_id == author_id)
        {
            return Err(AppError::Conflict(DUPLICATE_REVIEW.to_string()));
        }

        let id = state.next_id();
        let record = ReviewRecord {
            title_id,
            author_id,
            text,
            score,
            pub_date: at,
        };
        let review = state.review(id, &record);
        state.reviews.insert(id, record);
        state.recompute_rating(title_id);
        Ok(review)
    }

    async fn update_review(
        &self,
        title_id: i64,
        review_id: i64,
        changes: UpdateReviewRequest,
    ) -> Result<Option<Review>, AppError> {
        let mut state = self.lock();
        let Some(record) = state
            .reviews
            .get_mut(&review_id)
            .filter(|review| review.title_id == title_id)
        else {
            return Ok(None);
        };
        if let Some(text) = changes.text {
            record.text = text;
        }
        if let Some(score) = changes.score {
            record.score = score;
        }
        let record = record.clone();
        state.recompute_rating(title_id);
        Ok(Some(state.review(review_id, &record)))
    }

    async fn delete_review(&self, title_id: i64, review_id: i64) -> Result<bool, AppError> {
        let mut state = self.lock();
        let belongs = state
            .reviews
            .get(&review_id)
            .is_some_and(|review| review.title_id == title_id);
        if !belongs {
            return Ok(false);
        }
        state.remove_review(review_id);
        state.recompute_rating(title_id);
        Ok(true)
    }

    async fn list_comments(&self, review_id: i64) -> Result<Vec<Comment>, AppError> {
        let state = self.lock();
        let mut comments: Vec<Comment> = state
            .comments
            .iter()
            .filter(|(_, comment)| comment.review_id == review_id)
            .map(|(id, record)| state.comment(*id, record))
            .collect();
        comments.sort_by(|a, b| a.pub_date.cmp(&b.pub_date).then(a.id.cmp(&b.id)));
        Ok(comments)
    }

    async fn get_comment(
        &self,
        review_id: i64,
        comment_id: i64,
    ) -> Result<Option<Comment>, AppError> {
        let state = self.lock();
        Ok(state
            .comments
            .get(&comment_id)
            .filter(|comment| comment.review_id == review_id)
            .map(|record| state.comment(comment_id, record)))
    }

    async fn create_comment(
        &self,
        review_id: i64,
        author_id: Uuid,
        text: String,
        at: DateTime<Utc>,
    ) -> Result<Comment, AppError> {
        let mut state = self.lock();
        if !state.reviews.contains_key(&review_id) {
            return Err(AppError::not_found("review"));
        }
        let id = state.next_id();
        let record = CommentRecord {
            review_id,
            author_id,
            text,
            pub_date: at,
        };
        let comment = state.comment(id, &record);
        state.comments.insert(id, record);
        Ok(comment)
    }

    async fn update_comment(
        &self,
        review_id: i64,
        comment_id: i64,
        text: String,
    ) -> Result<Option<Comment>, AppError> {
        let mut state = self.lock();
        let Some(record) = state
            .comments
            .get_mut(&comment_id)
            .filter(|comment| comment.review_id == review_id)
        else {
            return Ok(None);
        };
        record.text = text;
        let record = record.clone();
        Ok(Some(state.comment(comment_id, &record)))
    }

    async fn delete_comment(&self, review_id: i64, comment_id: i64) -> Result<bool, AppError> {
        let mut state = self.lock();
        let belongs = state
            .comments
            .get(&comment_id)
            .is_some_and(|comment| comment.review_id == review_id);
        if belongs {
            state.comments.remove(&comment_id);
        }
        Ok(belongs)
    }
}
