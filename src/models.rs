use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

// --- Identity ---

/// Role
///
/// The closed set of roles consumed by the authorization rules. Stored as text
/// (`user`, `moderator`, `admin`). Parsing from text also takes `regular` for `user`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Role {
    #[default]
    #[serde(rename = "user")]
    Regular,
    Moderator,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Regular => "user",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
        }
    }

    /// Unrestricted write authority, including catalog and role management.
    pub fn is_admin(self) -> bool {
        match self {
            Role::Admin => true,
            Role::Moderator | Role::Regular => false,
        }
    }

    /// Write authority over any review or comment.
    pub fn can_moderate(self) -> bool {
        match self {
            Role::Admin | Role::Moderator => true,
            Role::Regular => false,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" | "regular" => Ok(Role::Regular),
            "moderator" => Ok(Role::Moderator),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// User
///
/// The canonical identity record stored in the `users` table.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub bio: Option<String>,
    // Stored as text, decoded through `TryFrom<String>`.
    #[sqlx(try_from = "String")]
    pub role: Role,
    // Superusers are admins whatever their stored role says.
    pub is_superuser: bool,
    #[ts(type = "string | null")]
    pub last_login: Option<DateTime<Utc>>,
    #[ts(type = "string")]
    pub date_joined: DateTime<Utc>,
}

impl User {
    /// The role the authorization rules act on.
    pub fn effective_role(&self) -> Role {
        if self.is_superuser {
            Role::Admin
        } else {
            self.role
        }
    }
}

/// UserProfile
///
/// Public representation of a user record (users collection and `/users/me`).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[ts(export)]
pub struct UserProfile {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub bio: Option<String>,
    pub role: Role,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            username: user.username,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            bio: user.bio,
            role: user.role,
        }
    }
}

/// NewUser
///
/// Insert payload handed to the repository once every field has been validated.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub bio: Option<String>,
    pub role: Role,
}

/// CreateUserRequest
///
/// Admin payload for `POST /users`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub role: Role,
}

/// UpdateUserRequest
///
/// Partial update of a user record. `role` is only honoured for admin callers.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateUserRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

// --- Confirmation-code authentication ---

/// ConfirmationCode
///
/// At most one row per user (`user_id` is the key). Expired rows are kept; expiry is
/// decided by comparing `expiration` with the clock.
#[derive(Debug, Clone, FromRow, PartialEq)]
pub struct ConfirmationCode {
    pub user_id: Uuid,
    pub code: String,
    pub expiration: DateTime<Utc>,
}

impl ConfirmationCode {
    /// True when `submitted` matches exactly and `now` is at or before the expiration.
    pub fn accepts(&self, submitted: &str, now: DateTime<Utc>) -> bool {
        self.code == submitted && now <= self.expiration
    }
}

/// SignupRequest
///
/// Payload for `POST /auth/signup`. Echoed back on success.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[ts(export)]
pub struct SignupRequest {
    pub username: String,
    pub email: String,
}

/// TokenRequest
///
/// Payload for `POST /auth/token`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct TokenRequest {
    pub username: String,
    pub confirmation_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct TokenResponse {
    pub token: String,
}

// --- Catalog ---

/// Category
///
/// A catalog grouping addressed by its slug.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct Category {
    #[serde(skip)]
    pub id: i64,
    pub name: String,
    pub slug: String,
}

/// Genre
///
/// Same shape as [`Category`]; a title may carry several genres.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct Genre {
    #[serde(skip)]
    pub id: i64,
    pub name: String,
    pub slug: String,
}

/// SlugEntryRequest
///
/// Create payload shared by categories and genres.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct SlugEntryRequest {
    pub name: String,
    pub slug: String,
}

/// Title
///
/// Read representation of a catalog item. `rating` is the rounded mean of its review
/// scores and is `null` while the title has no reviews.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[ts(export)]
pub struct Title {
    pub id: i64,
    pub name: String,
    pub year: i32,
    pub rating: Option<i32>,
    pub description: Option<String>,
    pub genre: Vec<Genre>,
    pub category: Option<Category>,
}

/// TitleFilter
///
/// Query parameters accepted by `GET /titles`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, utoipa::IntoParams)]
pub struct TitleFilter {
    /// Category slug.
    pub category: Option<String>,
    /// Genre slug.
    pub genre: Option<String>,
    /// Case-insensitive substring of the title name.
    pub name: Option<String>,
    pub year: Option<i32>,
}

/// SearchFilter
///
/// `?search=` on categories, genres (by name) and users (by username).
#[derive(Debug, Clone, Serialize, Deserialize, Default, utoipa::IntoParams)]
pub struct SearchFilter {
    pub search: Option<String>,
}

/// CreateTitleRequest
///
/// Write payload; genres and category are referenced by slug.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateTitleRequest {
    pub name: String,
    pub year: i32,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub genre: Vec<String>,
    pub category: String,
}

/// UpdateTitleRequest
///
/// Partial update payload for `PATCH /titles/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateTitleRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// TitleWrite
///
/// A title write with slugs already resolved to ids.
#[derive(Debug, Clone, Default)]
pub struct TitleWrite {
    pub name: String,
    pub year: i32,
    pub description: Option<String>,
    pub genre_ids: Vec<i64>,
    pub category_id: Option<i64>,
}

// --- Reviews & comments ---

/// Review
///
/// One user's scored review of a title. `(title_id, author_id)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct Review {
    pub id: i64,
    #[serde(skip)]
    pub title_id: i64,
    #[serde(skip)]
    pub author_id: Uuid,
    // Author's username, loaded via a JOIN.
    pub author: String,
    pub text: String,
    pub score: i16,
    #[ts(type = "string")]
    pub pub_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateReviewRequest {
    pub text: String,
    pub score: i16,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateReviewRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<i16>,
}

/// Comment
///
/// A comment on a review. No uniqueness rule.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct Comment {
    pub id: i64,
    #[serde(skip)]
    pub review_id: i64,
    #[serde(skip)]
    pub author_id: Uuid,
    pub author: String,
    pub text: String,
    #[ts(type = "string")]
    pub pub_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CommentRequest {
    pub text: String,
}
