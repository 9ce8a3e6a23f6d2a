use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, PgPool, Postgres, query_builder::QueryBuilder};
use std::collections::HashMap;
use uuid::Uuid;

use super::Repository;
use crate::{
    codes::ConfirmationCodeStore,
    error::AppError,
    models::{
        Category, Comment, ConfirmationCode, Genre, NewUser, Review, SlugEntryRequest, Title,
        TitleFilter, TitleWrite, UpdateReviewRequest, UpdateUserRequest, User,
    },
    rating::DUPLICATE_REVIEW,
};

const USER_COLUMNS: &str =
    "id, username, email, first_name, last_name, bio, role, is_superuser, last_login, date_joined";

const REVIEW_SELECT: &str = r#"
    SELECT r.id, r.title_id, r.author_id, u.username AS author, r.text, r.score, r.pub_date
    FROM reviews r JOIN users u ON u.id = r.author_id
"#;

const COMMENT_SELECT: &str = r#"
    SELECT c.id, c.review_id, c.author_id, u.username AS author, c.text, c.pub_date
    FROM comments c JOIN users u ON u.id = c.author_id
"#;

const TITLE_SELECT: &str = r#"
    SELECT t.id, t.name, t.year, t.rating, t.description,
           c.id AS category_id, c.name AS category_name, c.slug AS category_slug
    FROM titles t LEFT JOIN categories c ON c.id = t.category_id
"#;

/// A `titles` row joined with its (optional) category.
#[derive(FromRow)]
struct TitleRow {
    id: i64,
    name: String,
    year: i32,
    rating: Option<i32>,
    description: Option<String>,
    category_id: Option<i64>,
    category_name: Option<String>,
    category_slug: Option<String>,
}

/// A genre attached to a title through `genre_title`.
#[derive(FromRow)]
struct GenreLink {
    title_id: i64,
    id: i64,
    name: String,
    slug: String,
}

/// PostgresRepository
///
/// The concrete implementation of the `Repository` trait, backed by PostgreSQL.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Attaches genres to title rows with one extra query.
    async fn hydrate_titles(&self, rows: Vec<TitleRow>) -> Result<Vec<Title>, AppError> {
        let ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
        let links = sqlx::query_as::<_, GenreLink>(
            r#"
            SELECT gt.title_id, g.id, g.name, g.slug
            FROM genre_title gt JOIN genres g ON g.id = gt.genre_id
            WHERE gt.title_id = ANY($1)
            ORDER BY g.name
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut genres: HashMap<i64, Vec<Genre>> = HashMap::new();
        for link in links {
            genres.entry(link.title_id).or_default().push(Genre {
                id: link.id,
                name: link.name,
                slug: link.slug,
            });
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let category = match (row.category_id, row.category_name, row.category_slug) {
                    (Some(id), Some(name), Some(slug)) => Some(Category { id, name, slug }),
                    _ => None,
                };
                Title {
                    genre: genres.remove(&row.id).unwrap_or_default(),
                    id: row.id,
                    name: row.name,
                    year: row.year,
                    rating: row.rating,
                    description: row.description,
                    category,
                }
            })
            .collect())
    }
}

/// Locks the title row for the rest of the transaction. `false` when it does not exist.
async fn lock_title(conn: &mut PgConnection, title_id: i64) -> Result<bool, sqlx::Error> {
    let locked: Option<i64> = sqlx::query_scalar("SELECT id FROM titles WHERE id = $1 FOR UPDATE")
        .bind(title_id)
        .fetch_optional(conn)
        .await?;
    Ok(locked.is_some())
}

/// Rewrites `titles.rating` from the reviews visible to the current transaction.
async fn recompute_rating(conn: &mut PgConnection, title_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE titles
        SET rating = (SELECT ROUND(AVG(score))::INTEGER FROM reviews WHERE title_id = $1)
        WHERE id = $1
        "#,
    )
    .bind(title_id)
    .execute(conn)
    .await?;
    Ok(())
}

async fn fetch_review(conn: &mut PgConnection, review_id: i64) -> Result<Review, sqlx::Error> {
    let sql = format!("{REVIEW_SELECT} WHERE r.id = $1");
    sqlx::query_as::<_, Review>(&sql)
        .bind(review_id)
        .fetch_one(conn)
        .await
}

async fn replace_genre_links(
    conn: &mut PgConnection,
    title_id: i64,
    genre_ids: &[i64],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM genre_title WHERE title_id = $1")
        .bind(title_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query(
        "INSERT INTO genre_title (title_id, genre_id) \
         SELECT DISTINCT $1::BIGINT, UNNEST($2::BIGINT[]) \
         ON CONFLICT DO NOTHING",
    )
    .bind(title_id)
    .bind(genre_ids)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Maps unique-constraint violations to the errors the API reports for them.
fn map_db_error(e: sqlx::Error) -> AppError {
    let mapped = match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => match db.constraint() {
            Some("users_username_key") => Some(AppError::validation(
                "username",
                "a user with that username already exists",
            )),
            Some("users_email_key") => Some(AppError::validation(
                "email",
                "a user with that email already exists",
            )),
            Some("categories_slug_key") | Some("genres_slug_key") => {
                Some(AppError::validation("slug", "this slug is already in use"))
            }
            Some("unique_review") => Some(AppError::Conflict(DUPLICATE_REVIEW.to_string())),
            _ => None,
        },
        _ => None,
    };
    mapped.unwrap_or(AppError::Database(e))
}

#[async_trait]
impl ConfirmationCodeStore for PostgresRepository {
    /// put_confirmation_code
    ///
    /// Single-statement upsert keyed by `user_id`: code and expiration are replaced together.
    async fn put_confirmation_code(
        &self,
        user_id: Uuid,
        code: &str,
        expiration: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO confirmation_codes (user_id, code, expiration) VALUES ($1, $2, $3)
            ON CONFLICT (user_id) DO UPDATE
            SET code = EXCLUDED.code, expiration = EXCLUDED.expiration
            "#,
        )
        .bind(user_id)
        .bind(code)
        .bind(expiration)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_confirmation_code(
        &self,
        user_id: Uuid,
    ) -> Result<Option<ConfirmationCode>, AppError> {
        let code = sqlx::query_as::<_, ConfirmationCode>(
            "SELECT user_id, code, expiration FROM confirmation_codes WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(code)
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    // --- USERS ---

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1");
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_users(&self, search: Option<String>) -> Result<Vec<User>, AppError> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE ($1::TEXT IS NULL OR username ILIKE '%' || $1 || '%') ORDER BY username"
        );
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(search)
            .fetch_all(&self.pool)
            .await?)
    }

    /// create_user
    ///
    /// Username/email clashes surface as field-level validation errors through the
    /// unique constraints, which also covers two registrations racing each other.
    async fn create_user(&self, user: NewUser, joined_at: DateTime<Utc>) -> Result<User, AppError> {
        let sql = format!(
            "INSERT INTO users (id, username, email, first_name, last_name, bio, role, is_superuser, date_joined) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, false, $8) RETURNING {USER_COLUMNS}"
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(Uuid::new_v4())
            .bind(user.username)
            .bind(user.email)
            .bind(user.first_name)
            .bind(user.last_name)
            .bind(user.bio)
            .bind(user.role.as_str())
            .bind(joined_at)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_error)
    }

    /// update_user
    ///
    /// Uses `COALESCE` so only the provided fields change.
    async fn update_user(
        &self,
        id: Uuid,
        changes: UpdateUserRequest,
    ) -> Result<Option<User>, AppError> {
        let sql = format!(
            r#"
            UPDATE users
            SET username = COALESCE($2, username),
                email = COALESCE($3, email),
                first_name = COALESCE($4, first_name),
                last_name = COALESCE($5, last_name),
                bio = COALESCE($6, bio),
                role = COALESCE($7, role)
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(changes.username)
            .bind(changes.email)
            .bind(changes.first_name)
            .bind(changes.last_name)
            .bind(changes.bio)
            .bind(changes.role.map(|role| role.as_str()))
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)
    }

    /// delete_user
    ///
    /// The user's reviews go with the cascade, so the titles they touched are locked
    /// first and re-rated in the same transaction.
    async fn delete_user(&self, username: &str) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        let title_ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM titles
            WHERE id IN (
                SELECT r.title_id FROM reviews r JOIN users u ON u.id = r.author_id
                WHERE u.username = $1
            )
            ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(username)
        .fetch_all(&mut *tx)
        .await?;

        let deleted = sqlx::query("DELETE FROM users WHERE username = $1")
            .bind(username)
            .execute(&mut *tx)
            .await?
            .rows_affected()
            > 0;

        for title_id in title_ids {
            recompute_rating(&mut tx, title_id).await?;
        }
        tx.commit().await?;
        Ok(deleted)
    }

    async fn touch_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET last_login = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- CATALOG ---

    async fn list_categories(&self, search: Option<String>) -> Result<Vec<Category>, AppError> {
        Ok(sqlx::query_as::<_, Category>(
            "SELECT id, name, slug FROM categories \
             WHERE ($1::TEXT IS NULL OR name ILIKE '%' || $1 || '%') ORDER BY name",
        )
        .bind(search)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn get_category_by_slug(&self, slug: &str) -> Result<Option<Category>, AppError> {
        Ok(
            sqlx::query_as::<_, Category>("SELECT id, name, slug FROM categories WHERE slug = $1")
                .bind(slug)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn create_category(&self, req: SlugEntryRequest) -> Result<Category, AppError> {
        sqlx::query_as::<_, Category>(
            "INSERT INTO categories (name, slug) VALUES ($1, $2) RETURNING id, name, slug",
        )
        .bind(req.name)
        .bind(req.slug)
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_error)
    }

    async fn delete_category(&self, slug: &str) -> Result<bool, AppError> {
        let res = sqlx::query("DELETE FROM categories WHERE slug = $1")
            .bind(slug)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn list_genres(&self, search: Option<String>) -> Result<Vec<Genre>, AppError> {
        Ok(sqlx::query_as::<_, Genre>(
            "SELECT id, name, slug FROM genres \
             WHERE ($1::TEXT IS NULL OR name ILIKE '%' || $1 || '%') ORDER BY name",
        )
        .bind(search)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn get_genre_by_slug(&self, slug: &str) -> Result<Option<Genre>, AppError> {
        Ok(
            sqlx::query_as::<_, Genre>("SELECT id, name, slug FROM genres WHERE slug = $1")
                .bind(slug)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn create_genre(&self, req: SlugEntryRequest) -> Result<Genre, AppError> {
        sqlx::query_as::<_, Genre>(
            "INSERT INTO genres (name, slug) VALUES ($1, $2) RETURNING id, name, slug",
        )
        .bind(req.name)
        .bind(req.slug)
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_error)
    }

    async fn delete_genre(&self, slug: &str) -> Result<bool, AppError> {
        let res = sqlx::query("DELETE FROM genres WHERE slug = $1")
            .bind(slug)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    /// list_titles
    ///
    /// Builds the filter with QueryBuilder so every user-supplied value is bound.
    async fn list_titles(&self, filter: TitleFilter) -> Result<Vec<Title>, AppError> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(TITLE_SELECT);
        builder.push(" WHERE 1 = 1");

        if let Some(category) = filter.category {
            builder.push(" AND c.slug = ");
            builder.push_bind(category);
        }
        if let Some(genre) = filter.genre {
            builder.push(
                " AND EXISTS (SELECT 1 FROM genre_title gt JOIN genres g ON g.id = gt.genre_id \
                 WHERE gt.title_id = t.id AND g.slug = ",
            );
            builder.push_bind(genre);
            builder.push(")");
        }
        if let Some(name) = filter.name {
            builder.push(" AND t.name ILIKE ");
            builder.push_bind(format!("%{}%", name));
        }
        if let Some(year) = filter.year {
            builder.push(" AND t.year = ");
            builder.push_bind(year);
        }
        builder.push(" ORDER BY t.name, t.id");

        let rows = builder
            .build_query_as::<TitleRow>()
            .fetch_all(&self.pool)
            .await?;
        self.hydrate_titles(rows).await
    }

    async fn get_title(&self, id: i64) -> Result<Option<Title>, AppError> {
        let sql = format!("{TITLE_SELECT} WHERE t.id = $1");
        let row = sqlx::query_as::<_, TitleRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(self.hydrate_titles(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn create_title(&self, write: TitleWrite) -> Result<Title, AppError> {
        let mut tx = self.pool.begin().await?;
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO titles (name, year, description, category_id) VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(write.name)
        .bind(write.year)
        .bind(write.description)
        .bind(write.category_id)
        .fetch_one(&mut *tx)
        .await?;
        replace_genre_links(&mut tx, id, &write.genre_ids).await?;
        tx.commit().await?;

        self.get_title(id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("title {id} vanished after insert")))
    }

    async fn update_title(&self, id: i64, write: TitleWrite) -> Result<Option<Title>, AppError> {
        let mut tx = self.pool.begin().await?;
        let updated: Option<i64> = sqlx::query_scalar(
            "UPDATE titles SET name = $2, year = $3, description = $4, category_id = $5 WHERE id = $1 RETURNING id",
        )
        .bind(id)
        .bind(write.name)
        .bind(write.year)
        .bind(write.description)
        .bind(write.category_id)
        .fetch_optional(&mut *tx)
        .await?;
        if updated.is_none() {
            return Ok(None);
        }
        replace_genre_links(&mut tx, id, &write.genre_ids).await?;
        tx.commit().await?;
        self.get_title(id).await
    }

    async fn delete_title(&self, id: i64) -> Result<bool, AppError> {
        let res = sqlx::query("DELETE FROM titles WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    // --- REVIEWS ---

    async fn list_reviews(&self, title_id: i64) -> Result<Vec<Review>, AppError> {
        let sql = format!("{REVIEW_SELECT} WHERE r.title_id = $1 ORDER BY r.pub_date, r.id");
        Ok(sqlx::query_as::<_, Review>(&sql)
            .bind(title_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn get_review(&self, title_id: i64, review_id: i64) -> Result<Option<Review>, AppError> {
        let sql = format!("{REVIEW_SELECT} WHERE r.id = $1 AND r.title_id = $2");
        Ok(sqlx::query_as::<_, Review>(&sql)
            .bind(review_id)
            .bind(title_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// create_review
    ///
    /// One transaction: lock the title row, check for an existing (title, author) review,
    /// insert, recompute the rating. Concurrent submissions for the same title queue on
    /// the row lock, so only the first of a duplicate pair gets past the check; the
    /// `unique_review` constraint backs it up.
    async fn create_review(
        &self,
        title_id: i64,
        author_id: Uuid,
        text: String,
        score: i16,
        at: DateTime<Utc>,
    ) -> Result<Review, AppError> {
        let mut tx = self.pool.begin().await?;
        if !lock_title(&mut tx, title_id).await? {
            return Err(AppError::not_found("title"));
        }

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM reviews WHERE title_id = $1 AND author_id = $2)",
        )
        .bind(title_id)
        .bind(author_id)
        .fetch_one(&mut *tx)
        .await?;
        if exists {
            return Err(AppError::Conflict(DUPLICATE_REVIEW.to_string()));
        }

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO reviews (title_id, author_id, text, score, pub_date) VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(title_id)
        .bind(author_id)
        .bind(text)
        .bind(score)
        .bind(at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_db_error)?;

        recompute_rating(&mut tx, title_id).await?;
        let review = fetch_review(&mut tx, id).await?;
        tx.commit().await?;
        Ok(review)
    }

    async fn update_review(
        &self,
        title_id: i64,
        review_id: i64,
        changes: UpdateReviewRequest,
    ) -> Result<Option<Review>, AppError> {
        let mut tx = self.pool.begin().await?;
        if !lock_title(&mut tx, title_id).await? {
            return Ok(None);
        }

        let updated: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE reviews
            SET text = COALESCE($3, text), score = COALESCE($4, score)
            WHERE id = $1 AND title_id = $2
            RETURNING id
            "#,
        )
        .bind(review_id)
        .bind(title_id)
        .bind(changes.text)
        .bind(changes.score)
        .fetch_optional(&mut *tx)
        .await?;
        if updated.is_none() {
            return Ok(None);
        }

        recompute_rating(&mut tx, title_id).await?;
        let review = fetch_review(&mut tx, review_id).await?;
        tx.commit().await?;
        Ok(Some(review))
    }

    async fn delete_review(&self, title_id: i64, review_id: i64) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;
        if !lock_title(&mut tx, title_id).await? {
            return Ok(false);
        }

        let deleted = sqlx::query("DELETE FROM reviews WHERE id = $1 AND title_id = $2")
            .bind(review_id)
            .bind(title_id)
            .execute(&mut *tx)
            .await?
            .rows_affected()
            > 0;
        if deleted {
            recompute_rating(&mut tx, title_id).await?;
        }
        tx.commit().await?;
        Ok(deleted)
    }

    // --- COMMENTS ---

    async fn list_comments(&self, review_id: i64) -> Result<Vec<Comment>, AppError> {
        let sql = format!("{COMMENT_SELECT} WHERE c.review_id = $1 ORDER BY c.pub_date, c.id");
        Ok(sqlx::query_as::<_, Comment>(&sql)
            .bind(review_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn get_comment(
        &self,
        review_id: i64,
        comment_id: i64,
    ) -> Result<Option<Comment>, AppError> {
        let sql = format!("{COMMENT_SELECT} WHERE c.id = $1 AND c.review_id = $2");
        Ok(sqlx::query_as::<_, Comment>(&sql)
            .bind(comment_id)
            .bind(review_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// create_comment
    ///
    /// Inserts and joins `users` in one statement (CTE) to return the author's username.
    async fn create_comment(
        &self,
        review_id: i64,
        author_id: Uuid,
        text: String,
        at: DateTime<Utc>,
    ) -> Result<Comment, AppError> {
        Ok(sqlx::query_as::<_, Comment>(
            r#"
            WITH inserted AS (
                INSERT INTO comments (review_id, author_id, text, pub_date) VALUES ($1, $2, $3, $4)
                RETURNING id, review_id, author_id, text, pub_date
            )
            SELECT i.id, i.review_id, i.author_id, u.username AS author, i.text, i.pub_date
            FROM inserted i JOIN users u ON u.id = i.author_id
            "#,
        )
        .bind(review_id)
        .bind(author_id)
        .bind(text)
        .bind(at)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn update_comment(
        &self,
        review_id: i64,
        comment_id: i64,
        text: String,
    ) -> Result<Option<Comment>, AppError> {
        let updated: Option<i64> = sqlx::query_scalar(
            "UPDATE comments SET text = $3 WHERE id = $1 AND review_id = $2 RETURNING id",
        )
        .bind(comment_id)
        .bind(review_id)
        .bind(text)
        .fetch_optional(&self.pool)
        .await?;
        match updated {
            Some(_) => self.get_comment(review_id, comment_id).await,
            None => Ok(None),
        }
    }

    async fn delete_comment(&self, review_id: i64, comment_id: i64) -> Result<bool, AppError> {
        let res = sqlx::query("DELETE FROM comments WHERE id = $1 AND review_id = $2")
            .bind(comment_id)
            .bind(review_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}
