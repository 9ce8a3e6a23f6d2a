use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};

use crate::{
    AppState,
    auth::AuthUser,
    error::AppError,
    handlers::require_title,
    models::{
        Category, CreateTitleRequest, Genre, SearchFilter, SlugEntryRequest, Title, TitleFilter,
        TitleWrite, UpdateTitleRequest,
    },
    permissions::{Action, Resource, ensure},
    repository::Repository,
    validation::{validate_name, validate_slug, validate_title_name},
};

fn validate_slug_entry(req: &SlugEntryRequest) -> Result<(), AppError> {
    validate_name(&req.name)?;
    validate_slug(&req.slug)
}

/// Turns the slug references of a title payload into row ids. An unknown slug is a
/// client error on the field that named it, not a 404. A genre named twice is linked once.
async fn resolve_title_write(
    repo: &dyn Repository,
    name: String,
    year: i32,
    description: Option<String>,
    genre_slugs: &[String],
    category_slug: Option<&str>,
) -> Result<TitleWrite, AppError> {
    validate_title_name(&name)?;

    let mut genre_ids = Vec::with_capacity(genre_slugs.len());
    for slug in genre_slugs {
        let genre = repo
            .get_genre_by_slug(slug)
            .await?
            .ok_or_else(|| AppError::validation("genre", format!("unknown genre slug: {slug}")))?;
        genre_ids.push(genre.id);
    }
    genre_ids.sort_unstable();
    genre_ids.dedup();

    let category_id = match category_slug {
        Some(slug) => Some(
            repo.get_category_by_slug(slug)
                .await?
                .ok_or_else(|| {
                    AppError::validation("category", format!("unknown category slug: {slug}"))
                })?
                .id,
        ),
        None => None,
    };

    Ok(TitleWrite {
        name,
        year,
        description,
        genre_ids,
        category_id,
    })
}

// --- Categories ---

/// list_categories
///
/// [Public Route] All categories ordered by name, with optional `?search=` on the name.
#[utoipa::path(
    get,
    path = "/api/v1/categories",
    params(SearchFilter),
    responses((status = 200, description = "Categories", body = [Category]))
)]
pub async fn list_categories(
    State(state): State<AppState>,
    Query(filter): Query<SearchFilter>,
) -> Result<Json<Vec<Category>>, AppError> {
    let categories = state.repo.list_categories(filter.search).await?;
    Ok(Json(categories))
}

/// create_category
///
/// [Admin Route]
#[utoipa::path(
    post,
    path = "/api/v1/categories",
    request_body = SlugEntryRequest,
    responses(
        (status = 201, description = "Created", body = Category),
        (status = 400, description = "Invalid or duplicate slug"),
        (status = 403, description = "Not an admin")
    )
)]
pub async fn create_category(
    identity: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<SlugEntryRequest>,
) -> Result<(StatusCode, Json<Category>), AppError> {
    ensure(&identity, Action::Create, Resource::Category)?;
    validate_slug_entry(&payload)?;
    let category = state.repo.create_category(payload).await?;
    Ok((StatusCode::CREATED, Json(category)))
}

/// delete_category
///
/// [Admin Route] Titles in the category keep existing with no category.
#[utoipa::path(
    delete,
    path = "/api/v1/categories/{slug}",
    params(("slug" = String, Path, description = "Category slug")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_category(
    identity: AuthUser,
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<StatusCode, AppError> {
    ensure(&identity, Action::Delete, Resource::Category)?;
    if state.repo.delete_category(&slug).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("category"))
    }
}

// --- Genres ---

/// list_genres
///
/// [Public Route]
#[utoipa::path(
    get,
    path = "/api/v1/genres",
    params(SearchFilter),
    responses((status = 200, description = "Genres", body = [Genre]))
)]
pub async fn list_genres(
    State(state): State<AppState>,
    Query(filter): Query<SearchFilter>,
) -> Result<Json<Vec<Genre>>, AppError> {
    let genres = state.repo.list_genres(filter.search).await?;
    Ok(Json(genres))
}

/// create_genre
///
/// [Admin Route]
#[utoipa::path(
    post,
    path = "/api/v1/genres",
    request_body = SlugEntryRequest,
    responses(
        (status = 201, description = "Created", body = Genre),
        (status = 400, description = "Invalid or duplicate slug"),
        (status = 403, description = "Not an admin")
    )
)]
pub async fn create_genre(
    identity: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<SlugEntryRequest>,
) -> Result<(StatusCode, Json<Genre>), AppError> {
    ensure(&identity, Action::Create, Resource::Genre)?;
    validate_slug_entry(&payload)?;
    let genre = state.repo.create_genre(payload).await?;
    Ok((StatusCode::CREATED, Json(genre)))
}

/// delete_genre
///
/// [Admin Route]
#[utoipa::path(
    delete,
    path = "/api/v1/genres/{slug}",
    params(("slug" = String, Path, description = "Genre slug")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_genre(
    identity: AuthUser,
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<StatusCode, AppError> {
    ensure(&identity, Action::Delete, Resource::Genre)?;
    if state.repo.delete_genre(&slug).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("genre"))
    }
}

// --- Titles ---

/// list_titles
///
/// [Public Route] Titles filtered by category slug, genre slug, name substring and year.
#[utoipa::path(
    get,
    path = "/api/v1/titles",
    params(TitleFilter),
    responses((status = 200, description = "Titles", body = [Title]))
)]
pub async fn list_titles(
    State(state): State<AppState>,
    Query(filter): Query<TitleFilter>,
) -> Result<Json<Vec<Title>>, AppError> {
    let titles = state.repo.list_titles(filter).await?;
    Ok(Json(titles))
}

/// get_title
///
/// [Public Route] One title with its nested genres, category and current rating.
#[utoipa::path(
    get,
    path = "/api/v1/titles/{title_id}",
    params(("title_id" = i64, Path, description = "Title ID")),
    responses(
        (status = 200, description = "Found", body = Title),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_title(
    State(state): State<AppState>,
    Path(title_id): Path<i64>,
) -> Result<Json<Title>, AppError> {
    let title = require_title(&state, title_id).await?;
    Ok(Json(title))
}

/// create_title
///
/// [Admin Route] Genres and category are referenced by slug.
#[utoipa::path(
    post,
    path = "/api/v1/titles",
    request_body = CreateTitleRequest,
    responses(
        (status = 201, description = "Created", body = Title),
        (status = 400, description = "Invalid field or unknown slug"),
        (status = 403, description = "Not an admin")
    )
)]
pub async fn create_title(
    identity: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateTitleRequest>,
) -> Result<(StatusCode, Json<Title>), AppError> {
    ensure(&identity, Action::Create, Resource::Title)?;
    let write = resolve_title_write(
        state.repo.as_ref(),
        payload.name,
        payload.year,
        payload.description,
        &payload.genre,
        Some(&payload.category),
    )
    .await?;
    let title = state.repo.create_title(write).await?;
    tracing::info!(admin = %identity.username, title_id = title.id, "title created");
    Ok((StatusCode::CREATED, Json(title)))
}

/// update_title
///
/// [Admin Route] Partial update; omitted fields keep their current values. The rating
/// is never writable here.
#[utoipa::path(
    patch,
    path = "/api/v1/titles/{title_id}",
    params(("title_id" = i64, Path, description = "Title ID")),
    request_body = UpdateTitleRequest,
    responses(
        (status = 200, description = "Updated", body = Title),
        (status = 404, description = "Not Found")
    )
)]
pub async fn update_title(
    identity: AuthUser,
    State(state): State<AppState>,
    Path(title_id): Path<i64>,
    Json(payload): Json<UpdateTitleRequest>,
) -> Result<Json<Title>, AppError> {
    ensure(&identity, Action::Update, Resource::Title)?;
    let current = require_title(&state, title_id).await?;

    let genre_slugs = payload
        .genre
        .unwrap_or_else(|| current.genre.iter().map(|g| g.slug.clone()).collect());
    let category_slug = payload
        .category
        .or_else(|| current.category.map(|c| c.slug));

    let write = resolve_title_write(
        state.repo.as_ref(),
        payload.name.unwrap_or(current.name),
        payload.year.unwrap_or(current.year),
        payload.description.or(current.description),
        &genre_slugs,
        category_slug.as_deref(),
    )
    .await?;

    let title = state
        .repo
        .update_title(title_id, write)
        .await?
        .ok_or_else(|| AppError::not_found("title"))?;
    Ok(Json(title))
}

/// delete_title
///
/// [Admin Route] Removes the title with its reviews and their comments.
#[utoipa::path(
    delete,
    path = "/api/v1/titles/{title_id}",
    params(("title_id" = i64, Path, description = "Title ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_title(
    identity: AuthUser,
    State(state): State<AppState>,
    Path(title_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    ensure(&identity, Action::Delete, Resource::Title)?;
    if state.repo.delete_title(title_id).await? {
        tracing::info!(admin = %identity.username, title_id, "title deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("title"))
    }
}
