use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::{
    AppState,
    auth::AuthUser,
    error::AppError,
    models::{CreateUserRequest, NewUser, SearchFilter, UpdateUserRequest, UserProfile},
    permissions::{Action, Resource, ensure, may_assign_role},
    validation::{validate_email, validate_username},
};

/// Applies a partial update to `user_id` on behalf of `identity`.
///
/// A `role` sent by a non-admin is dropped rather than rejected: the field is read-only
/// for them.
async fn apply_update(
    state: &AppState,
    identity: &AuthUser,
    user_id: Uuid,
    mut payload: UpdateUserRequest,
) -> Result<UserProfile, AppError> {
    if payload.role.is_some() && !may_assign_role(identity) {
        tracing::debug!(user = %identity.username, "ignoring role change from non-admin");
        payload.role = None;
    }
    if let Some(username) = &payload.username {
        validate_username(username)?;
    }
    if let Some(email) = &payload.email {
        validate_email(email)?;
    }

    let user = state
        .repo
        .update_user(user_id, payload)
        .await?
        .ok_or_else(|| AppError::not_found("user"))?;
    Ok(UserProfile::from(user))
}

async fn load_by_username(state: &AppState, username: &str) -> Result<crate::models::User, AppError> {
    state
        .repo
        .get_user_by_username(username)
        .await?
        .ok_or_else(|| AppError::not_found("user"))
}

/// get_me
///
/// [Authenticated Route] The caller's own user record.
#[utoipa::path(
    get,
    path = "/api/v1/users/me",
    responses((status = 200, description = "Profile", body = UserProfile))
)]
pub async fn get_me(
    identity: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<UserProfile>, AppError> {
    ensure(&identity, Action::Read, Resource::Profile { owner_id: identity.id })?;
    let user = state
        .repo
        .get_user(identity.id)
        .await?
        .ok_or_else(|| AppError::not_found("user"))?;
    Ok(Json(UserProfile::from(user)))
}

/// update_me
///
/// [Authenticated Route] Partial update of the caller's own record. Only admins can
/// change `role`; for anyone else the field is silently ignored.
#[utoipa::path(
    patch,
    path = "/api/v1/users/me",
    request_body = UpdateUserRequest,
    responses((status = 200, description = "Updated", body = UserProfile))
)]
pub async fn update_me(
    identity: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<UserProfile>, AppError> {
    ensure(&identity, Action::Update, Resource::Profile { owner_id: identity.id })?;
    let profile = apply_update(&state, &identity, identity.id, payload).await?;
    Ok(Json(profile))
}

/// list_users
///
/// [Admin Route] All users, optionally filtered by `?search=` on the username.
#[utoipa::path(
    get,
    path = "/api/v1/users",
    params(SearchFilter),
    responses(
        (status = 200, description = "Users", body = [UserProfile]),
        (status = 403, description = "Not an admin")
    )
)]
pub async fn list_users(
    identity: AuthUser,
    State(state): State<AppState>,
    Query(filter): Query<SearchFilter>,
) -> Result<Json<Vec<UserProfile>>, AppError> {
    ensure(&identity, Action::Read, Resource::UserRecord)?;
    let users = state.repo.list_users(filter.search).await?;
    Ok(Json(users.into_iter().map(UserProfile::from).collect()))
}

/// create_user
///
/// [Admin Route] Creates a user with any role.
#[utoipa::path(
    post,
    path = "/api/v1/users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "Created", body = UserProfile),
        (status = 400, description = "Field-level validation errors"),
        (status = 403, description = "Not an admin")
    )
)]
pub async fn create_user(
    identity: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserProfile>), AppError> {
    ensure(&identity, Action::Create, Resource::UserRecord)?;
    validate_username(&payload.username)?;
    validate_email(&payload.email)?;

    let new_user = NewUser {
        username: payload.username,
        email: payload.email,
        first_name: payload.first_name,
        last_name: payload.last_name,
        bio: payload.bio,
        role: payload.role,
    };
    let user = state.repo.create_user(new_user, state.clock.utc()).await?;
    tracing::info!(admin = %identity.username, user = %user.username, role = %user.role, "user created");
    Ok((StatusCode::CREATED, Json(UserProfile::from(user))))
}

/// get_user
///
/// [Admin Route] One user by username.
#[utoipa::path(
    get,
    path = "/api/v1/users/{username}",
    params(("username" = String, Path, description = "Username")),
    responses(
        (status = 200, description = "Found", body = UserProfile),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_user(
    identity: AuthUser,
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<UserProfile>, AppError> {
    ensure(&identity, Action::Read, Resource::UserRecord)?;
    let user = load_by_username(&state, &username).await?;
    Ok(Json(UserProfile::from(user)))
}

/// update_user
///
/// [Admin Route] Partial update of any user, role included.
#[utoipa::path(
    patch,
    path = "/api/v1/users/{username}",
    params(("username" = String, Path, description = "Username")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "Updated", body = UserProfile),
        (status = 404, description = "Not Found")
    )
)]
pub async fn update_user(
    identity: AuthUser,
    State(state): State<AppState>,
    Path(username): Path<String>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<UserProfile>, AppError> {
    ensure(&identity, Action::Update, Resource::UserRecord)?;
    let user = load_by_username(&state, &username).await?;
    let profile = apply_update(&state, &identity, user.id, payload).await?;
    Ok(Json(profile))
}

/// delete_user
///
/// [Admin Route] Removes a user; their reviews and comments go with them and the
/// affected titles are re-rated.
#[utoipa::path(
    delete,
    path = "/api/v1/users/{username}",
    params(("username" = String, Path, description = "Username")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_user(
    identity: AuthUser,
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<StatusCode, AppError> {
    ensure(&identity, Action::Delete, Resource::UserRecord)?;
    if state.repo.delete_user(&username).await? {
        tracing::info!(admin = %identity.username, user = %username, "user deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("user"))
    }
}
