use axum::{Json, extract::State};

use crate::{
    AppState, accounts,
    error::AppError,
    models::{SignupRequest, TokenRequest, TokenResponse},
};

/// signup
///
/// [Public Route] Registers (or re-registers) a user and mails a confirmation code.
/// Echoes the submitted username and email on success.
#[utoipa::path(
    post,
    path = "/api/v1/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 200, description = "Code sent", body = SignupRequest),
        (status = 400, description = "Field-level validation errors")
    )
)]
pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> Result<Json<SignupRequest>, AppError> {
    let echoed = accounts::register(&state, payload).await?;
    Ok(Json(echoed))
}

/// obtain_token
///
/// [Public Route] Exchanges a username and confirmation code for an access token.
#[utoipa::path(
    post,
    path = "/api/v1/auth/token",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Token issued", body = TokenResponse),
        (status = 400, description = "Invalid or expired confirmation code"),
        (status = 404, description = "Unknown username")
    )
)]
pub async fn obtain_token(
    State(state): State<AppState>,
    Json(payload): Json<TokenRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let token = accounts::obtain_token(&state, payload).await?;
    Ok(Json(token))
}
