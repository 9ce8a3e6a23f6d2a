use chrono::Duration;
use mockable::Clock;

use crate::{
    AppState,
    auth::issue_token,
    codes::generate_confirmation_code,
    error::AppError,
    mailer::confirmation_mail,
    models::{NewUser, Role, SignupRequest, TokenRequest, TokenResponse, User},
    repository::Repository,
    validation::{validate_email, validate_username},
};

/// register
///
/// Creates (or reuses) the user for a `(username, email)` pair and mails them a fresh
/// confirmation code.
///
/// 1. An existing user matching both fields is reused.
/// 2. Otherwise a username taken by someone else fails on `username`; failing that, an
///    email taken by someone else fails on `email`.
/// 3. Otherwise a new `user`-role record is created.
/// 4. A new code, valid for `confirmation_code_ttl_secs`, replaces any previous one.
/// 5. The code is handed to the mailer. Delivery failures are logged, not returned.
pub async fn register(state: &AppState, req: SignupRequest) -> Result<SignupRequest, AppError> {
    validate_username(&req.username)?;
    validate_email(&req.email)?;

    let repo = state.repo.as_ref();
    let now = state.clock.utc();

    let user = match repo.get_user_by_username(&req.username).await? {
        Some(user) if user.email == req.email => user,
        Some(_) => {
            return Err(AppError::validation(
                "username",
                "a user with that username already exists",
            ));
        }
        None => {
            if repo.get_user_by_email(&req.email).await?.is_some() {
                return Err(AppError::validation(
                    "email",
                    "a user with that email already exists",
                ));
            }
            let new_user = NewUser {
                username: req.username.clone(),
                email: req.email.clone(),
                role: Role::Regular,
                ..NewUser::default()
            };
            let created = repo.create_user(new_user, now).await?;
            tracing::info!(user = %created.username, "registered new user");
            created
        }
    };

    let code = generate_confirmation_code();
    let ttl_secs = state.config.confirmation_code_ttl_secs;
    let expiration = now + Duration::seconds(ttl_secs);
    repo.put_confirmation_code(user.id, &code, expiration).await?;
    tracing::info!(user = %user.username, %expiration, "confirmation code issued");

    let mail = confirmation_mail(&state.config.mail_from, &user.email, &code, ttl_secs);
    if let Err(e) = state.mailer.send(&mail).await {
        tracing::warn!(user = %user.username, "confirmation code delivery failed: {}", e);
    }

    Ok(req)
}

/// authenticate
///
/// Returns the user when a code record exists for them, matches `code` exactly and has
/// not expired. The code is not consumed: it keeps working until it expires or a new
/// registration replaces it. Unknown usernames also yield `None`.
pub async fn authenticate(
    repo: &dyn Repository,
    clock: &(dyn Clock + Send + Sync),
    username: &str,
    code: &str,
) -> Result<Option<User>, AppError> {
    let Some(user) = repo.get_user_by_username(username).await? else {
        return Ok(None);
    };
    let accepted = repo
        .get_confirmation_code(user.id)
        .await?
        .is_some_and(|stored| stored.accepts(code, clock.utc()));
    Ok(accepted.then_some(user))
}

/// obtain_token
///
/// Exchanges `(username, confirmation_code)` for a signed access token.
///
/// An unknown username is reported as `NotFound` unless `opaque_auth_errors` is set,
/// in which case it is indistinguishable from a wrong or expired code. A wrong code and
/// an expired code always produce the same `Authentication` error.
pub async fn obtain_token(state: &AppState, req: TokenRequest) -> Result<TokenResponse, AppError> {
    let repo = state.repo.as_ref();

    if repo.get_user_by_username(&req.username).await?.is_none() {
        tracing::info!(user = %req.username, "token requested for unknown user");
        return Err(if state.config.opaque_auth_errors {
            AppError::Authentication
        } else {
            AppError::NotFound("user not found".to_string())
        });
    }

    let user = authenticate(
        repo,
        state.clock.as_ref(),
        &req.username,
        &req.confirmation_code,
    )
    .await?
    .ok_or_else(|| {
        tracing::info!(user = %req.username, "confirmation code rejected");
        AppError::Authentication
    })?;

    let now = state.clock.utc();
    if state.config.update_last_login {
        repo.touch_last_login(user.id, now).await?;
    }

    let token = issue_token(&user, &state.config, now)?;
    tracing::info!(user = %user.username, "access token issued");
    Ok(TokenResponse { token })
}
