mod common;

use chrono::Duration;
use common::{seed_user, test_context, test_context_with};
use yamdb_api::{
    AppConfig, AppError, MockMailer, accounts,
    auth::decode_token,
    codes::ConfirmationCodeStore,
    models::{Role, SignupRequest, TokenRequest},
    repository::Repository,
};

fn signup(username: &str, email: &str) -> SignupRequest {
    SignupRequest {
        username: username.to_string(),
        email: email.to_string(),
    }
}

fn token_request(username: &str, code: &str) -> TokenRequest {
    TokenRequest {
        username: username.to_string(),
        confirmation_code: code.to_string(),
    }
}

// --- Registration ---

#[tokio::test]
async fn test_register_creates_user_and_mails_code() {
    let ctx = test_context();

    let echoed = accounts::register(&ctx.state, signup("alice", "a@x.com"))
        .await
        .unwrap();

    assert_eq!(echoed, signup("alice", "a@x.com"));
    let user = ctx.repo.get_user_by_username("alice").await.unwrap().unwrap();
    assert_eq!(user.role, Role::Regular);
    assert_eq!(user.email, "a@x.com");

    let code = ctx.mailer.last_code_for("a@x.com").expect("code mailed");
    assert_eq!(code.len(), 64);
    let stored = ctx.repo.get_confirmation_code(user.id).await.unwrap().unwrap();
    assert_eq!(stored.code, code);
    assert_eq!(
        stored.expiration,
        ctx.clock.utc_now() + Duration::seconds(3_600)
    );
}

#[tokio::test]
async fn test_reregistration_overwrites_the_single_code_record() {
    let ctx = test_context();

    accounts::register(&ctx.state, signup("alice", "a@x.com")).await.unwrap();
    let first = ctx.mailer.last_code_for("a@x.com").unwrap();
    accounts::register(&ctx.state, signup("alice", "a@x.com")).await.unwrap();
    let second = ctx.mailer.last_code_for("a@x.com").unwrap();

    assert_ne!(first, second);
    assert_eq!(ctx.repo.confirmation_code_count(), 1);

    // The replaced code no longer authenticates.
    let err = accounts::obtain_token(&ctx.state, token_request("alice", &first))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Authentication));
    assert!(
        accounts::obtain_token(&ctx.state, token_request("alice", &second))
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn test_register_rejects_reserved_username() {
    let ctx = test_context();

    let err = accounts::register(&ctx.state, signup("me", "me@x.com"))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Validation { ref field, .. } if field == "username"));
    assert!(ctx.mailer.sent().is_empty());
}

#[tokio::test]
async fn test_register_rejects_invalid_email() {
    let ctx = test_context();

    let err = accounts::register(&ctx.state, signup("alice", "not-an-email"))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Validation { ref field, .. } if field == "email"));
}

#[tokio::test]
async fn test_register_username_clash_reported_before_email_clash() {
    let ctx = test_context();
    accounts::register(&ctx.state, signup("alice", "a@x.com")).await.unwrap();
    accounts::register(&ctx.state, signup("bob", "b@x.com")).await.unwrap();

    // Username taken by alice, email taken by bob: the username wins.
    let err = accounts::register(&ctx.state, signup("alice", "b@x.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { ref field, .. } if field == "username"));

    let err = accounts::register(&ctx.state, signup("carol", "a@x.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { ref field, .. } if field == "email"));
}

#[tokio::test]
async fn test_register_succeeds_when_mail_delivery_fails() {
    let ctx = test_context_with(AppConfig::default(), MockMailer::new_failing());

    let result = accounts::register(&ctx.state, signup("alice", "a@x.com")).await;

    assert!(result.is_ok());
    assert_eq!(ctx.repo.confirmation_code_count(), 1);
    assert_eq!(ctx.mailer.sent().len(), 1);
}

// --- Token exchange ---

#[tokio::test]
async fn test_code_is_reusable_until_expiry() {
    let ctx = test_context();
    accounts::register(&ctx.state, signup("alice", "a@x.com")).await.unwrap();
    let code = ctx.mailer.last_code_for("a@x.com").unwrap();

    let first = accounts::obtain_token(&ctx.state, token_request("alice", &code))
        .await
        .unwrap();
    let claims = decode_token(&first.token, &ctx.state.config.jwt_secret).unwrap();
    assert_eq!(claims.username, "alice");

    ctx.clock.advance(Duration::minutes(30));
    assert!(
        accounts::obtain_token(&ctx.state, token_request("alice", &code))
            .await
            .is_ok()
    );

    // Exactly at the expiration instant the code is still accepted.
    ctx.clock.advance(Duration::minutes(30));
    assert!(
        accounts::obtain_token(&ctx.state, token_request("alice", &code))
            .await
            .is_ok()
    );

    ctx.clock.advance(Duration::seconds(1));
    let err = accounts::obtain_token(&ctx.state, token_request("alice", &code))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Authentication));
}

#[tokio::test]
async fn test_wrong_code_is_authentication_error() {
    let ctx = test_context();
    accounts::register(&ctx.state, signup("alice", "a@x.com")).await.unwrap();
    let code = ctx.mailer.last_code_for("a@x.com").unwrap();

    let err = accounts::obtain_token(&ctx.state, token_request("alice", &code.to_uppercase()))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Authentication));
}

#[tokio::test]
async fn test_user_without_code_cannot_authenticate() {
    let ctx = test_context();
    seed_user(&ctx.repo, "dave", Role::Regular);

    let err = accounts::obtain_token(&ctx.state, token_request("dave", ""))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Authentication));
}

#[tokio::test]
async fn test_unknown_user_is_not_found_by_default() {
    let ctx = test_context();

    let err = accounts::obtain_token(&ctx.state, token_request("ghost", "abc"))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_unknown_user_is_opaque_when_configured() {
    let config = AppConfig {
        opaque_auth_errors: true,
        ..AppConfig::default()
    };
    let ctx = test_context_with(config, MockMailer::new());

    let err = accounts::obtain_token(&ctx.state, token_request("ghost", "abc"))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Authentication));
}

#[tokio::test]
async fn test_token_issue_stamps_last_login() {
    let ctx = test_context();
    accounts::register(&ctx.state, signup("alice", "a@x.com")).await.unwrap();
    let code = ctx.mailer.last_code_for("a@x.com").unwrap();

    accounts::obtain_token(&ctx.state, token_request("alice", &code))
        .await
        .unwrap();

    let user = ctx.repo.get_user_by_username("alice").await.unwrap().unwrap();
    assert_eq!(user.last_login, Some(ctx.clock.utc_now()));
}

#[tokio::test]
async fn test_last_login_untouched_when_disabled() {
    let config = AppConfig {
        update_last_login: false,
        ..AppConfig::default()
    };
    let ctx = test_context_with(config, MockMailer::new());
    accounts::register(&ctx.state, signup("alice", "a@x.com")).await.unwrap();
    let code = ctx.mailer.last_code_for("a@x.com").unwrap();

    accounts::obtain_token(&ctx.state, token_request("alice", &code))
        .await
        .unwrap();

    let user = ctx.repo.get_user_by_username("alice").await.unwrap().unwrap();
    assert!(user.last_login.is_none());
}
