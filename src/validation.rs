//! Field rules shared by registration, the users collection and the catalog.

use email_address::EmailAddress;

use crate::error::AppError;

/// Path segment reserved for the caller's own record.
pub const RESERVED_USERNAME: &str = "me";

pub const USERNAME_MAX_LEN: usize = 150;
pub const EMAIL_MAX_LEN: usize = 254;
pub const SLUG_MAX_LEN: usize = 50;
pub const NAME_MAX_LEN: usize = 256;
pub const TITLE_NAME_MAX_LEN: usize = 400;
pub const SCORE_RANGE: std::ops::RangeInclusive<i16> = 1..=10;

/// Letters, digits and `@ . + - _`, 1 to 150 characters, never `me`.
pub fn validate_username(username: &str) -> Result<(), AppError> {
    if username == RESERVED_USERNAME {
        return Err(AppError::validation("username", "this username is reserved"));
    }
    if username.is_empty() || username.chars().count() > USERNAME_MAX_LEN {
        return Err(AppError::validation(
            "username",
            format!("must be between 1 and {USERNAME_MAX_LEN} characters"),
        ));
    }
    let allowed = |c: char| c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_');
    if !username.chars().all(allowed) {
        return Err(AppError::validation(
            "username",
            "may contain only letters, digits and @/./+/-/_",
        ));
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), AppError> {
    if email.len() > EMAIL_MAX_LEN || !EmailAddress::is_valid(email) {
        return Err(AppError::validation("email", "enter a valid email address"));
    }
    Ok(())
}

pub fn validate_slug(slug: &str) -> Result<(), AppError> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_';
    if slug.is_empty() || slug.len() > SLUG_MAX_LEN || !slug.chars().all(allowed) {
        return Err(AppError::validation(
            "slug",
            "enter a valid slug of letters, numbers, underscores or hyphens",
        ));
    }
    Ok(())
}

fn validate_bounded_name(name: &str, max_len: usize) -> Result<(), AppError> {
    if name.trim().is_empty() || name.chars().count() > max_len {
        return Err(AppError::validation(
            "name",
            format!("must be between 1 and {max_len} characters"),
        ));
    }
    Ok(())
}

/// Category and genre names.
pub fn validate_name(name: &str) -> Result<(), AppError> {
    validate_bounded_name(name, NAME_MAX_LEN)
}

/// Title names allow up to 400 characters.
pub fn validate_title_name(name: &str) -> Result<(), AppError> {
    validate_bounded_name(name, TITLE_NAME_MAX_LEN)
}

pub fn validate_score(score: i16) -> Result<(), AppError> {
    if !SCORE_RANGE.contains(&score) {
        return Err(AppError::validation("score", "choose a score from 1 to 10"));
    }
    Ok(())
}

pub fn validate_text(text: &str) -> Result<(), AppError> {
    if text.trim().is_empty() {
        return Err(AppError::validation("text", "this field may not be blank"));
    }
    Ok(())
}
