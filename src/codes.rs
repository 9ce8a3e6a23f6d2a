use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::{RngCore, rngs::OsRng};
use uuid::Uuid;

use crate::{error::AppError, models::ConfirmationCode};

/// Bytes of OS randomness behind every confirmation code (256 bits).
pub const CODE_ENTROPY_BYTES: usize = 32;

/// ConfirmationCodeStore
///
/// Holds one confirmation code per user. `put` replaces any previous record for the
/// user as a single write, so a reader never sees a code paired with another issuance's
/// expiration. There is no delete: expired records stay readable and callers compare
/// the expiration against their clock.
#[async_trait]
pub trait ConfirmationCodeStore: Send + Sync {
    async fn put_confirmation_code(
        &self,
        user_id: Uuid,
        code: &str,
        expiration: DateTime<Utc>,
    ) -> Result<(), AppError>;

    async fn get_confirmation_code(&self, user_id: Uuid)
    -> Result<Option<ConfirmationCode>, AppError>;
}

/// generate_confirmation_code
///
/// Draws a fresh code from the operating system CSPRNG and hex encodes it. Nothing
/// about the user goes into the code.
pub fn generate_confirmation_code() -> String {
    let mut bytes = [0u8; CODE_ENTROPY_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
