use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};

// 1. Mailer Contract
/// Mailer
///
/// Abstract contract for the out-of-band delivery collaborator. Handlers and services
/// depend on this trait only, so the HTTP relay in production can be swapped for the
/// recording mock in tests.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Hands one message to the transport. Failures are reported but never retried here.
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError>;
}

/// OutgoingMail
///
/// A single plain-text message.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OutgoingMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mail relay request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("mail relay rejected the message with status {0}")]
    Rejected(u16),
    #[error("{0}")]
    Simulated(String),
}

/// confirmation_mail
///
/// Builds the message that carries a freshly issued confirmation code.
pub fn confirmation_mail(from: &str, to: &str, code: &str, ttl_secs: i64) -> OutgoingMail {
    let minutes = ttl_secs / 60;
    OutgoingMail {
        from: from.to_string(),
        to: to.to_string(),
        subject: "Confirmation code for obtaining an access token".to_string(),
        body: format!(
            "Your confirmation code for obtaining a token: \"{code}\".\n\
             The code is valid for {minutes} minutes."
        ),
    }
}

// 2. The Real Implementation (HTTP relay)
/// HttpMailer
///
/// Posts each message as JSON to a mail relay (any provider exposing a simple
/// "send" webhook). The API key, when configured, travels in the `apikey` header.
#[derive(Clone)]
pub struct HttpMailer {
    client: reqwest::Client,
    relay_url: String,
    api_key: Option<String>,
}

impl HttpMailer {
    pub fn new(relay_url: &str, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            relay_url: relay_url.to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        let mut request = self
            .client
            .post(&self.relay_url)
            .header("Content-Type", "application/json")
            .json(mail);
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(MailError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

/// LogMailer
///
/// Local-development transport: writes the message to the log instead of sending it.
#[derive(Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        tracing::info!(to = %mail.to, subject = %mail.subject, "mail (log only):\n{}", mail.body);
        Ok(())
    }
}

// 3. The Mock Implementation (For Tests)
/// MockMailer
///
/// Records every message so tests can read the delivered confirmation code.
#[derive(Clone, Default)]
pub struct MockMailer {
    /// When true, every send returns a simulated failure (the message is still recorded).
    pub should_fail: bool,
    sent: Arc<Mutex<Vec<OutgoingMail>>>,
}

impl MockMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The most recent confirmation code mailed to `to`, parsed from the body.
    pub fn last_code_for(&self, to: &str) -> Option<String> {
        self.sent()
            .iter()
            .rev()
            .find(|mail| mail.to == to)
            .and_then(|mail| mail.body.split('"').nth(1).map(str::to_string))
    }
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(mail.clone());
        if self.should_fail {
            return Err(MailError::Simulated(
                "Mock Mailer Error: Simulation requested".to_string(),
            ));
        }
        Ok(())
    }
}

/// MailerState
///
/// The concrete type used to share the mail transport across the application state.
pub type MailerState = Arc<dyn Mailer>;
