//! Outbound notifications (reset links, temporary credentials).
//!
//! Delivery is behind [`EmailSender`]. The default [`LogEmailSender`] logs the
//! recipient and template only; secrets in the payload never reach the logs.
//! Tests use [`MemoryOutbox`] to read back what would have been delivered.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::{Mutex, PoisonError};
use tracing::info;
use url::Url;

pub const PASSWORD_RESET_TEMPLATE: &str = "password_reset";
pub const ACCOUNT_CREDENTIALS_TEMPLATE: &str = "account_credentials";

#[derive(Clone, Debug)]
pub struct EmailMessage {
    pub to_email: String,
    pub template: String,
    pub payload_json: String,
}

/// Email delivery abstraction.
pub trait EmailSender: Send + Sync {
    /// # Errors
    /// Returns an error when the message could not be handed off.
    fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Local dev sender that logs instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

impl EmailSender for LogEmailSender {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to_email = %message.to_email,
            template = %message.template,
            "email send stub"
        );
        Ok(())
    }
}

/// Records messages in memory.
#[derive(Debug, Default)]
pub struct MemoryOutbox {
    messages: Mutex<Vec<EmailMessage>>,
}

impl MemoryOutbox {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn messages(&self) -> Vec<EmailMessage> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EmailSender for MemoryOutbox {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        Ok(())
    }
}

/// `{base}/reset-password#token=<token>`. The token rides in the fragment so
/// it is never sent to the frontend host in a request line.
///
/// # Errors
/// Returns an error if `frontend_base_url` is not an absolute URL.
pub fn build_reset_url(frontend_base_url: &str, token: &str) -> Result<String> {
    let base = frontend_base_url.trim_end_matches('/');
    let mut url = Url::parse(&format!("{base}/reset-password"))
        .with_context(|| format!("invalid frontend base URL: {frontend_base_url}"))?;
    url.set_fragment(Some(&format!("token={token}")));
    Ok(url.to_string())
}

#[must_use]
pub fn reset_message(to_email: &str, reset_url: &str, expires_at: DateTime<Utc>) -> EmailMessage {
    EmailMessage {
        to_email: to_email.to_string(),
        template: PASSWORD_RESET_TEMPLATE.to_string(),
        payload_json: json!({
            "resetUrl": reset_url,
            "expiresAt": expires_at,
        })
        .to_string(),
    }
}

#[must_use]
pub fn credentials_message(to_email: &str, temporary_password: &str, login_url: &str) -> EmailMessage {
    EmailMessage {
        to_email: to_email.to_string(),
        template: ACCOUNT_CREDENTIALS_TEMPLATE.to_string(),
        payload_json: json!({
            "temporaryPassword": temporary_password,
            "loginUrl": login_url,
        })
        .to_string(),
    }
}
