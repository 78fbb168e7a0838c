//! Inbound e-mail notification requests.

use serde::Deserialize;

use courier_common::error::AppError;
use courier_common::types::NotificationMessage;

/// Body of `POST /api/notifications/email`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EmailNotificationRequest {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl EmailNotificationRequest {
    pub fn new(
        to: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }

    /// Check every field and report all problems at once.
    pub fn validate(&self) -> Result<(), AppError> {
        let mut errors = Vec::new();

        if self.to.trim().is_empty() {
            errors.push("to: must not be blank");
        } else if !is_email_address(self.to.trim()) {
            errors.push("to: must be a well-formed email address");
        }
        if self.subject.trim().is_empty() {
            errors.push("subject: must not be blank");
        }
        if self.body.trim().is_empty() {
            errors.push("body: must not be blank");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(errors.join("; ")))
        }
    }

    /// Build the message that goes on the wire. Assigns a fresh id.
    pub fn to_message(&self) -> NotificationMessage {
        NotificationMessage::email(self.to.trim(), &self.subject, &self.body)
    }
}

/// `local@domain.tld` with no whitespace and a single `@`.
fn is_email_address(address: &str) -> bool {
    if address.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = address.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((name, tld)) => !name.is_empty() && !tld.is_empty() && !name.ends_with('.'),
        None => false,
    }
}
