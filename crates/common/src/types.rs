use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Type tag for e-mail notifications.
pub const TYPE_EMAIL: &str = "EMAIL";

/// Type tag for placeholders built from payloads that could not be parsed.
pub const TYPE_UNKNOWN: &str = "UNKNOWN";

/// Marks a placeholder `body` holding base64 of a payload that was not UTF-8.
pub const BINARY_BODY_PREFIX: &str = "base64:";

/// A notification in flight between the publisher and the notifier.
///
/// Every field is optional on the wire: a malformed or partial payload still
/// deserializes as long as it is a JSON object, and absent fields are written
/// back as `null` when the message is dead-lettered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationMessage {
    /// Producer-generated identifier, also used as the broker partition key
    #[serde(default)]
    pub id: Option<String>,
    /// Channel kind (e.g., "EMAIL")
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// Destination address
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl NotificationMessage {
    /// Build a fresh e-mail notification with a new UUID and the current time.
    pub fn email(
        to: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: Some(Uuid::new_v4().to_string()),
            kind: Some(TYPE_EMAIL.to_string()),
            to: Some(to.into()),
            subject: Some(subject.into()),
            body: Some(body.into()),
            created_at: Some(Utc::now()),
        }
    }

    /// Placeholder for a payload that failed to deserialize.
    ///
    /// UTF-8 payloads are kept verbatim in `body`. Anything else is stored as
    /// [`BINARY_BODY_PREFIX`] followed by the standard base64 encoding, so the
    /// original bytes can always be recovered.
    pub fn unparseable(raw: &[u8]) -> Self {
        let body = match std::str::from_utf8(raw) {
            Ok(text) => text.to_string(),
            Err(_) => format!("{BINARY_BODY_PREFIX}{}", general_purpose::STANDARD.encode(raw)),
        };
        Self {
            kind: Some(TYPE_UNKNOWN.to_string()),
            body: Some(body),
            ..Self::default()
        }
    }

    /// The message id, or `"null"` for diagnostics when absent.
    pub fn display_id(&self) -> &str {
        self.id.as_deref().unwrap_or("null")
    }

    /// The message id if present and not blank.
    pub fn key(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.trim().is_empty())
    }
}

/// Record published to the dead-letter topic for a message that could not be
/// processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterEnvelope {
    /// Freshly generated dead-letter id
    pub id: String,
    pub failed_at: DateTime<Utc>,
    /// Human-readable cause, including attempt count or parse error detail
    pub reason: String,
    /// The original message, possibly partially populated
    pub message: NotificationMessage,
}

impl DeadLetterEnvelope {
    pub fn new(message: NotificationMessage, reason: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            failed_at: Utc::now(),
            reason: reason.into(),
            message,
        }
    }

    /// Broker key for this record: the original message id when present,
    /// otherwise the dead-letter id.
    pub fn key(&self) -> &str {
        self.message.key().unwrap_or(&self.id)
    }
}

/// Outcome reported to HTTP callers once a publish request has been queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PublishStatus {
    Accepted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_uses_camel_case_wire_names() {
        let msg = NotificationMessage::email("user@example.com", "Hello", "Body");
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["type"], "EMAIL");
        assert_eq!(json["to"], "user@example.com");
        assert!(json.get("createdAt").is_some());
        assert!(json.get("created_at").is_none());
        assert!(json.get("kind").is_none());
    }

    #[test]
    fn test_missing_fields_deserialize_as_absent() {
        let msg: NotificationMessage = serde_json::from_str(r#"{"to":"a@b.io"}"#).unwrap();
        assert_eq!(msg.to.as_deref(), Some("a@b.io"));
        assert!(msg.id.is_none());
        assert!(msg.created_at.is_none());
    }

    #[test]
    fn test_absent_fields_serialize_as_null() {
        let json = serde_json::to_value(NotificationMessage::unparseable(b"oops")).unwrap();
        assert!(json["id"].is_null());
        assert!(json["to"].is_null());
        assert_eq!(json["type"], "UNKNOWN");
        assert_eq!(json["body"], "oops");
    }

    #[test]
    fn test_unparseable_keeps_raw_payload() {
        let msg = NotificationMessage::unparseable(b"{ invalid-json }");
        assert_eq!(msg.kind.as_deref(), Some(TYPE_UNKNOWN));
        assert_eq!(msg.body.as_deref(), Some("{ invalid-json }"));
        assert_eq!(msg.display_id(), "null");
    }

    #[test]
    fn test_unparseable_binary_payload_is_recoverable() {
        let raw = [0xff, 0xfe, b'{', 0x00, 0x80];
        let msg = NotificationMessage::unparseable(&raw);

        let body = msg.body.unwrap();
        let encoded = body.strip_prefix(BINARY_BODY_PREFIX).unwrap();
        let decoded = general_purpose::STANDARD.decode(encoded).unwrap();
        assert_eq!(decoded, raw);
    }

    #[test]
    fn test_blank_id_is_not_a_key() {
        let msg = NotificationMessage {
            id: Some("   ".to_string()),
            ..NotificationMessage::default()
        };
        assert!(msg.key().is_none());
    }

    #[test]
    fn test_dead_letter_key_prefers_message_id() {
        let msg = NotificationMessage::email("user@example.com", "FAIL", "Body");
        let envelope = DeadLetterEnvelope::new(msg.clone(), "reason");
        assert_eq!(envelope.key(), msg.id.as_deref().unwrap());
        assert_ne!(envelope.id, envelope.key());
    }

    #[test]
    fn test_dead_letter_key_falls_back_to_own_id() {
        let envelope = DeadLetterEnvelope::new(NotificationMessage::default(), "reason");
        assert_eq!(envelope.key(), envelope.id);
        assert!(!envelope.key().is_empty());
    }

    #[test]
    fn test_dead_letter_wire_format() {
        let msg = NotificationMessage::email("user@example.com", "FAIL", "Body");
        let envelope = DeadLetterEnvelope::new(msg, "Permanent failure after 3 attempts: boom");
        let json = serde_json::to_value(&envelope).unwrap();

        assert!(json["id"].is_string());
        assert!(json["failedAt"].is_string());
        assert_eq!(json["reason"], "Permanent failure after 3 attempts: boom");
        assert_eq!(json["message"]["to"], "user@example.com");
        assert_eq!(json["message"]["type"], "EMAIL");
    }
}
