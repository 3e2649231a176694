use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Shown in place of an empty subject line
pub const NO_SUBJECT: &str = "(No Subject)";

/// A disposable mailbox identity
///
/// The creation endpoint may omit `created_at`; the local receive time is
/// used instead so a persisted account always carries a timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: String,
    pub email: String,
    #[serde(default = "chrono::Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// An inbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    pub received_at: DateTime<Utc>,
}

impl Message {
    /// Subject line for display, falling back to "(No Subject)"
    pub fn display_subject(&self) -> &str {
        if self.subject.is_empty() {
            NO_SUBJECT
        } else {
            &self.subject
        }
    }
}

/// Response wrapper for the inbox listing endpoint
#[derive(Debug, Deserialize)]
pub struct EmailListResponse {
    /// The service encodes an empty inbox as `null`
    #[serde(default)]
    pub emails: Option<Vec<Message>>,
}

/// Response wrapper for the message detail endpoint
#[derive(Debug, Deserialize)]
pub struct EmailDetailResponse {
    pub email: Message,
}

/// Message ids come back as JSON numbers from the reference service
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    })
}
