//! Chat log models.

use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Kind of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    File,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::File => "file",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "file" => Ok(Self::File),
            other => Err(anyhow!("invalid message kind: {other}")),
        }
    }
}

/// A persisted chat message, as stored in the log and sent to clients.
///
/// Serialized as `{id, nickname, content, type, fileId, timestamp}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Log-assigned identifier, strictly increasing in creation order.
    pub id: i64,
    /// Display name of the author.
    pub nickname: String,
    /// Message text, or the original filename for file messages.
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Attachment id; always set for file messages, never for text.
    pub file_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

/// Stored attachment metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Attachment {
    pub id: i64,
    /// Filename supplied by the uploader.
    pub original_name: String,
    /// Server-generated blob name inside the upload directory.
    pub stored_name: String,
}

/// Raw `messages` row.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct MessageRow {
    pub id: i64,
    pub nickname: String,
    pub content: String,
    pub kind: String,
    pub file_id: Option<i64>,
    pub created_at: i64,
}

impl TryFrom<MessageRow> for ChatMessage {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let timestamp = DateTime::from_timestamp_millis(row.created_at)
            .ok_or_else(|| anyhow!("message {} has invalid timestamp {}", row.id, row.created_at))?;
        Ok(Self {
            id: row.id,
            nickname: row.nickname,
            content: row.content,
            kind: row.kind.parse()?,
            file_id: row.file_id,
            timestamp,
        })
    }
}

/// Current time truncated to the millisecond precision the log stores.
pub fn now_millis() -> DateTime<Utc> {
    truncate_millis(Utc::now())
}

pub(crate) fn truncate_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_message_wire_shape() {
        let msg = ChatMessage {
            id: 7,
            nickname: "alice".to_string(),
            content: "hi".to_string(),
            kind: MessageKind::Text,
            file_id: None,
            timestamp: DateTime::from_timestamp_millis(1_700_000_000_123).unwrap(),
        };

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "id": 7,
                "nickname": "alice",
                "content": "hi",
                "type": "text",
                "fileId": null,
                "timestamp": "2023-11-14T22:13:20.123Z",
            })
        );
    }

    #[test]
    fn test_file_message_carries_file_id() {
        let msg = ChatMessage {
            id: 1,
            nickname: "bob".to_string(),
            content: "report.pdf".to_string(),
            kind: MessageKind::File,
            file_id: Some(3),
            timestamp: now_millis(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "file");
        assert_eq!(value["fileId"], 3);
    }

    #[test]
    fn test_message_kind_parse() {
        assert_eq!("text".parse::<MessageKind>().unwrap(), MessageKind::Text);
        assert_eq!("file".parse::<MessageKind>().unwrap(), MessageKind::File);
        assert!("image".parse::<MessageKind>().is_err());
    }

    #[test]
    fn test_row_conversion_rejects_unknown_kind() {
        let row = MessageRow {
            id: 1,
            nickname: "a".to_string(),
            content: "b".to_string(),
            kind: "video".to_string(),
            file_id: None,
            created_at: 0,
        };
        assert!(ChatMessage::try_from(row).is_err());
    }
}
