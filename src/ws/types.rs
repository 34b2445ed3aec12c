//! WebSocket frame types.
//!
//! Outbound frames are serialized [`ChatMessage`](crate::chat::ChatMessage)
//! records; the only inbound frame is a chat line.

use serde::Deserialize;

/// Frame sent by a client to post a text message.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_inbound_frame() {
        let frame: InboundFrame = serde_json::from_str(r#"{"content":"hi"}"#).unwrap();
        assert_eq!(frame.content, "hi");
    }

    #[test]
    fn test_inbound_frame_ignores_extra_fields() {
        let frame: InboundFrame =
            serde_json::from_str(r#"{"content":"hi","type":"text"}"#).unwrap();
        assert_eq!(frame.content, "hi");
    }

    #[test]
    fn test_inbound_frame_requires_content() {
        assert!(serde_json::from_str::<InboundFrame>(r#"{"text":"hi"}"#).is_err());
    }
}
