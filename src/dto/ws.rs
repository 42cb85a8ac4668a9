use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    dto::{format_timestamp, validation::validate_not_blank},
    state::{
        message::Message,
        room::{RoomId, UserId},
    },
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
/// Event pushed to every connection of a room, for chat and system notices alike.
pub struct RoomEventPayload {
    /// `debate_message` or `system_message`.
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    /// Author, 0 for system notices.
    pub user_id: UserId,
    pub room_id: RoomId,
    /// Author's role, `system` for notices.
    pub role: String,
    /// RFC 3339 timestamp.
    pub timestamp: String,
}

impl From<&Message> for RoomEventPayload {
    fn from(message: &Message) -> Self {
        Self {
            kind: message.type_label().to_owned(),
            content: message.content.clone(),
            user_id: message.author_id(),
            room_id: message.room_id,
            role: message.role_label().to_owned(),
            timestamp: format_timestamp(message.timestamp),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
/// Frames accepted from room WebSocket clients.
#[serde(tag = "type")]
pub enum RoomInboundMessage {
    #[serde(rename = "debate_message")]
    DebateMessage(ChatInput),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema, Validate)]
/// Chat text typed by a room member.
pub struct ChatInput {
    #[validate(length(min = 1, max = 2000), custom(function = "validate_not_blank"))]
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_chat_frame_is_recognised() {
        let frame: RoomInboundMessage =
            serde_json::from_str(r#"{"type":"debate_message","content":"I rebut"}"#).unwrap();
        let RoomInboundMessage::DebateMessage(input) = frame else {
            panic!("expected a chat frame");
        };
        assert_eq!(input.content, "I rebut");
        assert!(input.validate().is_ok());
    }

    #[test]
    fn unknown_frame_types_are_tolerated() {
        let frame: RoomInboundMessage = serde_json::from_str(r#"{"type":"typing"}"#).unwrap();
        assert!(matches!(frame, RoomInboundMessage::Unknown));
    }
}
