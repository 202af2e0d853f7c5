use serde::{Deserialize, Serialize};

use crate::models::ChatMessage;

/// Names a conversation from one participant's side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRef {
    pub user_id: String,
    pub other_user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    #[serde(default)]
    pub listing_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub sender_id: String,
    pub receiver_id: String,
    pub is_typing: bool,
}

/// Commands sent FROM client TO server over WebSocket.
///
/// Frames look like `{"event": "send-message", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientCommand {
    /// Join the personal room `user-{id}`
    JoinUserRoom(String),

    /// Join the shared room for a pair of users
    JoinConversation(ConversationRef),

    /// Leave a conversation room before disconnecting
    LeaveConversation(ConversationRef),

    SendMessage(SendMessagePayload),

    Typing(TypingPayload),

    /// Mark everything `otherUserId` sent to `userId` as read
    MarkRead(ConversationRef),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyPayload {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageErrorPayload {
    /// Human readable, never includes storage details
    pub error: String,
    /// Stable machine readable code
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTypingPayload {
    pub sender_id: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesReadPayload {
    pub read_by: String,
}

/// Events sent FROM server TO client over WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Connection authenticated and registered
    Ready(ReadyPayload),

    /// Delivered to every connection in the receiver's personal room
    NewMessage(ChatMessage),

    /// Delivered to every connection in the conversation room
    MessageReceived(ChatMessage),

    /// Acknowledgement to the originating connection only
    MessageSent(ChatMessage),

    /// Send failure, to the originating connection only
    MessageError(MessageErrorPayload),

    UserTyping(UserTypingPayload),

    /// Read receipt for the original sender
    MessagesRead(MessagesReadPayload),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready(_) => "ready",
            Self::NewMessage(_) => "new-message",
            Self::MessageReceived(_) => "message-received",
            Self::MessageSent(_) => "message-sent",
            Self::MessageError(_) => "message-error",
            Self::UserTyping(_) => "user-typing",
            Self::MessagesRead(_) => "messages-read",
        }
    }
}
