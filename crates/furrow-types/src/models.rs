use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Upper bound on message length, counted in characters after trimming.
pub const MAX_MESSAGE_CHARS: usize = 5000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub name: String,
}

/// A persisted message, hydrated with both participants' display fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    /// Store-assigned commit order. The only authoritative ordering.
    pub seq: i64,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub listing_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
    pub sender: UserSummary,
    pub receiver: UserSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("message content is empty")]
    EmptyContent,
    #[error("message content exceeds {max} characters")]
    ContentTooLong { max: usize },
    #[error("sender and receiver are the same user")]
    SelfMessage,
    #[error("missing user id")]
    MissingUserId,
    #[error("unknown user: {0}")]
    UnknownUser(String),
}

/// An inbound message before persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub listing_id: Option<String>,
}

impl NewMessage {
    pub fn new(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        content: impl Into<String>,
        listing_id: Option<String>,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            content: content.into(),
            listing_id,
        }
    }

    /// Check the invariants that do not need the store and normalize the
    /// payload: content is trimmed, a blank listing id becomes `None`.
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.sender_id.trim().is_empty() || self.receiver_id.trim().is_empty() {
            return Err(ValidationError::MissingUserId);
        }
        if self.sender_id == self.receiver_id {
            return Err(ValidationError::SelfMessage);
        }

        let content = self.content.trim();
        if content.is_empty() {
            return Err(ValidationError::EmptyContent);
        }
        if content.chars().count() > MAX_MESSAGE_CHARS {
            return Err(ValidationError::ContentTooLong {
                max: MAX_MESSAGE_CHARS,
            });
        }

        let listing_id = self
            .listing_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        Ok(Self {
            content: content.to_string(),
            listing_id,
            ..self
        })
    }
}

/// One entry in a user's inbox: the other participant, the latest message
/// and how many messages the viewer has not read yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub other_user: UserSummary,
    pub last_message: ChatMessage,
    pub unread_count: u64,
}

// -- Notifications --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Push,
    Email,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Message,
    Listing,
    Review,
    Payment,
}

/// Toggles for one delivery channel. `enabled` is the channel master switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelToggles {
    pub enabled: bool,
    pub messages: bool,
    pub listings: bool,
    pub reviews: bool,
    pub payments: bool,
}

impl ChannelToggles {
    pub const ALL: Self = Self {
        enabled: true,
        messages: true,
        listings: true,
        reviews: true,
        payments: true,
    };

    pub fn allows(&self, category: Category) -> bool {
        let category_on = match category {
            Category::Message => self.messages,
            Category::Listing => self.listings,
            Category::Review => self.reviews,
            Category::Payment => self.payments,
        };
        self.enabled && category_on
    }
}

/// Per-user notification settings, owned by the account settings service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPreference {
    pub push: ChannelToggles,
    pub email: ChannelToggles,
}

impl NotificationPreference {
    pub fn allows(&self, channel: Channel, category: Category) -> bool {
        match channel {
            Channel::Push => self.push.allows(category),
            Channel::Email => self.email.allows(category),
        }
    }
}

impl Default for NotificationPreference {
    fn default() -> Self {
        Self {
            push: ChannelToggles::ALL,
            email: ChannelToggles::ALL,
        }
    }
}

/// A registered browser/device push endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscription {
    pub id: String,
    pub user_id: String,
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
}
