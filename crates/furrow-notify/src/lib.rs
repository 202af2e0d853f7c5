//! Outbound notifications for new chat messages.
//!
//! Nothing in this crate reports back to the message sender. Every failure
//! ends as a log line inside [`Notifier`].

pub mod dispatcher;
pub mod email;
pub mod error;
pub mod push;
pub mod store;

use async_trait::async_trait;
use uuid::Uuid;

pub use dispatcher::{DeliveryReport, Notifier};
pub use error::DeliveryError;

/// What the relay hands over once a message is persisted and broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessageNotice {
    pub message_id: Uuid,
    pub receiver_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub listing_id: Option<String>,
}

/// Seam between the relay and notification delivery.
#[async_trait]
pub trait MessageNotifier: Send + Sync + 'static {
    async fn notify_new_message(&self, notice: NewMessageNotice);
}
