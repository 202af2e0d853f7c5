use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use furrow_db::Database;
use furrow_notify::{MessageNotifier, NewMessageNotice};
use furrow_types::events::{
    ClientCommand, ConversationRef, MessagesReadPayload, ReadyPayload, SendMessagePayload,
    ServerEvent, TypingPayload, UserTypingPayload,
};
use furrow_types::models::{ChatMessage, NewMessage, ValidationError};

use crate::registry::{Registry, Room};
use crate::session::{SendLimits, Session};
use crate::RelayError;

/// The conversation relay: validates, persists, fans out and acknowledges
/// client events. Built once at startup and shared by every connection.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<RelayInner>,
}

struct RelayInner {
    db: Arc<Database>,
    registry: Registry,
    notifier: Arc<dyn MessageNotifier>,
    send_limits: Option<SendLimits>,
}

impl Relay {
    pub fn new(
        db: Arc<Database>,
        registry: Registry,
        notifier: Arc<dyn MessageNotifier>,
        send_limits: Option<SendLimits>,
    ) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                db,
                registry,
                notifier,
                send_limits,
            }),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Register an authenticated connection and put it in its personal room.
    /// `ready` is the first event on the returned queue.
    pub fn open_session(&self, user_id: &str) -> (Arc<Session>, mpsc::UnboundedReceiver<ServerEvent>) {
        let registry = &self.inner.registry;
        let (conn_id, rx) = registry.connect(user_id);
        registry.join_personal_room(conn_id, user_id);
        registry.emit_to_connection(
            conn_id,
            ServerEvent::Ready(ReadyPayload {
                user_id: user_id.to_string(),
            }),
        );

        let session = Session::new(conn_id, user_id, self.inner.send_limits);
        (Arc::new(session), rx)
    }

    pub fn close_session(&self, session: &Session) {
        self.inner.registry.disconnect(session.conn_id);
    }

    /// Disconnect every client. Called once on process shutdown.
    pub fn shutdown(&self) {
        let count = self.inner.registry.connection_count();
        self.inner.registry.shutdown();
        info!("Relay shut down, closed {} connections", count);
    }

    /// Handle one client command to completion.
    pub async fn handle(&self, session: &Session, cmd: ClientCommand) {
        let result = match cmd {
            ClientCommand::JoinUserRoom(user_id) => self.join_user_room(session, &user_id),
            ClientCommand::JoinConversation(conv) => self.join_conversation(session, &conv),
            ClientCommand::LeaveConversation(conv) => self.leave_conversation(session, &conv),
            ClientCommand::Typing(payload) => self.set_typing(session, payload).map(|_| ()),
            // Errors are reported to the client inside send / mark_read_as
            ClientCommand::SendMessage(payload) => {
                let _ = self.send(session, payload).await;
                Ok(())
            }
            // Same for mark-read: failures already went back as message-error
            ClientCommand::MarkRead(conv) => {
                let _ = self.mark_read_as(session, &conv).await;
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!("{} ({}) command rejected: {}", session.user_id, session.conn_id, e);
        }
    }

    pub fn join_user_room(&self, session: &Session, user_id: &str) -> Result<(), RelayError> {
        session.authorize(user_id)?;
        self.inner.registry.join_personal_room(session.conn_id, user_id);
        Ok(())
    }

    pub fn join_conversation(&self, session: &Session, conv: &ConversationRef) -> Result<(), RelayError> {
        session.authorize(&conv.user_id)?;
        check_pair(&conv.user_id, &conv.other_user_id)?;
        if self
            .inner
            .registry
            .join_conversation_room(session.conn_id, &conv.user_id, &conv.other_user_id)
        {
            debug!(
                "{} ({}) joined {}",
                session.user_id,
                session.conn_id,
                Room::conversation(&conv.user_id, &conv.other_user_id)
            );
        }
        Ok(())
    }

    pub fn leave_conversation(&self, session: &Session, conv: &ConversationRef) -> Result<(), RelayError> {
        session.authorize(&conv.user_id)?;
        self.inner
            .registry
            .leave(session.conn_id, &Room::conversation(&conv.user_id, &conv.other_user_id));
        Ok(())
    }

    /// Persist a message, fan it out, then acknowledge the originating
    /// connection with either `message-sent` or `message-error`.
    pub async fn send(
        &self,
        session: &Session,
        payload: SendMessagePayload,
    ) -> Result<ChatMessage, RelayError> {
        match self.persist_and_fan_out(session, payload).await {
            Ok(message) => {
                self.inner
                    .registry
                    .emit_to_connection(session.conn_id, ServerEvent::MessageSent(message.clone()));
                self.spawn_notification(&message);
                Ok(message)
            }
            Err(e) => {
                match &e {
                    RelayError::Storage(detail) => {
                        error!("{} ({}) send failed in storage: {}", session.user_id, session.conn_id, detail)
                    }
                    other => warn!("{} ({}) send rejected: {}", session.user_id, session.conn_id, other),
                }
                self.inner
                    .registry
                    .emit_to_connection(session.conn_id, ServerEvent::MessageError(e.to_payload()));
                Err(e)
            }
        }
    }

    async fn persist_and_fan_out(
        &self,
        session: &Session,
        payload: SendMessagePayload,
    ) -> Result<ChatMessage, RelayError> {
        session.authorize(&payload.sender_id)?;
        session.try_acquire_send()?;

        let new = NewMessage::new(
            payload.sender_id,
            payload.receiver_id,
            payload.content,
            payload.listing_id,
        )
        .validate()?;

        // Fan-out runs inside the commit so room members see messages in
        // commit order. The blocking task is not cancelled if the client
        // disconnects; the message is stored either way.
        let db = self.inner.db.clone();
        let registry = self.inner.registry.clone();
        let message = tokio::task::spawn_blocking(move || {
            db.insert_message_with(new, |message| fan_out(&registry, message))
        })
        .await
        .map_err(|e| RelayError::Storage(format!("insert task failed: {}", e)))??;

        Ok(message)
    }

    fn spawn_notification(&self, message: &ChatMessage) {
        let notifier = self.inner.notifier.clone();
        let notice = NewMessageNotice {
            message_id: message.id,
            receiver_id: message.receiver_id.clone(),
            sender_id: message.sender_id.clone(),
            sender_name: message.sender.name.clone(),
            content: message.content.clone(),
            listing_id: message.listing_id.clone(),
        };

        // Detached: the handle is dropped and nothing flows back to the relay
        tokio::spawn(async move {
            notifier.notify_new_message(notice).await;
        });
    }

    /// Relay a typing indicator to the conversation room, minus the
    /// originating connection. Returns how many connections got it.
    pub fn set_typing(&self, session: &Session, payload: TypingPayload) -> Result<usize, RelayError> {
        session.authorize(&payload.sender_id)?;
        check_pair(&payload.sender_id, &payload.receiver_id)?;

        let room = Room::conversation(&payload.sender_id, &payload.receiver_id);
        let event = ServerEvent::UserTyping(UserTypingPayload {
            sender_id: payload.sender_id,
            is_typing: payload.is_typing,
        });
        Ok(self
            .inner
            .registry
            .emit_to_room(&room, event, Some(session.conn_id)))
    }

    /// `mark-read` from a connection. Storage failures go back as `message-error`.
    pub async fn mark_read_as(&self, session: &Session, conv: &ConversationRef) -> Result<usize, RelayError> {
        let result = match session.authorize(&conv.user_id) {
            Ok(()) => self.mark_read(&conv.user_id, &conv.other_user_id).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            warn!("{} ({}) mark-read failed: {}", session.user_id, session.conn_id, e);
            self.inner
                .registry
                .emit_to_connection(session.conn_id, ServerEvent::MessageError(e.to_payload()));
        }
        result
    }

    /// Mark everything `other_user_id` sent to `viewer_id` as read, in one
    /// batch, and tell the original sender. Nothing new to mark is a no-op.
    pub async fn mark_read(&self, viewer_id: &str, other_user_id: &str) -> Result<usize, RelayError> {
        check_pair(viewer_id, other_user_id)?;

        let db = self.inner.db.clone();
        let viewer = viewer_id.to_string();
        let other = other_user_id.to_string();
        let now = Utc::now();
        let updated = tokio::task::spawn_blocking(move || db.mark_messages_read(&viewer, &other, now))
            .await
            .map_err(|e| RelayError::Storage(format!("mark-read task failed: {}", e)))??;

        if updated > 0 {
            self.inner.registry.emit_to_room(
                &Room::personal(other_user_id),
                ServerEvent::MessagesRead(MessagesReadPayload {
                    read_by: viewer_id.to_string(),
                }),
                None,
            );
            debug!("{} read {} messages from {}", viewer_id, updated, other_user_id);
        }

        Ok(updated)
    }
}

fn check_pair(user_id: &str, other_user_id: &str) -> Result<(), ValidationError> {
    if other_user_id.trim().is_empty() {
        return Err(ValidationError::MissingUserId);
    }
    if user_id == other_user_id {
        return Err(ValidationError::SelfMessage);
    }
    Ok(())
}

fn fan_out(registry: &Registry, message: &ChatMessage) {
    let to_receiver = registry.emit_to_room(
        &Room::personal(&message.receiver_id),
        ServerEvent::NewMessage(message.clone()),
        None,
    );
    let to_room = registry.emit_to_room(
        &Room::conversation(&message.sender_id, &message.receiver_id),
        ServerEvent::MessageReceived(message.clone()),
        None,
    );
    debug!(
        "Message {} fanned out: {} receiver connections, {} room connections",
        message.id, to_receiver, to_room
    );
}
