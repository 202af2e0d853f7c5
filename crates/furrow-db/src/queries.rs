use chrono::{DateTime, Utc};
use furrow_types::api::{MessagePage, Pagination, SortOrder};
use furrow_types::models::{
    ChannelToggles, ChatMessage, ConversationSummary, NewMessage, NotificationPreference,
    PushSubscription, ValidationError,
};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::models::{MESSAGE_COLUMNS, MessageRow, UserRow};
use crate::{Database, Result};

impl Database {
    // -- Users --

    /// Insert or refresh a directory entry pushed by the account service.
    pub fn upsert_user(&self, id: &str, name: &str, email: Option<&str>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, email) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    email = excluded.email,
                    updated_at = datetime('now')",
                params![id, name, email],
            )?;
            Ok(())
        })
    }

    pub fn get_user(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, id))
    }

    pub fn user_exists(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| Ok(query_user(conn, id)?.is_some()))
    }

    // -- Messages --

    pub fn insert_message(&self, new: NewMessage) -> Result<ChatMessage> {
        self.insert_message_with(new, |_| {})
    }

    /// Validate and insert a message, then run `on_commit` with the hydrated
    /// row while the write lock is still held. Callers that fan out inside
    /// `on_commit` publish messages in exactly the order they were committed.
    pub fn insert_message_with<F>(&self, new: NewMessage, on_commit: F) -> Result<ChatMessage>
    where
        F: FnOnce(&ChatMessage),
    {
        let new = new.validate()?;

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            for user_id in [&new.sender_id, &new.receiver_id] {
                if query_user(&tx, user_id)?.is_none() {
                    return Err(ValidationError::UnknownUser(user_id.clone()).into());
                }
            }

            tx.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, content, listing_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    Uuid::new_v4().to_string(),
                    new.sender_id,
                    new.receiver_id,
                    new.content,
                    new.listing_id,
                    Utc::now(),
                ],
            )?;
            let seq = tx.last_insert_rowid();
            let message = query_message_by_seq(&tx, seq)?;
            tx.commit()?;

            on_commit(&message);
            Ok(message)
        })
    }

    /// Mark every unread message `sender_id` sent to `receiver_id` as read at
    /// `now`, in one statement. Returns the number of rows changed.
    pub fn mark_messages_read(
        &self,
        receiver_id: &str,
        sender_id: &str,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE messages SET read_at = ?1
                 WHERE sender_id = ?2 AND receiver_id = ?3 AND read_at IS NULL",
                params![now, sender_id, receiver_id],
            )?;
            Ok(updated)
        })
    }

    pub fn fetch_conversation(
        &self,
        user_id: &str,
        other_user_id: &str,
        page: Pagination,
    ) -> Result<MessagePage> {
        self.with_conn(|conn| query_conversation(conn, user_id, other_user_id, page))
    }

    /// Messages from `other_user_id` that `viewer_id` has not read.
    pub fn unread_count(&self, viewer_id: &str, other_user_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE receiver_id = ?1 AND sender_id = ?2 AND read_at IS NULL",
                params![viewer_id, other_user_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    pub fn total_unread(&self, viewer_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE receiver_id = ?1 AND read_at IS NULL",
                [viewer_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Inbox for `user_id`, most recently active conversation first.
    pub fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationSummary>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT other_id, MAX(seq) AS last_seq,
                        SUM(CASE WHEN receiver_id = ?1 AND read_at IS NULL THEN 1 ELSE 0 END)
                 FROM (
                    SELECT seq, receiver_id, read_at,
                           CASE WHEN sender_id = ?1 THEN receiver_id ELSE sender_id END AS other_id
                    FROM messages
                    WHERE sender_id = ?1 OR receiver_id = ?1
                 )
                 GROUP BY other_id
                 ORDER BY last_seq DESC",
            )?;

            let heads = stmt
                .query_map([user_id], |row| {
                    Ok((row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut summaries = Vec::with_capacity(heads.len());
            for (last_seq, unread) in heads {
                let last_message = query_message_by_seq(conn, last_seq)?;
                let other_user = if last_message.sender_id == user_id {
                    last_message.receiver.clone()
                } else {
                    last_message.sender.clone()
                };
                summaries.push(ConversationSummary {
                    other_user,
                    last_message,
                    unread_count: unread as u64,
                });
            }

            Ok(summaries)
        })
    }

    // -- Notification preferences --

    /// Stored preferences, or everything enabled when the user never saved any.
    pub fn notification_preference(&self, user_id: &str) -> Result<NotificationPreference> {
        self.with_conn(|conn| {
            let pref = conn
                .query_row(
                    "SELECT push_enabled, push_messages, push_listings, push_reviews, push_payments,
                            email_enabled, email_messages, email_listings, email_reviews, email_payments
                     FROM notification_preferences WHERE user_id = ?1",
                    [user_id],
                    |row| {
                        Ok(NotificationPreference {
                            push: ChannelToggles {
                                enabled: row.get(0)?,
                                messages: row.get(1)?,
                                listings: row.get(2)?,
                                reviews: row.get(3)?,
                                payments: row.get(4)?,
                            },
                            email: ChannelToggles {
                                enabled: row.get(5)?,
                                messages: row.get(6)?,
                                listings: row.get(7)?,
                                reviews: row.get(8)?,
                                payments: row.get(9)?,
                            },
                        })
                    },
                )
                .optional()?;

            Ok(pref.unwrap_or_default())
        })
    }

    pub fn set_notification_preference(
        &self,
        user_id: &str,
        pref: &NotificationPreference,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO notification_preferences (
                    user_id,
                    push_enabled, push_messages, push_listings, push_reviews, push_payments,
                    email_enabled, email_messages, email_listings, email_reviews, email_payments
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    user_id,
                    pref.push.enabled,
                    pref.push.messages,
                    pref.push.listings,
                    pref.push.reviews,
                    pref.push.payments,
                    pref.email.enabled,
                    pref.email.messages,
                    pref.email.listings,
                    pref.email.reviews,
                    pref.email.payments,
                ],
            )?;
            Ok(())
        })
    }

    // -- Push subscriptions --

    pub fn add_push_subscription(&self, sub: &PushSubscription) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO push_subscriptions (id, user_id, endpoint, p256dh, auth)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(endpoint) DO UPDATE SET
                    user_id = excluded.user_id,
                    p256dh = excluded.p256dh,
                    auth = excluded.auth,
                    active = 1",
                params![sub.id, sub.user_id, sub.endpoint, sub.p256dh, sub.auth],
            )?;
            Ok(())
        })
    }

    pub fn active_push_subscriptions(&self, user_id: &str) -> Result<Vec<PushSubscription>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, endpoint, p256dh, auth FROM push_subscriptions
                 WHERE user_id = ?1 AND active = 1
                 ORDER BY created_at",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(PushSubscription {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        endpoint: row.get(2)?,
                        p256dh: row.get(3)?,
                        auth: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Returns false if the subscription was unknown or already inactive.
    pub fn deactivate_push_subscription(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE push_subscriptions SET active = 0 WHERE id = ?1 AND active = 1",
                [id],
            )?;
            Ok(updated > 0)
        })
    }
}

fn query_user(conn: &Connection, id: &str) -> Result<Option<UserRow>> {
    let row = conn
        .query_row(
            "SELECT id, name, email FROM users WHERE id = ?1",
            [id],
            |row| {
                Ok(UserRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    email: row.get(2)?,
                })
            },
        )
        .optional()?;

    Ok(row)
}

fn query_message_by_seq(conn: &Connection, seq: i64) -> Result<ChatMessage> {
    let sql = format!("SELECT {} WHERE m.seq = ?1", MESSAGE_COLUMNS);
    let row = conn.query_row(&sql, [seq], MessageRow::from_row)?;
    row.into_message()
}

fn query_conversation(
    conn: &Connection,
    user_id: &str,
    other_user_id: &str,
    page: Pagination,
) -> Result<MessagePage> {
    let limit = page.clamped_limit();

    let (bound, direction) = match page.order {
        SortOrder::Asc => ("m.seq > ?3", "ASC"),
        SortOrder::Desc => ("m.seq < ?3", "DESC"),
    };
    let cursor = page.cursor.unwrap_or(match page.order {
        SortOrder::Asc => 0,
        SortOrder::Desc => i64::MAX,
    });

    let sql = format!(
        "SELECT {}
         WHERE ((m.sender_id = ?1 AND m.receiver_id = ?2)
             OR (m.sender_id = ?2 AND m.receiver_id = ?1))
           AND {}
         ORDER BY m.seq {}
         LIMIT ?4",
        MESSAGE_COLUMNS, bound, direction
    );

    // Fetch one extra row to learn whether another page exists
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            params![user_id, other_user_id, cursor, limit as i64 + 1],
            MessageRow::from_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let has_more = rows.len() > limit as usize;
    let messages = rows
        .into_iter()
        .take(limit as usize)
        .map(MessageRow::into_message)
        .collect::<Result<Vec<_>>>()?;

    let next_cursor = if has_more {
        messages.last().map(|m| m.seq)
    } else {
        None
    };

    Ok(MessagePage {
        messages,
        next_cursor,
    })
}
