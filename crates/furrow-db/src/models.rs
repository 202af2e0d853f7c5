/// Database row types: these map directly to SQLite rows.
/// Distinct from furrow-types API models to keep the DB layer independent.
use chrono::{DateTime, Utc};
use furrow_types::models::{ChatMessage, UserSummary};
use rusqlite::Row;
use uuid::Uuid;

use crate::DbError;

pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
}

impl UserRow {
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}

/// A message joined with both participants' names.
pub struct MessageRow {
    pub seq: i64,
    pub id: String,
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub receiver_id: String,
    pub receiver_name: Option<String>,
    pub content: String,
    pub listing_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

/// Column list matching `MessageRow::from_row`.
pub(crate) const MESSAGE_COLUMNS: &str = "m.seq, m.id, m.sender_id, s.name, m.receiver_id, r.name, \
     m.content, m.listing_id, m.created_at, m.read_at \
     FROM messages m \
     LEFT JOIN users s ON s.id = m.sender_id \
     LEFT JOIN users r ON r.id = m.receiver_id";

impl MessageRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            seq: row.get(0)?,
            id: row.get(1)?,
            sender_id: row.get(2)?,
            sender_name: row.get(3)?,
            receiver_id: row.get(4)?,
            receiver_name: row.get(5)?,
            content: row.get(6)?,
            listing_id: row.get(7)?,
            created_at: row.get(8)?,
            read_at: row.get(9)?,
        })
    }

    pub fn into_message(self) -> Result<ChatMessage, DbError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| DbError::Corrupt(format!("message id '{}': {}", self.id, e)))?;

        // A user missing from the directory mirror still renders, by id
        let sender_name = self.sender_name.unwrap_or_else(|| self.sender_id.clone());
        let receiver_name = self
            .receiver_name
            .unwrap_or_else(|| self.receiver_id.clone());

        Ok(ChatMessage {
            id,
            seq: self.seq,
            sender: UserSummary {
                id: self.sender_id.clone(),
                name: sender_name,
            },
            receiver: UserSummary {
                id: self.receiver_id.clone(),
                name: receiver_name,
            },
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            content: self.content,
            listing_id: self.listing_id,
            created_at: self.created_at,
            read_at: self.read_at,
        })
    }
}
