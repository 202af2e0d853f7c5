use rusqlite::Connection;
use tracing::info;

use crate::Result;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- Mirror of the account directory, kept in sync by the account service
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            email       TEXT,
            updated_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS messages (
            seq         INTEGER PRIMARY KEY AUTOINCREMENT,
            id          TEXT NOT NULL UNIQUE,
            sender_id   TEXT NOT NULL REFERENCES users(id),
            receiver_id TEXT NOT NULL REFERENCES users(id),
            content     TEXT NOT NULL CHECK (length(trim(content)) > 0),
            listing_id  TEXT,
            created_at  TEXT NOT NULL,
            read_at     TEXT,
            CHECK (sender_id <> receiver_id)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_pair
            ON messages(sender_id, receiver_id, seq);

        CREATE INDEX IF NOT EXISTS idx_messages_unread
            ON messages(receiver_id, read_at);

        CREATE TABLE IF NOT EXISTS notification_preferences (
            user_id         TEXT PRIMARY KEY REFERENCES users(id),
            push_enabled    INTEGER NOT NULL DEFAULT 1,
            push_messages   INTEGER NOT NULL DEFAULT 1,
            push_listings   INTEGER NOT NULL DEFAULT 1,
            push_reviews    INTEGER NOT NULL DEFAULT 1,
            push_payments   INTEGER NOT NULL DEFAULT 1,
            email_enabled   INTEGER NOT NULL DEFAULT 1,
            email_messages  INTEGER NOT NULL DEFAULT 1,
            email_listings  INTEGER NOT NULL DEFAULT 1,
            email_reviews   INTEGER NOT NULL DEFAULT 1,
            email_payments  INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS push_subscriptions (
            id          TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL REFERENCES users(id),
            endpoint    TEXT NOT NULL UNIQUE,
            p256dh      TEXT NOT NULL,
            auth        TEXT NOT NULL,
            active      INTEGER NOT NULL DEFAULT 1,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_push_subscriptions_user
            ON push_subscriptions(user_id, active);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
