use std::sync::Arc;

use async_trait::async_trait;
use furrow_db::Database;
use furrow_types::models::{NotificationPreference, PushSubscription};

use crate::DeliveryError;

/// Read side of the settings and subscription services, plus the one write
/// the dispatcher is allowed: reporting a subscription the push service
/// says is gone.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn preference(&self, user_id: &str) -> Result<NotificationPreference, DeliveryError>;

    async fn contact_email(&self, user_id: &str) -> Result<Option<String>, DeliveryError>;

    async fn active_push_subscriptions(
        &self,
        user_id: &str,
    ) -> Result<Vec<PushSubscription>, DeliveryError>;

    async fn mark_subscription_expired(&self, subscription_id: &str) -> Result<(), DeliveryError>;
}

/// [`NotificationStore`] over the local SQLite mirror.
pub struct SqliteNotificationStore {
    db: Arc<Database>,
}

impl SqliteNotificationStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    // Run a blocking query off the async runtime
    async fn blocking<T, F>(&self, f: F) -> Result<T, DeliveryError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> furrow_db::Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| DeliveryError::Lookup(e.to_string()))?
            .map_err(|e| DeliveryError::Lookup(e.to_string()))
    }
}

#[async_trait]
impl NotificationStore for SqliteNotificationStore {
    async fn preference(&self, user_id: &str) -> Result<NotificationPreference, DeliveryError> {
        let user_id = user_id.to_string();
        self.blocking(move |db| db.notification_preference(&user_id))
            .await
    }

    async fn contact_email(&self, user_id: &str) -> Result<Option<String>, DeliveryError> {
        let user_id = user_id.to_string();
        self.blocking(move |db| Ok(db.get_user(&user_id)?.and_then(|u| u.email)))
            .await
    }

    async fn active_push_subscriptions(
        &self,
        user_id: &str,
    ) -> Result<Vec<PushSubscription>, DeliveryError> {
        let user_id = user_id.to_string();
        self.blocking(move |db| db.active_push_subscriptions(&user_id))
            .await
    }

    async fn mark_subscription_expired(&self, subscription_id: &str) -> Result<(), DeliveryError> {
        let subscription_id = subscription_id.to_string();
        self.blocking(move |db| db.deactivate_push_subscription(&subscription_id).map(|_| ()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_mirror_and_expires_subscriptions() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.upsert_user("u1", "Ada", Some("ada@example.com")).unwrap();
        db.upsert_user("u2", "Ben", None).unwrap();
        db.add_push_subscription(&PushSubscription {
            id: "s1".into(),
            user_id: "u1".into(),
            endpoint: "https://push.example/s1".into(),
            p256dh: "key".into(),
            auth: "secret".into(),
        })
        .unwrap();

        let store = SqliteNotificationStore::new(db);
        assert_eq!(
            store.contact_email("u1").await.unwrap().as_deref(),
            Some("ada@example.com")
        );
        assert_eq!(store.contact_email("u2").await.unwrap(), None);
        assert_eq!(
            store.preference("u2").await.unwrap(),
            NotificationPreference::default()
        );

        assert_eq!(store.active_push_subscriptions("u1").await.unwrap().len(), 1);
        store.mark_subscription_expired("s1").await.unwrap();
        assert!(store.active_push_subscriptions("u1").await.unwrap().is_empty());
    }
}
