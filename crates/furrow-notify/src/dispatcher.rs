use std::sync::Arc;

use async_trait::async_trait;
use furrow_types::models::{Category, Channel};
use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::email::{self, EmailTransport};
use crate::push::{PushPayload, PushTransport};
use crate::store::NotificationStore;
use crate::{DeliveryError, MessageNotifier, NewMessageNotice};

/// Outcome of one dispatch, for logs and tests. Never reaches the sender.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub push_sent: usize,
    pub push_failed: usize,
    pub push_expired: usize,
    pub email_sent: bool,
}

/// Turns persisted messages into push and email notifications.
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<NotifierInner>,
}

struct NotifierInner {
    store: Arc<dyn NotificationStore>,
    push: Arc<dyn PushTransport>,
    email: Arc<dyn EmailTransport>,
    /// Public base URL used for deep links
    app_url: String,
}

impl Notifier {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        push: Arc<dyn PushTransport>,
        email: Arc<dyn EmailTransport>,
        app_url: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(NotifierInner {
                store,
                push,
                email,
                app_url: app_url.into(),
            }),
        }
    }

    /// Run both channels for one message. Push and email are attempted
    /// independently; a failure in one never stops the other.
    ///
    /// Without a readable preference nothing is sent: a user who opted out
    /// must not be notified because the store was down.
    pub async fn deliver_new_message(&self, notice: &NewMessageNotice) -> DeliveryReport {
        let pref = match self.inner.store.preference(&notice.receiver_id).await {
            Ok(pref) => pref,
            Err(e) => {
                warn!(
                    "Preference lookup for {} failed, skipping notifications for message {}: {}",
                    notice.receiver_id, notice.message_id, e
                );
                return DeliveryReport::default();
            }
        };

        let push = async {
            if pref.allows(Channel::Push, Category::Message) {
                self.push_new_message(notice).await
            } else {
                debug!("Push for messages disabled by {}", notice.receiver_id);
                DeliveryReport::default()
            }
        };

        let email = async {
            if !pref.allows(Channel::Email, Category::Message) {
                debug!("Email for messages disabled by {}", notice.receiver_id);
                return false;
            }
            match self.email_new_message(notice).await {
                Ok(sent) => sent,
                Err(e) => {
                    warn!("Email for message {} failed: {}", notice.message_id, e);
                    false
                }
            }
        };

        let (mut report, email_sent) = tokio::join!(push, email);
        report.email_sent = email_sent;
        report
    }

    async fn push_new_message(&self, notice: &NewMessageNotice) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        let subscriptions = match self
            .inner
            .store
            .active_push_subscriptions(&notice.receiver_id)
            .await
        {
            Ok(subs) => subs,
            Err(e) => {
                warn!("Subscription lookup for {} failed: {}", notice.receiver_id, e);
                return report;
            }
        };

        if subscriptions.is_empty() {
            return report;
        }

        let payload = PushPayload {
            title: format!("New message from {}", notice.sender_name),
            body: email::preview(&notice.content),
            url: email::deep_link(&self.inner.app_url, notice),
            tag: format!("message-{}", notice.sender_id),
        };

        let sends = subscriptions
            .iter()
            .map(|sub| self.inner.push.send(sub, &payload));
        let results = join_all(sends).await;

        for (sub, result) in subscriptions.iter().zip(results) {
            match result {
                Ok(()) => report.push_sent += 1,
                Err(DeliveryError::Gone) => {
                    report.push_expired += 1;
                    info!("Push subscription {} is gone, reporting expiry", sub.id);
                    if let Err(e) = self.inner.store.mark_subscription_expired(&sub.id).await {
                        warn!("Could not report expired subscription {}: {}", sub.id, e);
                    }
                }
                Err(e) => {
                    report.push_failed += 1;
                    warn!("Push to subscription {} failed: {}", sub.id, e);
                }
            }
        }

        report
    }

    /// Returns `Ok(false)` when the receiver has no email address.
    async fn email_new_message(&self, notice: &NewMessageNotice) -> Result<bool, DeliveryError> {
        let Some(address) = self.inner.store.contact_email(&notice.receiver_id).await? else {
            debug!("No email address for {}", notice.receiver_id);
            return Ok(false);
        };

        let message = email::render_new_message(&address, &self.inner.app_url, notice);
        self.inner.email.send(message).await?;
        Ok(true)
    }
}

#[async_trait]
impl MessageNotifier for Notifier {
    async fn notify_new_message(&self, notice: NewMessageNotice) {
        let report = self.deliver_new_message(&notice).await;
        debug!(
            "Notifications for message {}: push {} sent / {} failed / {} expired, email {}",
            notice.message_id,
            report.push_sent,
            report.push_failed,
            report.push_expired,
            if report.email_sent { "sent" } else { "skipped" }
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use furrow_types::models::{NotificationPreference, PushSubscription};
    use uuid::Uuid;

    use crate::email::EmailMessage;

    #[derive(Default)]
    struct MemoryStore {
        prefs_unavailable: bool,
        prefs: HashMap<String, NotificationPreference>,
        emails: HashMap<String, String>,
        subs: Vec<PushSubscription>,
        expired: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NotificationStore for MemoryStore {
        async fn preference(&self, user_id: &str) -> Result<NotificationPreference, DeliveryError> {
            if self.prefs_unavailable {
                return Err(DeliveryError::Lookup("db down".into()));
            }
            Ok(self.prefs.get(user_id).copied().unwrap_or_default())
        }

        async fn contact_email(&self, user_id: &str) -> Result<Option<String>, DeliveryError> {
            Ok(self.emails.get(user_id).cloned())
        }

        async fn active_push_subscriptions(
            &self,
            user_id: &str,
        ) -> Result<Vec<PushSubscription>, DeliveryError> {
            let expired = self.expired.lock().unwrap();
            Ok(self
                .subs
                .iter()
                .filter(|s| s.user_id == user_id && !expired.contains(&s.id))
                .cloned()
                .collect())
        }

        async fn mark_subscription_expired(&self, id: &str) -> Result<(), DeliveryError> {
            self.expired.lock().unwrap().push(id.to_string());
            Ok(())
        }
    }

    /// Fails for endpoints listed in `gone` / `broken`, records the rest.
    #[derive(Default)]
    struct RecordingPush {
        gone: Vec<String>,
        broken: Vec<String>,
        sent: Mutex<Vec<(String, PushPayload)>>,
    }

    #[async_trait]
    impl PushTransport for RecordingPush {
        async fn send(
            &self,
            sub: &PushSubscription,
            payload: &PushPayload,
        ) -> Result<(), DeliveryError> {
            if self.gone.contains(&sub.endpoint) {
                return Err(DeliveryError::Gone);
            }
            if self.broken.contains(&sub.endpoint) {
                return Err(DeliveryError::Rejected(500));
            }
            self.sent
                .lock()
                .unwrap()
                .push((sub.endpoint.clone(), payload.clone()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingEmail {
        fail: bool,
        sent: Mutex<Vec<EmailMessage>>,
    }

    #[async_trait]
    impl EmailTransport for RecordingEmail {
        async fn send(&self, email: EmailMessage) -> Result<(), DeliveryError> {
            if self.fail {
                return Err(DeliveryError::Transport("connection refused".into()));
            }
            self.sent.lock().unwrap().push(email);
            Ok(())
        }
    }

    fn subscription(id: &str) -> PushSubscription {
        PushSubscription {
            id: id.into(),
            user_id: "u2".into(),
            endpoint: format!("https://push.example/{}", id),
            p256dh: "key".into(),
            auth: "secret".into(),
        }
    }

    fn notice(content: &str) -> NewMessageNotice {
        NewMessageNotice {
            message_id: Uuid::new_v4(),
            receiver_id: "u2".into(),
            sender_id: "u1".into(),
            sender_name: "Ada".into(),
            content: content.into(),
            listing_id: None,
        }
    }

    fn store_with(subs: &[&str]) -> MemoryStore {
        MemoryStore {
            emails: HashMap::from([("u2".to_string(), "ben@example.com".to_string())]),
            subs: subs.iter().map(|id| subscription(id)).collect(),
            ..Default::default()
        }
    }

    fn notifier(
        store: Arc<MemoryStore>,
        push: Arc<RecordingPush>,
        email: Arc<RecordingEmail>,
    ) -> Notifier {
        Notifier::new(store, push, email, "https://market.example")
    }

    #[tokio::test]
    async fn delivers_push_to_every_device_and_email() {
        let store = Arc::new(store_with(&["phone", "laptop"]));
        let push = Arc::new(RecordingPush::default());
        let email = Arc::new(RecordingEmail::default());

        let long = "Tomatoes ".repeat(30);
        let report = notifier(store, push.clone(), email.clone())
            .deliver_new_message(&notice(&long))
            .await;

        assert_eq!(
            report,
            DeliveryReport {
                push_sent: 2,
                email_sent: true,
                ..Default::default()
            }
        );

        let sent = push.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].1.title, "New message from Ada");
        assert!(sent[0].1.body.ends_with("..."));
        assert_eq!(sent[0].1.url, "https://market.example/messages?user=u1");

        let mails = email.sent.lock().unwrap();
        assert_eq!(mails.len(), 1);
        assert_eq!(mails[0].to, "ben@example.com");
        assert!(mails[0].text_body.contains("..."));
    }

    #[tokio::test]
    async fn one_bad_subscription_does_not_block_others() {
        let store = Arc::new(store_with(&["expired", "flaky", "good"]));
        let push = Arc::new(RecordingPush {
            gone: vec!["https://push.example/expired".into()],
            broken: vec!["https://push.example/flaky".into()],
            ..Default::default()
        });
        let email = Arc::new(RecordingEmail::default());

        let report = notifier(store.clone(), push.clone(), email)
            .deliver_new_message(&notice("hello"))
            .await;

        assert_eq!(report.push_sent, 1);
        assert_eq!(report.push_failed, 1);
        assert_eq!(report.push_expired, 1);
        assert_eq!(push.sent.lock().unwrap()[0].0, "https://push.example/good");

        // Only the gone subscription is reported, the flaky one is retried next time
        assert_eq!(*store.expired.lock().unwrap(), vec!["expired".to_string()]);
        let remaining = store.active_push_subscriptions("u2").await.unwrap();
        assert_eq!(remaining.len(), 2);
    }

    #[tokio::test]
    async fn email_failure_leaves_push_alone() {
        let store = Arc::new(store_with(&["phone"]));
        let push = Arc::new(RecordingPush::default());
        let email = Arc::new(RecordingEmail {
            fail: true,
            ..Default::default()
        });

        let report = notifier(store, push.clone(), email)
            .deliver_new_message(&notice("hello"))
            .await;

        assert_eq!(report.push_sent, 1);
        assert!(!report.email_sent);
    }

    #[tokio::test]
    async fn preferences_gate_each_channel() {
        let mut pref = NotificationPreference::default();
        pref.push.enabled = false;
        let mut store = store_with(&["phone"]);
        store.prefs.insert("u2".into(), pref);

        let push = Arc::new(RecordingPush::default());
        let email = Arc::new(RecordingEmail::default());
        let report = notifier(Arc::new(store), push.clone(), email.clone())
            .deliver_new_message(&notice("hello"))
            .await;

        assert_eq!(report.push_sent, 0);
        assert!(push.sent.lock().unwrap().is_empty());
        assert!(report.email_sent);

        let mut pref = NotificationPreference::default();
        pref.email.messages = false;
        let mut store = store_with(&["phone"]);
        store.prefs.insert("u2".into(), pref);

        let email = Arc::new(RecordingEmail::default());
        let report = notifier(Arc::new(store), Arc::new(RecordingPush::default()), email.clone())
            .deliver_new_message(&notice("hello"))
            .await;
        assert_eq!(report.push_sent, 1);
        assert!(!report.email_sent);
        assert!(email.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreadable_preferences_send_nothing() {
        let store = MemoryStore {
            prefs_unavailable: true,
            ..store_with(&["phone"])
        };
        let push = Arc::new(RecordingPush::default());
        let email = Arc::new(RecordingEmail::default());

        let report = notifier(Arc::new(store), push.clone(), email.clone())
            .deliver_new_message(&notice("hello"))
            .await;

        assert_eq!(report, DeliveryReport::default());
        assert!(push.sent.lock().unwrap().is_empty());
        assert!(email.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_address_skips_email() {
        let store = Arc::new(MemoryStore::default());
        let email = Arc::new(RecordingEmail::default());
        let report = notifier(store, Arc::new(RecordingPush::default()), email.clone())
            .deliver_new_message(&notice("hello"))
            .await;
        assert_eq!(report, DeliveryReport::default());
        assert!(email.sent.lock().unwrap().is_empty());
    }
}
