use std::time::Duration;

use async_trait::async_trait;
use furrow_types::models::PushSubscription;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::DeliveryError;

/// How long the push service should hold an undelivered notification.
const PUSH_TTL_SECS: u32 = 24 * 60 * 60;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub url: String,
    /// Lets the device collapse several notifications into one
    pub tag: String,
}

#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
    ) -> Result<(), DeliveryError>;
}

/// Hands notifications to a Web Push gateway that owns the VAPID keys and
/// payload encryption. The gateway passes the push service's status through.
pub struct HttpPushTransport {
    client: reqwest::Client,
    gateway_url: String,
}

impl HttpPushTransport {
    pub fn new(gateway_url: impl Into<String>) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            gateway_url: gateway_url.into(),
        })
    }
}

#[async_trait]
impl PushTransport for HttpPushTransport {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
    ) -> Result<(), DeliveryError> {
        let body = json!({
            "subscription": {
                "endpoint": subscription.endpoint,
                "keys": {
                    "p256dh": subscription.p256dh,
                    "auth": subscription.auth,
                },
            },
            "ttl": PUSH_TTL_SECS,
            "payload": payload,
        });

        let response = self
            .client
            .post(&self.gateway_url)
            .json(&body)
            .send()
            .await?;

        classify_status(response.status())
    }
}

fn classify_status(status: StatusCode) -> Result<(), DeliveryError> {
    match status {
        s if s.is_success() => Ok(()),
        StatusCode::NOT_FOUND | StatusCode::GONE => Err(DeliveryError::Gone),
        s => Err(DeliveryError::Rejected(s.as_u16())),
    }
}

/// Used when no push gateway is configured.
pub struct DisabledPush;

#[async_trait]
impl PushTransport for DisabledPush {
    async fn send(
        &self,
        subscription: &PushSubscription,
        _payload: &PushPayload,
    ) -> Result<(), DeliveryError> {
        debug!("Push disabled, dropping notification for subscription {}", subscription.id);
        Ok(())
    }
}
