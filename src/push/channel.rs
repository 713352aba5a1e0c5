//! Push transport abstraction.
//!
//! The actual Web Push encryption and delivery lives in an external relay
//! service; this module owns the trait the schedulers talk to, the error
//! taxonomy that decides subscription cleanup, and the HTTP client for the
//! relay.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::payload::PushPayload;
use super::subscription::PushSubscription;

/// Delivery failure classes.
///
/// Only `SubscriptionGone` is permanent: the endpoint no longer exists and
/// the subscription must be deleted. Everything else is transient and is
/// retried implicitly on the next occurrence.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("subscription no longer valid (status {0})")]
    SubscriptionGone(u16),
    #[error("push transport error: {0}")]
    Transport(String),
}

impl PushError {
    /// True when the subscription should be removed from the store.
    pub fn is_subscription_gone(&self) -> bool {
        matches!(self, PushError::SubscriptionGone(_))
    }
}

/// Fire-and-forget push delivery to a single subscription.
#[async_trait]
pub trait PushChannel: Send + Sync {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
    ) -> Result<(), PushError>;
}

#[derive(Serialize)]
struct RelayRequest<'a> {
    subscription: &'a PushSubscription,
    payload: &'a PushPayload,
}

/// HTTP client for the external push relay service.
///
/// Posts `{subscription, payload}` to `{base_url}/send`; the relay performs
/// the Web Push encryption and forwards the result of the upstream endpoint.
#[derive(Clone)]
pub struct HttpPushChannel {
    client: Client,
    base_url: String,
}

impl HttpPushChannel {
    /// # Arguments
    /// * `base_url` - Base URL of the push relay (e.g. "http://localhost:4040")
    /// * `timeout_secs` - Request timeout in seconds
    pub fn new(base_url: String, timeout_secs: u64) -> Result<Self, PushError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| PushError::Transport(e.to_string()))?;
        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl PushChannel for HttpPushChannel {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
    ) -> Result<(), PushError> {
        let url = format!("{}/send", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&RelayRequest {
                subscription,
                payload,
            })
            .send()
            .await
            .map_err(|e| PushError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        // 404/410 from the upstream push endpoint mean the subscription is
        // dead and must not be retried.
        match status.as_u16() {
            404 | 410 => Err(PushError::SubscriptionGone(status.as_u16())),
            code => Err(PushError::Transport(format!(
                "relay returned status {}",
                code
            ))),
        }
    }
}

/// Channel used when no relay is configured: logs the payload and succeeds.
pub struct LogOnlyPushChannel;

#[async_trait]
impl PushChannel for LogOnlyPushChannel {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
    ) -> Result<(), PushError> {
        debug!(
            "Push relay not configured, dropping notification '{}' for endpoint {}",
            payload.tag, subscription.endpoint
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gone_classification() {
        assert!(PushError::SubscriptionGone(410).is_subscription_gone());
        assert!(!PushError::Transport("timeout".to_string()).is_subscription_gone());
    }

    #[tokio::test]
    async fn test_log_only_channel_always_succeeds() {
        let channel = LogOnlyPushChannel;
        let subscription = PushSubscription {
            endpoint: "https://push.example/ep".to_string(),
            user_id: "user-1".to_string(),
            p256dh: "k".to_string(),
            auth: "a".to_string(),
            device_id: None,
            updated_at: 0,
        };
        let payload = PushPayload::new("t", "b", "tag", serde_json::json!({}));
        assert!(channel.send(&subscription, &payload).await.is_ok());
    }

    #[test]
    fn test_relay_request_shape() {
        let subscription = PushSubscription {
            endpoint: "https://push.example/ep".to_string(),
            user_id: "user-1".to_string(),
            p256dh: "k".to_string(),
            auth: "a".to_string(),
            device_id: Some("phone".to_string()),
            updated_at: 7,
        };
        let payload = PushPayload::new("t", "b", "tag", serde_json::json!({}));
        let value = serde_json::to_value(RelayRequest {
            subscription: &subscription,
            payload: &payload,
        })
        .unwrap();
        assert_eq!(value["subscription"]["endpoint"], "https://push.example/ep");
        assert_eq!(value["payload"]["tag"], "tag");
    }
}
