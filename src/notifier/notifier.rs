//! Push notification fan-out.
//!
//! Builds payloads and delivers them to every device a user has registered,
//! pruning dead subscriptions along the way. The one-shot senders are called
//! by the external route layer; the alarm and session senders are driven by
//! the scheduler.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::push::{
    collapse_per_device, ActionTokenSigner, PayloadAction, PushChannel, PushPayload,
    SubscriptionStore,
};
use crate::workforce::{Alarm, AlarmKind, WorkState, WorkStatus, WorkforceStore};

use super::dedup::{minute_key, DeliveryDedup};

pub struct PushNotifier {
    subscriptions: Arc<dyn SubscriptionStore>,
    workforce: Arc<dyn WorkforceStore>,
    channel: Arc<dyn PushChannel>,
    token_signer: ActionTokenSigner,
    dedup: Arc<DeliveryDedup>,
}

impl PushNotifier {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        workforce: Arc<dyn WorkforceStore>,
        channel: Arc<dyn PushChannel>,
        token_signer: ActionTokenSigner,
        dedup: Arc<DeliveryDedup>,
    ) -> Self {
        Self {
            subscriptions,
            workforce,
            channel,
            token_signer,
            dedup,
        }
    }

    /// Deliver a due alarm to all of the user's devices. The clocked state is
    /// derived fresh here so the offered actions match reality at send time.
    pub async fn send_alarm(&self, alarm: &Alarm, now: &DateTime<Local>) -> Result<usize> {
        let status = match self.workforce.work_status(&alarm.user_id) {
            Ok(status) => status,
            Err(e) => {
                // Still deliver the reminder, just without action buttons.
                warn!(
                    "Failed to derive work status for {}: {:#}",
                    alarm.user_id, e
                );
                WorkStatus {
                    state: WorkState::Unknown,
                    active_session_id: None,
                    active_break_id: None,
                }
            }
        };

        let token = self
            .token_signer
            .sign(&alarm.user_id)
            .context("Failed to sign action token")?;
        let actions: Vec<PayloadAction> = status
            .available_actions()
            .iter()
            .map(|action| PayloadAction {
                action: action.as_str().to_string(),
                title: action.title().to_string(),
                icon: None,
            })
            .collect();

        let body = match alarm.kind {
            AlarmKind::ClockIn => "Time to clock in.",
            AlarmKind::ClockOut => "Time to clock out.",
        };
        let minute = minute_key(now);
        let payload = PushPayload::new(
            alarm.title.as_str(),
            body,
            format!("alarm-{}-{}", alarm.id, minute),
            json!({
                "url": "/clock",
                "type": "work_alarm",
                "user_id": alarm.user_id,
                "alarm_kind": alarm.kind.as_str(),
                "work_state": status.state,
                "token": token,
                "timestamp": now.timestamp(),
            }),
        )
        .with_actions(actions);

        let throttle = ThrottleKey {
            kind: alarm.kind.as_str(),
            minute: &minute,
            now,
        };
        self.fan_out(&alarm.user_id, &payload, Some(throttle)).await
    }

    /// One summary per user about work sessions left open before today.
    pub async fn send_incomplete_sessions(
        &self,
        user_id: &str,
        count: usize,
        now: &DateTime<Local>,
    ) -> Result<usize> {
        let body = if count == 1 {
            "You have 1 work session without a clock-out. Please review it.".to_string()
        } else {
            format!(
                "You have {} work sessions without a clock-out. Please review them.",
                count
            )
        };
        let payload = PushPayload::new(
            "Incomplete work sessions",
            body,
            format!("incomplete-sessions-{}-{}", user_id, now.format("%Y%m%d")),
            json!({
                "url": "/sessions",
                "type": "incomplete_sessions",
                "user_id": user_id,
                "count": count,
                "timestamp": now.timestamp(),
            }),
        );
        self.fan_out(user_id, &payload, None).await
    }

    pub async fn send_vacation_notification(
        &self,
        user_id: &str,
        vacation_id: &str,
        approved: bool,
    ) -> Result<usize> {
        let body = if approved {
            "Your vacation request was approved."
        } else {
            "Your vacation request was denied."
        };
        let payload = PushPayload::new(
            "Vacation request",
            body,
            format!("vacation-{}", vacation_id),
            json!({
                "url": "/vacations",
                "type": "vacation",
                "vacation_id": vacation_id,
                "approved": approved,
            }),
        );
        self.fan_out(user_id, &payload, None).await
    }

    pub async fn send_payroll_notification(&self, user_id: &str, period: &str) -> Result<usize> {
        let payload = PushPayload::new(
            "Payroll ready",
            format!("Your payroll for {} is available.", period),
            format!("payroll-{}", period),
            json!({
                "url": "/payroll",
                "type": "payroll",
                "period": period,
            }),
        );
        self.fan_out(user_id, &payload, None).await
    }

    pub async fn send_new_document_notification(
        &self,
        user_id: &str,
        document_id: &str,
        document_name: &str,
    ) -> Result<usize> {
        let payload = PushPayload::new(
            "New document",
            format!("\"{}\" was shared with you.", document_name),
            format!("document-{}", document_id),
            json!({
                "url": "/documents",
                "type": "new_document",
                "document_id": document_id,
            }),
        );
        self.fan_out(user_id, &payload, None).await
    }

    pub async fn send_document_request_notification(
        &self,
        user_id: &str,
        request_id: &str,
        document_name: &str,
    ) -> Result<usize> {
        let payload = PushPayload::new(
            "Document requested",
            format!("Please upload \"{}\".", document_name),
            format!("document-request-{}", request_id),
            json!({
                "url": "/documents/requests",
                "type": "document_request",
                "request_id": request_id,
            }),
        );
        self.fan_out(user_id, &payload, None).await
    }

    /// Send `payload` to every device of `user_id`, one per logical device.
    /// Returns the number of successful deliveries.
    async fn fan_out(
        &self,
        user_id: &str,
        payload: &PushPayload,
        throttle: Option<ThrottleKey<'_>>,
    ) -> Result<usize> {
        let subscriptions = self
            .subscriptions
            .list_subscriptions(user_id)
            .context("Failed to list push subscriptions")?;
        let subscriptions = collapse_per_device(subscriptions);
        if subscriptions.is_empty() {
            debug!("User {} has no push subscriptions", user_id);
            return Ok(0);
        }

        let mut delivered = 0;
        for subscription in subscriptions {
            let throttle_key = throttle.as_ref().map(|t| {
                (
                    format!(
                        "{}:{}:{}:{}",
                        user_id, subscription.endpoint, t.kind, t.minute
                    ),
                    t.now,
                )
            });
            if let Some((key, now)) = &throttle_key {
                if !self.dedup.allow_send(key, now).await {
                    debug!("Throttled send to {} for {}", subscription.endpoint, user_id);
                    continue;
                }
            }

            match self.channel.send(&subscription, payload).await {
                Ok(()) => {
                    delivered += 1;
                    if let Some((key, now)) = &throttle_key {
                        self.dedup.record_send(key, now).await;
                    }
                }
                Err(e) if e.is_subscription_gone() => {
                    info!(
                        "Removing dead push subscription {} for {}",
                        subscription.endpoint, user_id
                    );
                    if let Err(e) = self.subscriptions.delete_subscription(&subscription.endpoint)
                    {
                        warn!("Failed to delete subscription: {:#}", e);
                    }
                }
                Err(e) => {
                    // Transient; the endpoint stays registered.
                    warn!("Push to {} failed: {}", subscription.endpoint, e);
                }
            }
        }
        Ok(delivered)
    }
}

struct ThrottleKey<'a> {
    kind: &'a str,
    minute: &'a str,
    now: &'a DateTime<Local>,
}
