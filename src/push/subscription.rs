//! Push subscription model and per-device collapsing.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A registered push endpoint for one of a user's devices.
///
/// External entity, read-only to the scheduling core apart from deletion of
/// endpoints the transport reports as gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSubscription {
    pub endpoint: String,
    pub user_id: String,
    pub p256dh: String,
    pub auth: String,
    /// Stable client-chosen device identifier, when the client provides one.
    pub device_id: Option<String>,
    pub updated_at: i64,
}

impl PushSubscription {
    /// Key identifying the logical device this subscription belongs to.
    /// Falls back to the raw endpoint when no device id was registered.
    pub fn device_key(&self) -> &str {
        self.device_id.as_deref().unwrap_or(&self.endpoint)
    }
}

/// Storage operations for push subscriptions.
pub trait SubscriptionStore: Send + Sync {
    /// All subscriptions registered for a user, possibly several per device.
    fn list_subscriptions(&self, user_id: &str) -> Result<Vec<PushSubscription>>;

    /// Insert or refresh a subscription, keyed by endpoint.
    fn upsert_subscription(&self, subscription: &PushSubscription) -> Result<()>;

    /// Remove a subscription the transport reported as permanently invalid.
    /// Returns true if a row was deleted.
    fn delete_subscription(&self, endpoint: &str) -> Result<bool>;
}

/// Collapse a user's subscriptions to one per logical device, keeping the
/// most recently updated entry for each device key.
///
/// Clients re-register after service-worker updates, leaving several live
/// subscriptions for the same physical device; sending to all of them shows
/// duplicate notifications.
pub fn collapse_per_device(subscriptions: Vec<PushSubscription>) -> Vec<PushSubscription> {
    let mut latest: HashMap<String, PushSubscription> = HashMap::new();
    for sub in subscriptions {
        let key = sub.device_key().to_string();
        match latest.get(&key) {
            Some(existing) if existing.updated_at >= sub.updated_at => {}
            _ => {
                latest.insert(key, sub);
            }
        }
    }
    let mut collapsed: Vec<PushSubscription> = latest.into_values().collect();
    // Deterministic fan-out order
    collapsed.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
    collapsed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(endpoint: &str, device_id: Option<&str>, updated_at: i64) -> PushSubscription {
        PushSubscription {
            endpoint: endpoint.to_string(),
            user_id: "user-1".to_string(),
            p256dh: "key".to_string(),
            auth: "auth".to_string(),
            device_id: device_id.map(str::to_string),
            updated_at,
        }
    }

    #[test]
    fn test_collapse_keeps_most_recent_per_device() {
        let subs = vec![
            sub("ep-1", Some("phone"), 100),
            sub("ep-2", Some("phone"), 300),
            sub("ep-3", Some("phone"), 200),
        ];
        let collapsed = collapse_per_device(subs);
        assert_eq!(collapsed.len(), 1);
        assert_eq!(collapsed[0].endpoint, "ep-2");
    }

    #[test]
    fn test_collapse_groups_by_endpoint_without_device_id() {
        let subs = vec![
            sub("ep-1", None, 100),
            sub("ep-1", None, 200),
            sub("ep-2", None, 100),
        ];
        let collapsed = collapse_per_device(subs);
        assert_eq!(collapsed.len(), 2);
    }

    #[test]
    fn test_collapse_distinct_devices_all_kept() {
        let subs = vec![
            sub("ep-1", Some("phone"), 100),
            sub("ep-2", Some("laptop"), 100),
            sub("ep-3", None, 100),
        ];
        assert_eq!(collapse_per_device(subs).len(), 3);
    }

    #[test]
    fn test_collapse_empty_input() {
        assert!(collapse_per_device(Vec::new()).is_empty());
    }

    #[test]
    fn test_device_key_fallback() {
        assert_eq!(sub("ep-1", Some("phone"), 0).device_key(), "phone");
        assert_eq!(sub("ep-1", None, 0).device_key(), "ep-1");
    }
}
