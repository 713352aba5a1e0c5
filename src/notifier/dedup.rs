//! In-process delivery deduplication.
//!
//! Three independent guards keep the scheduler's sends idempotent across
//! ticks: a per-(alarm, minute) sent set, a per-day guard for the
//! incomplete-session scan, and a short per-device throttle. All state is
//! in memory and lost on restart; the worst case after a restart is one
//! duplicate reminder within the same minute.

use chrono::{DateTime, Duration, Local};
use std::collections::HashMap;
use tokio::sync::Mutex;

const SENT_ALARM_RETENTION: Duration = Duration::hours(2);
const DAILY_GUARD_RETENTION: Duration = Duration::days(7);
const SEND_THROTTLE: Duration = Duration::seconds(10);

/// Calendar-minute key used in alarm dedup and notification tags.
pub fn minute_key(now: &DateTime<Local>) -> String {
    now.format("%Y%m%d%H%M").to_string()
}

fn prune(entries: &mut HashMap<String, DateTime<Local>>, now: &DateTime<Local>, max_age: Duration) {
    entries.retain(|_, at| now.signed_duration_since(*at) < max_age);
}

fn daily_key(name: &str, now: &DateTime<Local>) -> String {
    format!("{}-{}", name, now.format("%Y%m%d"))
}

#[derive(Default)]
pub struct DeliveryDedup {
    sent_alarms: Mutex<HashMap<String, DateTime<Local>>>,
    daily_guards: Mutex<HashMap<String, DateTime<Local>>>,
    recent_sends: Mutex<HashMap<String, DateTime<Local>>>,
}

impl DeliveryDedup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `alarm_id` fired in `now`'s calendar minute. Returns false
    /// if that occurrence was already recorded.
    pub async fn try_mark_alarm_sent(&self, alarm_id: &str, now: &DateTime<Local>) -> bool {
        let mut sent = self.sent_alarms.lock().await;
        prune(&mut sent, now, SENT_ALARM_RETENTION);
        let key = format!("{}-{}", alarm_id, minute_key(now));
        if sent.contains_key(&key) {
            return false;
        }
        sent.insert(key, *now);
        true
    }

    /// Once-per-calendar-day guard for `name`. Returns false if the guard
    /// was already recorded today. Only `record_once_per_day` arms the
    /// guard, so a check that leads to a failed attempt does not consume
    /// the day.
    pub async fn allow_once_per_day(&self, name: &str, now: &DateTime<Local>) -> bool {
        let mut guards = self.daily_guards.lock().await;
        prune(&mut guards, now, DAILY_GUARD_RETENTION);
        !guards.contains_key(&daily_key(name, now))
    }

    /// Record that `name` ran today.
    pub async fn record_once_per_day(&self, name: &str, now: &DateTime<Local>) {
        let mut guards = self.daily_guards.lock().await;
        prune(&mut guards, now, DAILY_GUARD_RETENTION);
        guards.insert(daily_key(name, now), *now);
    }

    /// Whether a send under `key` is allowed right now. Only a recorded send
    /// arms the throttle; a denied or failed attempt does not.
    pub async fn allow_send(&self, key: &str, now: &DateTime<Local>) -> bool {
        let mut sends = self.recent_sends.lock().await;
        prune(&mut sends, now, SEND_THROTTLE);
        match sends.get(key) {
            Some(last) => now.signed_duration_since(*last) >= SEND_THROTTLE,
            None => true,
        }
    }

    /// Record a successful send under `key`.
    pub async fn record_send(&self, key: &str, now: &DateTime<Local>) {
        let mut sends = self.recent_sends.lock().await;
        prune(&mut sends, now, SEND_THROTTLE);
        sends.insert(key.to_string(), *now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, min: u32, sec: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 1, 9, hour, min, sec).unwrap()
    }

    #[tokio::test]
    async fn test_alarm_fires_once_per_minute() {
        let dedup = DeliveryDedup::new();
        let now = at(9, 0, 10);
        assert!(dedup.try_mark_alarm_sent("a1", &now).await);
        // Same minute, later second.
        assert!(!dedup.try_mark_alarm_sent("a1", &at(9, 0, 45)).await);
        // Different alarm, same minute.
        assert!(dedup.try_mark_alarm_sent("a2", &now).await);
        // Next minute is a new occurrence.
        assert!(dedup.try_mark_alarm_sent("a1", &at(9, 1, 0)).await);
    }

    #[tokio::test]
    async fn test_alarm_keys_purged_after_retention() {
        let dedup = DeliveryDedup::new();
        assert!(dedup.try_mark_alarm_sent("a1", &at(9, 0, 0)).await);
        // Two hours later the key is gone, so the same key would be accepted
        // again (it can never recur naturally since the minute moved on).
        let later = at(11, 0, 1);
        let mut sent = dedup.sent_alarms.lock().await;
        prune(&mut sent, &later, SENT_ALARM_RETENTION);
        assert!(sent.is_empty());
    }

    #[tokio::test]
    async fn test_once_per_day_guard() {
        let dedup = DeliveryDedup::new();
        let morning = at(8, 0, 0);
        assert!(dedup.allow_once_per_day("session-scan", &morning).await);
        // Checking alone does not consume the day.
        assert!(dedup.allow_once_per_day("session-scan", &at(8, 5, 0)).await);

        dedup.record_once_per_day("session-scan", &morning).await;
        assert!(!dedup.allow_once_per_day("session-scan", &at(9, 30, 0)).await);

        let tomorrow = Local.with_ymd_and_hms(2024, 1, 10, 8, 0, 0).unwrap();
        assert!(dedup.allow_once_per_day("session-scan", &tomorrow).await);
    }

    #[tokio::test]
    async fn test_send_throttle_blocks_within_window() {
        let dedup = DeliveryDedup::new();
        let now = at(9, 0, 0);
        assert!(dedup.allow_send("k", &now).await);
        // Until recorded, nothing is throttled.
        assert!(dedup.allow_send("k", &now).await);

        dedup.record_send("k", &now).await;
        assert!(!dedup.allow_send("k", &at(9, 0, 5)).await);
        assert!(dedup.allow_send("k", &at(9, 0, 10)).await);
        // Other keys are unaffected.
        assert!(dedup.allow_send("other", &at(9, 0, 5)).await);
    }
}
