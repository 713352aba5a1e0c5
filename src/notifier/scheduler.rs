//! Notification scheduling loops.
//!
//! Two periodic checks: due work alarms (every 30 s by default) and work
//! sessions left open from previous days (every 5 min, acted on once per
//! day within a morning window). Checks take the current time as a
//! parameter so tests can pin the clock.

use chrono::{DateTime, Local, Timelike};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::workforce::WorkforceStore;

use super::dedup::DeliveryDedup;
use super::notifier::PushNotifier;

const SESSION_SCAN_GUARD: &str = "incomplete-session-scan";

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub alarm_tick: Duration,
    pub session_tick: Duration,
    /// Local hour range within which the incomplete-session scan may run.
    pub session_window_start_hour: u32,
    pub session_window_end_hour: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            alarm_tick: Duration::from_secs(30),
            session_tick: Duration::from_secs(300),
            session_window_start_hour: 8,
            session_window_end_hour: 10,
        }
    }
}

pub struct NotificationScheduler {
    workforce: Arc<dyn WorkforceStore>,
    notifier: Arc<PushNotifier>,
    dedup: Arc<DeliveryDedup>,
    settings: SchedulerSettings,
}

impl NotificationScheduler {
    pub fn new(
        workforce: Arc<dyn WorkforceStore>,
        notifier: Arc<PushNotifier>,
        dedup: Arc<DeliveryDedup>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            workforce,
            notifier,
            dedup,
            settings,
        }
    }

    /// Fire every active alarm that is due in `now`'s calendar minute and
    /// has not fired for that minute yet.
    pub async fn check_work_alarms(&self, now: DateTime<Local>) {
        let alarms = match self.workforce.list_active_alarms() {
            Ok(alarms) => alarms,
            Err(e) => {
                warn!("Failed to list alarms: {:#}", e);
                return;
            }
        };

        for alarm in alarms {
            if !alarm.is_due(&now) {
                continue;
            }
            if !self.dedup.try_mark_alarm_sent(&alarm.id, &now).await {
                debug!("Alarm {} already fired this minute", alarm.id);
                continue;
            }
            match self.notifier.send_alarm(&alarm, &now).await {
                Ok(delivered) => {
                    info!(
                        "Alarm {} ({}) fired for {}, {} delivery(ies)",
                        alarm.id, alarm.title, alarm.user_id, delivered
                    );
                }
                Err(e) => warn!("Failed to send alarm {}: {:#}", alarm.id, e),
            }
        }
    }

    /// Remind users about sessions begun before today that never clocked
    /// out. Runs at most once per calendar day, within the morning window.
    pub async fn check_incomplete_sessions(&self, now: DateTime<Local>) {
        let hour = now.hour();
        if hour < self.settings.session_window_start_hour
            || hour >= self.settings.session_window_end_hour
        {
            return;
        }
        if !self.dedup.allow_once_per_day(SESSION_SCAN_GUARD, &now).await {
            return;
        }

        let midnight = match now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .and_then(|naive| naive.and_local_timezone(Local).single())
        {
            Some(midnight) => midnight.timestamp(),
            // DST edge; skip the scan rather than guess a cutoff.
            None => return,
        };

        // The guard is recorded only once the scan succeeds, so a failed
        // fetch is retried on the next tick instead of losing the day.
        let sessions = match self.workforce.open_sessions_started_before(midnight) {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!("Failed to scan open sessions: {:#}", e);
                return;
            }
        };
        self.dedup.record_once_per_day(SESSION_SCAN_GUARD, &now).await;
        if sessions.is_empty() {
            return;
        }

        let mut per_user: HashMap<String, usize> = HashMap::new();
        for session in &sessions {
            *per_user.entry(session.user_id.clone()).or_default() += 1;
        }
        info!(
            "Found {} incomplete session(s) across {} user(s)",
            sessions.len(),
            per_user.len()
        );
        for (user_id, count) in per_user {
            if let Err(e) = self
                .notifier
                .send_incomplete_sessions(&user_id, count, &now)
                .await
            {
                warn!(
                    "Failed to notify {} about incomplete sessions: {:#}",
                    user_id, e
                );
            }
        }
    }

    /// Alarm polling loop. Skips the interval's immediate first tick so a
    /// restart never re-fires the current minute.
    pub(crate) async fn run_alarm_loop(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            "Alarm loop starting (tick={}s)",
            self.settings.alarm_tick.as_secs()
        );
        let mut ticker = tokio::time::interval(self.settings.alarm_tick);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.check_work_alarms(Local::now()).await;
        }
        info!("Alarm loop stopped");
    }

    /// Incomplete-session polling loop.
    pub(crate) async fn run_session_loop(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            "Session loop starting (tick={}s)",
            self.settings.session_tick.as_secs()
        );
        let mut ticker = tokio::time::interval(self.settings.session_tick);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.check_incomplete_sessions(Local::now()).await;
        }
        info!("Session loop stopped");
    }
}
