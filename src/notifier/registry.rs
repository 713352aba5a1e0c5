//! Process-wide lifecycle guard for the notification loops.
//!
//! There must never be two alarm loops running at once, even across config
//! reloads that restart the scheduler. `start` therefore unconditionally
//! cancels whatever handles it still holds before spawning fresh loops.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::scheduler::NotificationScheduler;

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

struct LoopHandles {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

pub struct SchedulerRegistry {
    scheduler: Arc<NotificationScheduler>,
    handles: Mutex<Option<LoopHandles>>,
}

impl SchedulerRegistry {
    pub fn new(scheduler: Arc<NotificationScheduler>) -> Self {
        Self {
            scheduler,
            handles: Mutex::new(None),
        }
    }

    /// Spawn the alarm and session loops, tearing down any previous ones
    /// first regardless of what state they claim to be in.
    pub async fn start(&self) {
        let mut guard = self.handles.lock().await;
        if let Some(old) = guard.take() {
            warn!("Scheduler already registered, dropping previous loops");
            old.cancel.cancel();
            for task in old.tasks {
                task.abort();
            }
        }

        info!("Starting notification scheduler");
        let cancel = CancellationToken::new();
        let tasks = vec![
            tokio::spawn(self.scheduler.clone().run_alarm_loop(cancel.clone())),
            tokio::spawn(self.scheduler.clone().run_session_loop(cancel.clone())),
        ];
        *guard = Some(LoopHandles { cancel, tasks });
    }

    /// Cancel the loops and wait for them, bounded by a stop timeout.
    /// Safe to call when not running.
    pub async fn stop(&self) {
        let handles = self.handles.lock().await.take();
        let Some(handles) = handles else {
            return;
        };

        info!("Stopping notification scheduler");
        handles.cancel.cancel();
        for task in handles.tasks {
            match tokio::time::timeout(STOP_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Scheduler loop ended with error: {}", e),
                Err(_) => warn!("Scheduler loop did not stop within timeout"),
            }
        }
        info!("Notification scheduler stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.handles.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::dedup::DeliveryDedup;
    use crate::notifier::notifier::PushNotifier;
    use crate::notifier::scheduler::SchedulerSettings;
    use crate::push::{ActionTokenSigner, LogOnlyPushChannel};
    use crate::workforce::SqliteWorkforceStore;

    fn registry() -> SchedulerRegistry {
        let store = Arc::new(SqliteWorkforceStore::in_memory().unwrap());
        let dedup = Arc::new(DeliveryDedup::new());
        let notifier = Arc::new(PushNotifier::new(
            store.clone(),
            store.clone(),
            Arc::new(LogOnlyPushChannel),
            ActionTokenSigner::new("test-secret", Duration::from_secs(600)),
            dedup.clone(),
        ));
        let scheduler = Arc::new(NotificationScheduler::new(
            store,
            notifier,
            dedup,
            SchedulerSettings::default(),
        ));
        SchedulerRegistry::new(scheduler)
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let registry = registry();
        assert!(!registry.is_running().await);

        registry.start().await;
        assert!(registry.is_running().await);

        registry.stop().await;
        assert!(!registry.is_running().await);
    }

    #[tokio::test]
    async fn test_double_start_replaces_previous_loops() {
        let registry = registry();
        registry.start().await;
        let old_cancel = registry
            .handles
            .lock()
            .await
            .as_ref()
            .map(|h| h.cancel.clone())
            .unwrap();

        registry.start().await;
        assert!(old_cancel.is_cancelled());
        assert!(registry.is_running().await);
        registry.stop().await;
    }

    #[tokio::test]
    async fn test_stop_without_start_is_a_no_op() {
        let registry = registry();
        registry.stop().await;
        registry.stop().await;
        assert!(!registry.is_running().await);
    }
}
