//! Punchcard Scheduler Library
//!
//! Background scheduling core for a workforce-management back-end: the
//! persisted image job queue with its processor, and the push notification
//! scheduler for clock-in/out reminders and incomplete-session warnings.

pub mod config;
pub mod jobs;
pub mod notifier;
pub mod push;
pub mod sqlite_persistence;
pub mod workforce;

// Re-export commonly used types for convenience
pub use config::{AppConfig, CliConfig, FileConfig};
pub use jobs::{ImageJob, ImageJobProcessor, ImageJobStore, SqliteImageJobStore};
pub use notifier::{NotificationScheduler, PushNotifier, SchedulerRegistry};
pub use push::{HttpPushChannel, LogOnlyPushChannel, PushChannel};
pub use workforce::{SqliteWorkforceStore, WorkforceStore};
