//! Notification scheduling: dedup state, push fan-out, the periodic
//! checks, and the process-wide lifecycle registry.

mod dedup;
mod notifier;
mod registry;
mod scheduler;

pub use dedup::DeliveryDedup;
pub use notifier::PushNotifier;
pub use registry::SchedulerRegistry;
pub use scheduler::{NotificationScheduler, SchedulerSettings};
