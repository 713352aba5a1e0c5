//! Workforce domain: alarms, work sessions, breaks and the user projection.

mod models;
mod schema;
mod store;

pub use models::{
    Alarm, AlarmKind, UserProfile, WorkAction, WorkSession, WorkState, WorkStatus,
};
pub use store::{SqliteWorkforceStore, WorkforceStore};
