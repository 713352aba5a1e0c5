//! Workforce storage.
//!
//! SQLite-backed store for alarms, sessions, breaks, the user projection,
//! and push subscriptions. Writes to sessions and alarms come from the
//! external CRUD layer; the schedulers mostly read.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::push::{PushSubscription, SubscriptionStore};
use crate::sqlite_persistence::open_versioned;

use super::models::{Alarm, AlarmKind, UserProfile, WorkSession, WorkState, WorkStatus};
use super::schema::WORKFORCE_VERSIONED_SCHEMAS;

/// Storage operations the schedulers need from the workforce domain.
pub trait WorkforceStore: Send + Sync {
    // === Alarms (read-only to the scheduler) ===

    /// All alarms with the active flag set, across all users.
    fn list_active_alarms(&self) -> Result<Vec<Alarm>>;

    /// Insert or replace an alarm definition (used by the external CRUD layer).
    fn upsert_alarm(&self, alarm: &Alarm) -> Result<()>;

    // === Sessions & breaks ===

    fn insert_session(&self, session: &WorkSession) -> Result<()>;

    /// Close a session by stamping its clock-out time.
    fn close_session(&self, session_id: &str, clock_out: i64) -> Result<()>;

    /// Open sessions (no clock-out) that began strictly before `cutoff`.
    fn open_sessions_started_before(&self, cutoff: i64) -> Result<Vec<WorkSession>>;

    fn insert_break(&self, break_id: &str, session_id: &str, start: i64) -> Result<()>;

    fn close_break(&self, break_id: &str, end: i64) -> Result<()>;

    /// Derive the user's current clocked state from open sessions/breaks.
    /// Computed fresh on every call; never cached.
    fn work_status(&self, user_id: &str) -> Result<WorkStatus>;

    // === Users ===

    fn get_user(&self, user_id: &str) -> Result<Option<UserProfile>>;

    fn upsert_user(&self, user: &UserProfile) -> Result<()>;

    /// Point the user's profile-picture reference at a processed output file.
    fn set_profile_picture(&self, user_id: &str, path: &str) -> Result<()>;
}

/// SQLite-backed workforce store.
pub struct SqliteWorkforceStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteWorkforceStore {
    /// Open an existing database or create a new one with the current schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let fresh = !db_path.as_ref().exists();
        let conn = Connection::open(&db_path)?;
        conn.execute("PRAGMA foreign_keys = ON;", [])?;
        open_versioned(&conn, WORKFORCE_VERSIONED_SCHEMAS, fresh)?;
        if fresh {
            info!("Created new workforce database at {:?}", db_path.as_ref());
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON;", [])?;
        open_versioned(&conn, WORKFORCE_VERSIONED_SCHEMAS, true)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_alarm(row: &rusqlite::Row) -> rusqlite::Result<Alarm> {
        Ok(Alarm {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            title: row.get("title")?,
            kind: AlarmKind::from_str(&row.get::<_, String>("kind")?)
                .unwrap_or(AlarmKind::ClockIn),
            time: row.get("time_of_day")?,
            weekdays: Alarm::weekdays_from_csv(&row.get::<_, String>("weekdays")?),
            active: row.get::<_, i64>("active")? != 0,
        })
    }

    fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<WorkSession> {
        Ok(WorkSession {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            clock_in: row.get("clock_in")?,
            clock_out: row.get("clock_out")?,
        })
    }
}

impl WorkforceStore for SqliteWorkforceStore {
    fn list_active_alarms(&self) -> Result<Vec<Alarm>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, title, kind, time_of_day, weekdays, active
             FROM work_alarms WHERE active = 1 ORDER BY id",
        )?;
        let alarms = stmt
            .query_map([], Self::row_to_alarm)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to read active alarms")?;
        Ok(alarms)
    }

    fn upsert_alarm(&self, alarm: &Alarm) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO work_alarms (id, user_id, title, kind, time_of_day, weekdays, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                alarm.id,
                alarm.user_id,
                alarm.title,
                alarm.kind.as_str(),
                alarm.time,
                alarm.weekdays_to_csv(),
                alarm.active as i64,
            ],
        )?;
        Ok(())
    }

    fn insert_session(&self, session: &WorkSession) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO work_sessions (id, user_id, clock_in, clock_out)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                session.id,
                session.user_id,
                session.clock_in,
                session.clock_out
            ],
        )?;
        Ok(())
    }

    fn close_session(&self, session_id: &str, clock_out: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE work_sessions SET clock_out = ?1 WHERE id = ?2 AND clock_out IS NULL",
            params![clock_out, session_id],
        )?;
        Ok(())
    }

    fn open_sessions_started_before(&self, cutoff: i64) -> Result<Vec<WorkSession>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, clock_in, clock_out FROM work_sessions
             WHERE clock_out IS NULL AND clock_in < ?1
             ORDER BY clock_in",
        )?;
        let sessions = stmt
            .query_map(params![cutoff], Self::row_to_session)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to read open sessions")?;
        Ok(sessions)
    }

    fn insert_break(&self, break_id: &str, session_id: &str, start: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO work_breaks (id, session_id, start_at, end_at)
             VALUES (?1, ?2, ?3, NULL)",
            params![break_id, session_id, start],
        )?;
        Ok(())
    }

    fn close_break(&self, break_id: &str, end: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE work_breaks SET end_at = ?1 WHERE id = ?2 AND end_at IS NULL",
            params![end, break_id],
        )?;
        Ok(())
    }

    fn work_status(&self, user_id: &str) -> Result<WorkStatus> {
        let conn = self.conn.lock().unwrap();

        let session_id: Option<String> = conn
            .query_row(
                "SELECT id FROM work_sessions
                 WHERE user_id = ?1 AND clock_out IS NULL
                 ORDER BY clock_in DESC LIMIT 1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;

        let session_id = match session_id {
            Some(id) => id,
            None => return Ok(WorkStatus::not_clocked_in()),
        };

        let break_id: Option<String> = conn
            .query_row(
                "SELECT id FROM work_breaks
                 WHERE session_id = ?1 AND end_at IS NULL
                 ORDER BY start_at DESC LIMIT 1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;

        Ok(match break_id {
            Some(break_id) => WorkStatus {
                state: WorkState::OnBreak,
                active_session_id: Some(session_id),
                active_break_id: Some(break_id),
            },
            None => WorkStatus {
                state: WorkState::ClockedIn,
                active_session_id: Some(session_id),
                active_break_id: None,
            },
        })
    }

    fn get_user(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let conn = self.conn.lock().unwrap();
        let user = conn
            .query_row(
                "SELECT id, display_name, profile_picture FROM users WHERE id = ?1",
                params![user_id],
                |row| {
                    Ok(UserProfile {
                        id: row.get(0)?,
                        display_name: row.get(1)?,
                        profile_picture: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    fn upsert_user(&self, user: &UserProfile) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO users (id, display_name, profile_picture)
             VALUES (?1, ?2, ?3)",
            params![user.id, user.display_name, user.profile_picture],
        )?;
        Ok(())
    }

    fn set_profile_picture(&self, user_id: &str, path: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE users SET profile_picture = ?1 WHERE id = ?2",
            params![path, user_id],
        )?;
        if updated == 0 {
            anyhow::bail!("User {} not found", user_id);
        }
        Ok(())
    }
}

impl SubscriptionStore for SqliteWorkforceStore {
    fn list_subscriptions(&self, user_id: &str) -> Result<Vec<PushSubscription>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT endpoint, user_id, p256dh, auth, device_id, updated_at
             FROM push_subscriptions WHERE user_id = ?1 ORDER BY updated_at DESC",
        )?;
        let subscriptions = stmt
            .query_map(params![user_id], |row| {
                Ok(PushSubscription {
                    endpoint: row.get(0)?,
                    user_id: row.get(1)?,
                    p256dh: row.get(2)?,
                    auth: row.get(3)?,
                    device_id: row.get(4)?,
                    updated_at: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to read push subscriptions")?;
        Ok(subscriptions)
    }

    fn upsert_subscription(&self, subscription: &PushSubscription) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO push_subscriptions
             (endpoint, user_id, p256dh, auth, device_id, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                subscription.endpoint,
                subscription.user_id,
                subscription.p256dh,
                subscription.auth,
                subscription.device_id,
                subscription.updated_at,
            ],
        )?;
        Ok(())
    }

    fn delete_subscription(&self, endpoint: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM push_subscriptions WHERE endpoint = ?1",
            params![endpoint],
        )?;
        Ok(deleted > 0)
    }
}
