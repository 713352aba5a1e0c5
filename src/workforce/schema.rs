//! Database schema for workforce.db.
//!
//! Holds alarms, work sessions, breaks, the user projection, and push
//! subscriptions. The scheduling core only writes sessions/breaks in tests
//! and through the external CRUD layer; it reads all of them every tick.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

const WORK_ALARMS_TABLE_V1: Table = Table {
    name: "work_alarms",
    columns: &[
        sqlite_column!("id", SqlType::Text, is_primary_key = true),
        sqlite_column!("user_id", SqlType::Text, non_null = true),
        sqlite_column!("title", SqlType::Text, non_null = true),
        sqlite_column!("kind", SqlType::Text, non_null = true),
        sqlite_column!("time_of_day", SqlType::Text, non_null = true),
        sqlite_column!("weekdays", SqlType::Text, non_null = true),
        sqlite_column!("active", SqlType::Integer, non_null = true, default_value = Some("1")),
    ],
    indices: &[("idx_alarms_user", "user_id"), ("idx_alarms_active", "active")],
};

const WORK_SESSIONS_TABLE_V1: Table = Table {
    name: "work_sessions",
    columns: &[
        sqlite_column!("id", SqlType::Text, is_primary_key = true),
        sqlite_column!("user_id", SqlType::Text, non_null = true),
        sqlite_column!("clock_in", SqlType::Integer, non_null = true),
        sqlite_column!("clock_out", SqlType::Integer),
    ],
    indices: &[
        ("idx_sessions_user", "user_id"),
        ("idx_sessions_open", "clock_out, clock_in"),
    ],
};

const WORK_BREAKS_TABLE_V1: Table = Table {
    name: "work_breaks",
    columns: &[
        sqlite_column!("id", SqlType::Text, is_primary_key = true),
        sqlite_column!("session_id", SqlType::Text, non_null = true),
        sqlite_column!("start_at", SqlType::Integer, non_null = true),
        sqlite_column!("end_at", SqlType::Integer),
    ],
    indices: &[("idx_breaks_session", "session_id")],
};

const USERS_TABLE_V1: Table = Table {
    name: "users",
    columns: &[
        sqlite_column!("id", SqlType::Text, is_primary_key = true),
        sqlite_column!("display_name", SqlType::Text, non_null = true),
        sqlite_column!("profile_picture", SqlType::Text),
    ],
    indices: &[],
};

const PUSH_SUBSCRIPTIONS_TABLE_V1: Table = Table {
    name: "push_subscriptions",
    columns: &[
        sqlite_column!("endpoint", SqlType::Text, is_primary_key = true),
        sqlite_column!("user_id", SqlType::Text, non_null = true),
        sqlite_column!("p256dh", SqlType::Text, non_null = true),
        sqlite_column!("auth", SqlType::Text, non_null = true),
        sqlite_column!("device_id", SqlType::Text),
        sqlite_column!("updated_at", SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_subscriptions_user", "user_id")],
};

pub const WORKFORCE_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[
        WORK_ALARMS_TABLE_V1,
        WORK_SESSIONS_TABLE_V1,
        WORK_BREAKS_TABLE_V1,
        USERS_TABLE_V1,
        PUSH_SUBSCRIPTIONS_TABLE_V1,
    ],
    migration: None,
}];
