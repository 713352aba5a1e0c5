//! Database schema for jobs.db.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

const IMAGE_JOBS_TABLE_V1: Table = Table {
    name: "image_jobs",
    columns: &[
        sqlite_column!("id", SqlType::Text, is_primary_key = true),
        sqlite_column!("user_id", SqlType::Text, non_null = true),
        sqlite_column!("target_user_id", SqlType::Text),
        sqlite_column!("kind", SqlType::Text, non_null = true),
        sqlite_column!("status", SqlType::Text, non_null = true),
        sqlite_column!("input_path", SqlType::Text, non_null = true),
        sqlite_column!("output_path_override", SqlType::Text),
        sqlite_column!("transform", SqlType::Text, non_null = true),
        sqlite_column!("created_at", SqlType::Integer, non_null = true),
        sqlite_column!("started_at", SqlType::Integer),
        sqlite_column!("completed_at", SqlType::Integer),
        sqlite_column!("output_path", SqlType::Text),
        sqlite_column!("error_message", SqlType::Text),
    ],
    indices: &[
        ("idx_jobs_status", "status, created_at"),
        ("idx_jobs_user", "user_id"),
    ],
};

pub const JOBS_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[IMAGE_JOBS_TABLE_V1],
    migration: None,
}];
