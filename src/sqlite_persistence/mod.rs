//! Shared SQLite schema infrastructure.
//!
//! Each store owns its own database file; schemas are versioned through
//! `PRAGMA user_version` and validated against the declared table layout
//! on open.

mod versioned_schema;

pub use versioned_schema::{
    open_versioned, Column, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP,
};

/// Offset added to schema versions when written to `PRAGMA user_version`,
/// so a database created by an unrelated tool (version 0) is rejected.
pub const BASE_DB_VERSION: usize = 100;
