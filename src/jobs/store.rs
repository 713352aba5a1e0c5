//! Persisted image job queue.
//!
//! SQLite is the source of truth for job state; the processor holds no
//! in-memory queue and survives restarts by re-reading pending rows.

use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;
use uuid::Uuid;

use crate::sqlite_persistence::open_versioned;

use super::models::{now, ImageJob, JobKind, JobStatus, TransformConfig};
use super::schema::JOBS_VERSIONED_SCHEMAS;

/// Storage operations for the image job queue.
///
/// Status transitions are enforced here with guarded UPDATEs: a terminal row
/// never changes again, and only a pending row can become processing.
pub trait ImageJobStore: Send + Sync {
    fn enqueue(&self, job: &ImageJob) -> Result<()>;

    fn get_job(&self, id: &str) -> Result<Option<ImageJob>>;

    /// Pending jobs, oldest first, capped at `limit`.
    fn fetch_pending(&self, limit: usize) -> Result<Vec<ImageJob>>;

    /// Claim a pending job. Returns false if the row was not pending, in
    /// which case the caller must not process it.
    fn mark_processing(&self, id: &str) -> Result<bool>;

    fn mark_completed(&self, id: &str, output_path: &str) -> Result<()>;

    fn mark_failed(&self, id: &str, error_message: &str) -> Result<()>;

    /// Clone a failed job into a fresh pending row with a new id and return
    /// it. The failed row is left untouched.
    fn requeue_failed(&self, id: &str) -> Result<ImageJob>;

    /// Number of rows currently in `processing`.
    fn count_processing(&self) -> Result<usize>;
}

/// SQLite-backed job queue store.
pub struct SqliteImageJobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteImageJobStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let fresh = !db_path.as_ref().exists();
        let conn = Connection::open(&db_path)?;
        open_versioned(&conn, JOBS_VERSIONED_SCHEMAS, fresh)?;
        if fresh {
            info!("Created new jobs database at {:?}", db_path.as_ref());
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        open_versioned(&conn, JOBS_VERSIONED_SCHEMAS, true)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<ImageJob> {
        let transform: TransformConfig =
            serde_json::from_str(&row.get::<_, String>("transform")?).unwrap_or_default();
        Ok(ImageJob {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            target_user_id: row.get("target_user_id")?,
            kind: JobKind::from_str(&row.get::<_, String>("kind")?).unwrap_or(JobKind::Generic),
            status: JobStatus::from_str(&row.get::<_, String>("status")?)
                .unwrap_or(JobStatus::Failed),
            input_path: row.get("input_path")?,
            output_path_override: row.get("output_path_override")?,
            transform,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            output_path: row.get("output_path")?,
            error_message: row.get("error_message")?,
        })
    }
}

impl ImageJobStore for SqliteImageJobStore {
    fn enqueue(&self, job: &ImageJob) -> Result<()> {
        let transform =
            serde_json::to_string(&job.transform).context("Failed to serialize transform")?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"INSERT INTO image_jobs (
                id, user_id, target_user_id, kind, status, input_path,
                output_path_override, transform, created_at, started_at,
                completed_at, output_path, error_message
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"#,
            params![
                job.id,
                job.user_id,
                job.target_user_id,
                job.kind.as_str(),
                job.status.as_str(),
                job.input_path,
                job.output_path_override,
                transform,
                job.created_at,
                job.started_at,
                job.completed_at,
                job.output_path,
                job.error_message,
            ],
        )?;
        Ok(())
    }

    fn get_job(&self, id: &str) -> Result<Option<ImageJob>> {
        let conn = self.conn.lock().unwrap();
        let job = conn
            .prepare("SELECT * FROM image_jobs WHERE id = ?1")?
            .query_row([id], Self::row_to_job)
            .optional()?;
        Ok(job)
    }

    fn fetch_pending(&self, limit: usize) -> Result<Vec<ImageJob>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"SELECT * FROM image_jobs
               WHERE status = 'pending'
               ORDER BY created_at ASC, id ASC
               LIMIT ?1"#,
        )?;
        let jobs = stmt
            .query_map([limit as i64], Self::row_to_job)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to read pending jobs")?;
        Ok(jobs)
    }

    fn mark_processing(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE image_jobs SET status = 'processing', started_at = ?1
             WHERE id = ?2 AND status = 'pending'",
            params![now(), id],
        )?;
        Ok(updated > 0)
    }

    fn mark_completed(&self, id: &str, output_path: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE image_jobs
             SET status = 'completed', completed_at = ?1, output_path = ?2
             WHERE id = ?3 AND status = 'processing'",
            params![now(), output_path, id],
        )?;
        if updated == 0 {
            bail!("Job {} is not in processing state", id);
        }
        Ok(())
    }

    fn mark_failed(&self, id: &str, error_message: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        // Failing is allowed from pending too, for jobs rejected before claim.
        let updated = conn.execute(
            "UPDATE image_jobs
             SET status = 'failed', completed_at = ?1, error_message = ?2
             WHERE id = ?3 AND status IN ('pending', 'processing')",
            params![now(), error_message, id],
        )?;
        if updated == 0 {
            bail!("Job {} is not in a failable state", id);
        }
        Ok(())
    }

    fn requeue_failed(&self, id: &str) -> Result<ImageJob> {
        let original = self
            .get_job(id)?
            .with_context(|| format!("Job {} not found", id))?;
        if original.status != JobStatus::Failed {
            bail!("Job {} is not failed, refusing to requeue", id);
        }
        let clone = ImageJob {
            id: Uuid::new_v4().to_string(),
            status: JobStatus::Pending,
            created_at: now(),
            started_at: None,
            completed_at: None,
            output_path: None,
            error_message: None,
            ..original
        };
        self.enqueue(&clone)?;
        Ok(clone)
    }

    fn count_processing(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM image_jobs WHERE status = 'processing'",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
