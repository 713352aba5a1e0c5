//! Background image job processor.
//!
//! Polls the queue store and runs up to `max_concurrent_jobs` transforms at
//! a time, each on the blocking thread pool. The queue store remains the
//! source of truth; this loop keeps only an in-flight id set and a semaphore.

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::workforce::WorkforceStore;

use super::models::JobKind;
use super::store::ImageJobStore;
use super::transform::{confine, run_transform, JobPaths};
use super::ImageJob;

/// Tuning knobs for the processor loop.
#[derive(Debug, Clone)]
pub struct JobProcessorSettings {
    pub poll_interval: Duration,
    pub max_concurrent_jobs: usize,
    pub stop_timeout: Duration,
}

impl Default for JobProcessorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_concurrent_jobs: 2,
            stop_timeout: Duration::from_secs(30),
        }
    }
}

/// Snapshot of the processor for status endpoints and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorStatus {
    pub is_running: bool,
    pub currently_processing: Vec<String>,
    pub max_concurrent_jobs: usize,
}

struct LoopHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    wake_tx: mpsc::Sender<()>,
}

pub struct ImageJobProcessor {
    store: Arc<dyn ImageJobStore>,
    workforce: Arc<dyn WorkforceStore>,
    paths: JobPaths,
    settings: JobProcessorSettings,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<StdMutex<HashSet<String>>>,
    handle: Mutex<Option<LoopHandle>>,
}

impl ImageJobProcessor {
    pub fn new(
        store: Arc<dyn ImageJobStore>,
        workforce: Arc<dyn WorkforceStore>,
        paths: JobPaths,
        settings: JobProcessorSettings,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(settings.max_concurrent_jobs));
        Self {
            store,
            workforce,
            paths,
            settings,
            semaphore,
            in_flight: Arc::new(StdMutex::new(HashSet::new())),
            handle: Mutex::new(None),
        }
    }

    /// Start the poll loop. Safe to call when already running.
    pub async fn start(self: &Arc<Self>) {
        let mut guard = self.handle.lock().await;
        if guard.is_some() {
            debug!("Job processor already running");
            return;
        }

        info!(
            "Starting job processor (interval={}ms, max_concurrent={})",
            self.settings.poll_interval.as_millis(),
            self.settings.max_concurrent_jobs
        );
        let cancel = CancellationToken::new();
        let (wake_tx, wake_rx) = mpsc::channel(1);
        let task = tokio::spawn(self.clone().run_loop(cancel.clone(), wake_rx));
        *guard = Some(LoopHandle {
            cancel,
            task,
            wake_tx,
        });
    }

    /// Stop the poll loop and wait for in-flight jobs to drain, up to the
    /// stop timeout. Safe to call when not running.
    pub async fn stop(&self) {
        let handle = self.handle.lock().await.take();
        let Some(handle) = handle else {
            return;
        };

        info!("Stopping job processor");
        handle.cancel.cancel();
        if let Err(e) = handle.task.await {
            error!("Job processor loop panicked: {}", e);
        }

        let deadline = Instant::now() + self.settings.stop_timeout;
        loop {
            let remaining = self.in_flight.lock().unwrap().len();
            if remaining == 0 {
                break;
            }
            if Instant::now() >= deadline {
                warn!(
                    "Job processor stop timeout with {} job(s) still in flight",
                    remaining
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        info!("Job processor stopped");
    }

    /// Hint that a job was just enqueued. Starts the processor if it is not
    /// running, otherwise wakes the loop for an out-of-band poll.
    pub async fn notify_new_job(self: &Arc<Self>) {
        let guard = self.handle.lock().await;
        match guard.as_ref() {
            Some(handle) => {
                // A full hint channel already guarantees a poll soon.
                let _ = handle.wake_tx.try_send(());
            }
            None => {
                drop(guard);
                self.start().await;
            }
        }
    }

    pub async fn status(&self) -> ProcessorStatus {
        let is_running = self.handle.lock().await.is_some();
        let mut currently_processing: Vec<String> =
            self.in_flight.lock().unwrap().iter().cloned().collect();
        currently_processing.sort();
        ProcessorStatus {
            is_running,
            currently_processing,
            max_concurrent_jobs: self.settings.max_concurrent_jobs,
        }
    }

    async fn run_loop(
        self: Arc<Self>,
        cancel: CancellationToken,
        mut wake_rx: mpsc::Receiver<()>,
    ) {
        // The first interval tick completes immediately, so a freshly started
        // processor polls without waiting a full interval.
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Job processor loop shutting down");
                    break;
                }
                _ = ticker.tick() => {}
                Some(_) = wake_rx.recv() => {}
            }
            self.tick().await;
        }
    }

    async fn tick(self: &Arc<Self>) {
        let capacity = {
            let in_flight = self.in_flight.lock().unwrap();
            self.settings
                .max_concurrent_jobs
                .saturating_sub(in_flight.len())
        };
        if capacity == 0 {
            return;
        }

        // Store errors are transient; the next tick retries.
        let pending = match self.store.fetch_pending(capacity) {
            Ok(pending) => pending,
            Err(e) => {
                warn!("Failed to fetch pending jobs: {:#}", e);
                return;
            }
        };

        for job in pending {
            let permit = match self.semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => break,
            };
            {
                let mut in_flight = self.in_flight.lock().unwrap();
                if !in_flight.insert(job.id.clone()) {
                    continue;
                }
            }
            let this = self.clone();
            tokio::spawn(async move {
                let job_id = job.id.clone();
                this.process_job(job).await;
                this.in_flight.lock().unwrap().remove(&job_id);
                drop(permit);
            });
        }
    }

    async fn process_job(&self, job: ImageJob) {
        match self.store.mark_processing(&job.id) {
            Ok(true) => {}
            Ok(false) => {
                debug!("Job {} no longer pending, skipping", job.id);
                return;
            }
            Err(e) => {
                warn!("Failed to claim job {}: {:#}", job.id, e);
                if let Err(e) = self.store.mark_failed(&job.id, &format!("{:#}", e)) {
                    error!("Failed to record claim error for job {}: {:#}", job.id, e);
                }
                return;
            }
        }
        info!("Processing image job {} ({})", job.id, job.kind.as_str());

        let result = {
            let job = job.clone();
            let paths = self.paths.clone();
            tokio::task::spawn_blocking(move || run_transform(&job, &paths)).await
        };

        match result {
            Ok(Ok(output)) => {
                let output_path = output.to_string_lossy().to_string();
                if let Err(e) = self.store.mark_completed(&job.id, &output_path) {
                    error!("Failed to record completion of job {}: {:#}", job.id, e);
                    return;
                }
                if job.kind == JobKind::ProfilePicture {
                    if let Err(e) = self
                        .workforce
                        .set_profile_picture(job.owning_user(), &output_path)
                    {
                        warn!(
                            "Job {} completed but profile picture update failed: {:#}",
                            job.id, e
                        );
                    }
                }
                self.cleanup_input(&job);
                info!("Job {} completed -> {}", job.id, output_path);
            }
            Ok(Err(e)) => {
                warn!("Job {} failed: {:#}", job.id, e);
                if let Err(e) = self.store.mark_failed(&job.id, &format!("{:#}", e)) {
                    error!("Failed to record failure of job {}: {:#}", job.id, e);
                }
            }
            Err(join_err) => {
                error!("Job {} transform task panicked: {}", job.id, join_err);
                if let Err(e) = self.store.mark_failed(&job.id, "internal error") {
                    error!("Failed to record failure of job {}: {:#}", job.id, e);
                }
            }
        }
    }

    /// Best-effort input removal after a successful transform.
    fn cleanup_input(&self, job: &ImageJob) {
        let input = match confine(&self.paths.uploads_root, &job.input_path) {
            Ok(input) => input,
            Err(_) => return,
        };
        if let Err(e) = std::fs::remove_file(&input) {
            warn!("Failed to delete processed input {:?}: {}", input, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::models::{JobStatus, ResizeConfig, TransformConfig};
    use crate::jobs::store::SqliteImageJobStore;
    use crate::jobs::FitMode;
    use crate::workforce::{SqliteWorkforceStore, UserProfile};
    use tempfile::TempDir;

    fn fast_settings() -> JobProcessorSettings {
        JobProcessorSettings {
            poll_interval: Duration::from_millis(20),
            max_concurrent_jobs: 2,
            stop_timeout: Duration::from_secs(5),
        }
    }

    fn setup(dir: &TempDir) -> (Arc<ImageJobProcessor>, Arc<SqliteImageJobStore>) {
        let uploads = dir.path().join("uploads");
        std::fs::create_dir_all(&uploads).unwrap();
        let store = Arc::new(SqliteImageJobStore::in_memory().unwrap());
        let workforce = Arc::new(SqliteWorkforceStore::in_memory().unwrap());
        workforce
            .upsert_user(&UserProfile {
                id: "user-1".to_string(),
                display_name: "Test".to_string(),
                profile_picture: None,
            })
            .unwrap();
        let processor = Arc::new(ImageJobProcessor::new(
            store.clone(),
            workforce,
            JobPaths::new(uploads, dir.path().join("processed")),
            fast_settings(),
        ));
        (processor, store)
    }

    fn enqueue_png_job(
        dir: &TempDir,
        store: &SqliteImageJobStore,
        name: &str,
        kind: JobKind,
    ) -> ImageJob {
        let input = dir.path().join("uploads").join(name);
        image::RgbImage::from_pixel(32, 32, image::Rgb([10, 20, 30]))
            .save(&input)
            .unwrap();
        let job = ImageJob::new(
            "user-1",
            kind,
            name,
            TransformConfig {
                resize: Some(ResizeConfig {
                    width: 16,
                    height: 16,
                    fit: FitMode::Cover,
                }),
                quality: 85,
            },
        );
        store.enqueue(&job).unwrap();
        job
    }

    async fn wait_for_status(
        store: &SqliteImageJobStore,
        id: &str,
        wanted: JobStatus,
    ) -> ImageJob {
        for _ in 0..200 {
            let job = store.get_job(id).unwrap().unwrap();
            if job.status == wanted {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached {:?}", id, wanted);
    }

    #[tokio::test]
    async fn test_processor_completes_job_and_deletes_input() {
        let dir = TempDir::new().unwrap();
        let (processor, store) = setup(&dir);
        let job = enqueue_png_job(&dir, &store, "pic.png", JobKind::Generic);

        processor.start().await;
        let done = wait_for_status(&store, &job.id, JobStatus::Completed).await;
        processor.stop().await;

        let output = done.output_path.unwrap();
        assert!(std::path::Path::new(&output).is_file());
        assert!(!dir.path().join("uploads/pic.png").exists());
    }

    /// Errors on claim writes; everything else goes to the wrapped store.
    struct ClaimErrorStore {
        inner: SqliteImageJobStore,
    }

    impl ImageJobStore for ClaimErrorStore {
        fn enqueue(&self, job: &ImageJob) -> anyhow::Result<()> {
            self.inner.enqueue(job)
        }

        fn get_job(&self, id: &str) -> anyhow::Result<Option<ImageJob>> {
            self.inner.get_job(id)
        }

        fn fetch_pending(&self, limit: usize) -> anyhow::Result<Vec<ImageJob>> {
            self.inner.fetch_pending(limit)
        }

        fn mark_processing(&self, _id: &str) -> anyhow::Result<bool> {
            anyhow::bail!("database is locked")
        }

        fn mark_completed(&self, id: &str, output_path: &str) -> anyhow::Result<()> {
            self.inner.mark_completed(id, output_path)
        }

        fn mark_failed(&self, id: &str, error_message: &str) -> anyhow::Result<()> {
            self.inner.mark_failed(id, error_message)
        }

        fn requeue_failed(&self, id: &str) -> anyhow::Result<ImageJob> {
            self.inner.requeue_failed(id)
        }

        fn count_processing(&self) -> anyhow::Result<usize> {
            self.inner.count_processing()
        }
    }

    #[tokio::test]
    async fn test_claim_write_error_marks_job_failed() {
        let dir = TempDir::new().unwrap();
        let uploads = dir.path().join("uploads");
        std::fs::create_dir_all(&uploads).unwrap();
        let store = Arc::new(ClaimErrorStore {
            inner: SqliteImageJobStore::in_memory().unwrap(),
        });
        let workforce = Arc::new(SqliteWorkforceStore::in_memory().unwrap());
        let processor = Arc::new(ImageJobProcessor::new(
            store.clone(),
            workforce,
            JobPaths::new(uploads, dir.path().join("processed")),
            fast_settings(),
        ));

        let job = ImageJob::new("user-1", JobKind::Generic, "pic.png", TransformConfig::default());
        store.enqueue(&job).unwrap();

        processor.process_job(job.clone()).await;

        let failed = store.get_job(&job.id).unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.error_message.unwrap().contains("database is locked"));
    }

    #[tokio::test]
    async fn test_failed_job_records_message_and_loop_survives() {
        let dir = TempDir::new().unwrap();
        let (processor, store) = setup(&dir);

        let bad = ImageJob::new(
            "user-1",
            JobKind::Generic,
            "missing.png",
            TransformConfig::default(),
        );
        store.enqueue(&bad).unwrap();
        processor.start().await;
        let failed = wait_for_status(&store, &bad.id, JobStatus::Failed).await;
        assert!(failed.error_message.unwrap().contains("does not exist"));

        // The loop keeps going: a valid job enqueued afterwards completes.
        let good = enqueue_png_job(&dir, &store, "ok.png", JobKind::Generic);
        processor.notify_new_job().await;
        wait_for_status(&store, &good.id, JobStatus::Completed).await;
        processor.stop().await;
    }

    #[tokio::test]
    async fn test_notify_new_job_starts_stopped_processor() {
        let dir = TempDir::new().unwrap();
        let (processor, store) = setup(&dir);
        assert!(!processor.status().await.is_running);

        let job = enqueue_png_job(&dir, &store, "pic.png", JobKind::ProfilePicture);
        processor.notify_new_job().await;
        assert!(processor.status().await.is_running);

        wait_for_status(&store, &job.id, JobStatus::Completed).await;
        processor.stop().await;
        assert!(!processor.status().await.is_running);
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let dir = TempDir::new().unwrap();
        let (processor, _store) = setup(&dir);

        processor.stop().await;
        processor.start().await;
        processor.start().await;
        assert!(processor.status().await.is_running);
        processor.stop().await;
        processor.stop().await;
        assert!(!processor.status().await.is_running);
    }

    #[tokio::test]
    async fn test_status_reports_configured_cap() {
        let dir = TempDir::new().unwrap();
        let (processor, _store) = setup(&dir);
        let status = processor.status().await;
        assert_eq!(status.max_concurrent_jobs, 2);
        assert!(status.currently_processing.is_empty());
    }
}
