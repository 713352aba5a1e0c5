//! Shared fixtures for the end-to-end tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use punchcard_scheduler::jobs::{
    FitMode, ImageJob, ImageJobProcessor, ImageJobStore, JobKind, JobPaths, JobProcessorSettings,
    ResizeConfig, SqliteImageJobStore, TransformConfig,
};
use punchcard_scheduler::notifier::{
    DeliveryDedup, NotificationScheduler, PushNotifier, SchedulerSettings,
};
use punchcard_scheduler::push::{
    ActionTokenSigner, PushChannel, PushError, PushPayload, PushSubscription, SubscriptionStore,
};
use punchcard_scheduler::workforce::{SqliteWorkforceStore, UserProfile, WorkforceStore};

pub const TEST_USER: &str = "user-1";

/// Push channel that records every payload instead of delivering it.
pub struct RecordingChannel {
    pub sent: Mutex<Vec<(String, PushPayload)>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent_payloads(&self) -> Vec<PushPayload> {
        self.sent.lock().unwrap().iter().map(|(_, p)| p.clone()).collect()
    }
}

#[async_trait]
impl PushChannel for RecordingChannel {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
    ) -> Result<(), PushError> {
        self.sent
            .lock()
            .unwrap()
            .push((subscription.endpoint.clone(), payload.clone()));
        Ok(())
    }
}

pub struct TestEnv {
    pub dir: TempDir,
    pub workforce: Arc<SqliteWorkforceStore>,
    pub job_store: Arc<SqliteImageJobStore>,
    pub channel: Arc<RecordingChannel>,
    pub processor: Arc<ImageJobProcessor>,
    pub scheduler: NotificationScheduler,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_settings(JobProcessorSettings {
            poll_interval: Duration::from_millis(20),
            max_concurrent_jobs: 2,
            stop_timeout: Duration::from_secs(5),
        })
    }

    pub fn with_settings(job_settings: JobProcessorSettings) -> Self {
        let dir = TempDir::new().unwrap();
        let uploads = dir.path().join("uploads");
        std::fs::create_dir_all(&uploads).unwrap();

        let workforce = Arc::new(SqliteWorkforceStore::new(dir.path().join("workforce.db")).unwrap());
        let job_store = Arc::new(SqliteImageJobStore::new(dir.path().join("jobs.db")).unwrap());
        workforce
            .upsert_user(&UserProfile {
                id: TEST_USER.to_string(),
                display_name: "Test User".to_string(),
                profile_picture: None,
            })
            .unwrap();
        workforce
            .upsert_subscription(&PushSubscription {
                endpoint: "https://push.example/ep-1".to_string(),
                user_id: TEST_USER.to_string(),
                p256dh: "p256dh-key".to_string(),
                auth: "auth-key".to_string(),
                device_id: Some("phone".to_string()),
                updated_at: 100,
            })
            .unwrap();

        let channel = Arc::new(RecordingChannel::new());
        let dedup = Arc::new(DeliveryDedup::new());
        let notifier = Arc::new(PushNotifier::new(
            workforce.clone(),
            workforce.clone(),
            channel.clone(),
            ActionTokenSigner::new("e2e-test-secret", Duration::from_secs(600)),
            dedup.clone(),
        ));
        let scheduler = NotificationScheduler::new(
            workforce.clone(),
            notifier,
            dedup,
            SchedulerSettings::default(),
        );

        let processor = Arc::new(ImageJobProcessor::new(
            job_store.clone(),
            workforce.clone(),
            JobPaths::new(&uploads, dir.path().join("processed")),
            job_settings,
        ));

        Self {
            dir,
            workforce,
            job_store,
            channel,
            processor,
            scheduler,
        }
    }

    pub fn uploads_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("uploads")
    }

    pub fn write_upload(&self, name: &str, width: u32, height: u32) {
        write_png(&self.uploads_dir().join(name), width, height);
    }

    pub fn enqueue_resize_job(&self, kind: JobKind, input: &str, side: u32) -> ImageJob {
        let job = ImageJob::new(
            TEST_USER,
            kind,
            input,
            TransformConfig {
                resize: Some(ResizeConfig {
                    width: side,
                    height: side,
                    fit: FitMode::Cover,
                }),
                quality: 85,
            },
        );
        self.job_store.enqueue(&job).unwrap();
        job
    }

    /// Poll the store until the job reaches `wanted` or a few seconds pass.
    pub async fn wait_for_job(
        &self,
        id: &str,
        wanted: punchcard_scheduler::jobs::JobStatus,
    ) -> ImageJob {
        for _ in 0..300 {
            let job = self.job_store.get_job(id).unwrap().unwrap();
            if job.status == wanted {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached {:?}", id, wanted);
    }
}

pub fn write_png(path: &Path, width: u32, height: u32) {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 251) as u8, (y % 241) as u8, 7])
    });
    img.save(path).unwrap();
}
