mod file_config;

pub use file_config::{FileConfig, JobsConfig, SchedulerConfig};

use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::jobs::JobProcessorSettings;
use crate::notifier::SchedulerSettings;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub uploads_dir: Option<PathBuf>,
    pub processed_dir: Option<PathBuf>,
    pub push_relay_url: Option<String>,
    pub push_relay_timeout_sec: u64,
    pub action_token_secret: Option<String>,
    pub action_token_ttl_sec: u64,
    pub poll_interval_secs: u64,
    pub max_concurrent_jobs: usize,
    pub stop_timeout_secs: u64,
    pub alarm_tick_secs: u64,
    pub session_tick_secs: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            db_dir: None,
            uploads_dir: None,
            processed_dir: None,
            push_relay_url: None,
            push_relay_timeout_sec: 10,
            action_token_secret: None,
            action_token_ttl_sec: 600,
            poll_interval_secs: 1,
            max_concurrent_jobs: 2,
            stop_timeout_secs: 30,
            alarm_tick_secs: 30,
            session_tick_secs: 300,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub uploads_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub push_relay_url: Option<String>,
    pub push_relay_timeout_sec: u64,
    pub action_token_secret: Option<String>,
    pub action_token_ttl: Duration,
    pub job_processor: JobProcessorSettings,
    pub scheduler: SchedulerSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let uploads_dir = file
            .uploads_dir
            .map(PathBuf::from)
            .or_else(|| cli.uploads_dir.clone())
            .unwrap_or_else(|| db_dir.join("uploads"));
        let processed_dir = file
            .processed_dir
            .map(PathBuf::from)
            .or_else(|| cli.processed_dir.clone())
            .unwrap_or_else(|| db_dir.join("processed"));

        let push_relay_url = file
            .push_relay_url
            .or_else(|| cli.push_relay_url.clone());
        let push_relay_timeout_sec = file
            .push_relay_timeout_sec
            .unwrap_or(cli.push_relay_timeout_sec);

        let action_token_secret = file
            .action_token_secret
            .or_else(|| cli.action_token_secret.clone());
        let action_token_ttl =
            Duration::from_secs(file.action_token_ttl_sec.unwrap_or(cli.action_token_ttl_sec));

        let jobs_file = file.jobs.unwrap_or_default();
        let max_concurrent_jobs = jobs_file
            .max_concurrent_jobs
            .unwrap_or(cli.max_concurrent_jobs);
        if max_concurrent_jobs == 0 {
            bail!("max_concurrent_jobs must be at least 1");
        }
        let job_processor = JobProcessorSettings {
            poll_interval: Duration::from_secs(
                jobs_file.poll_interval_secs.unwrap_or(cli.poll_interval_secs),
            ),
            max_concurrent_jobs,
            stop_timeout: Duration::from_secs(
                jobs_file.stop_timeout_secs.unwrap_or(cli.stop_timeout_secs),
            ),
        };

        let scheduler_file = file.scheduler.unwrap_or_default();
        let scheduler = SchedulerSettings {
            alarm_tick: Duration::from_secs(
                scheduler_file.alarm_tick_secs.unwrap_or(cli.alarm_tick_secs),
            ),
            session_tick: Duration::from_secs(
                scheduler_file
                    .session_tick_secs
                    .unwrap_or(cli.session_tick_secs),
            ),
            session_window_start_hour: scheduler_file.session_window_start_hour.unwrap_or(8),
            session_window_end_hour: scheduler_file.session_window_end_hour.unwrap_or(10),
        };
        if scheduler.session_window_start_hour >= scheduler.session_window_end_hour {
            bail!(
                "Invalid session window: {}..{}",
                scheduler.session_window_start_hour,
                scheduler.session_window_end_hour
            );
        }

        Ok(Self {
            db_dir,
            uploads_dir,
            processed_dir,
            push_relay_url,
            push_relay_timeout_sec,
            action_token_secret,
            action_token_ttl,
            job_processor,
            scheduler,
        })
    }

    pub fn jobs_db_path(&self) -> PathBuf {
        self.db_dir.join("jobs.db")
    }

    pub fn workforce_db_path(&self) -> PathBuf {
        self.db_dir.join("workforce.db")
    }
}
