use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use punchcard_scheduler::config::{AppConfig, CliConfig, FileConfig};
use punchcard_scheduler::jobs::{ImageJobProcessor, JobPaths, SqliteImageJobStore};
use punchcard_scheduler::notifier::{
    DeliveryDedup, NotificationScheduler, PushNotifier, SchedulerRegistry,
};
use punchcard_scheduler::push::{ActionTokenSigner, HttpPushChannel, LogOnlyPushChannel, PushChannel};
use punchcard_scheduler::workforce::SqliteWorkforceStore;

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Directory holding the SQLite databases.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Directory holding uploaded images awaiting processing.
    #[clap(long, value_parser = parse_path)]
    pub uploads_dir: Option<PathBuf>,

    /// Directory processed images are written to.
    #[clap(long, value_parser = parse_path)]
    pub processed_dir: Option<PathBuf>,

    /// Base URL of the push relay service. Notifications are logged only
    /// when unset.
    #[clap(long)]
    pub push_relay_url: Option<String>,

    /// Timeout in seconds for push relay requests.
    #[clap(long, default_value_t = 10)]
    pub push_relay_timeout_sec: u64,

    /// Secret used to sign notification action tokens.
    #[clap(long)]
    pub action_token_secret: Option<String>,

    /// Lifetime in seconds of notification action tokens.
    #[clap(long, default_value_t = 600)]
    pub action_token_ttl_sec: u64,

    /// Interval in seconds between job queue polls.
    #[clap(long, default_value_t = 1)]
    pub poll_interval_secs: u64,

    /// Maximum number of image jobs processed concurrently.
    #[clap(long, default_value_t = 2)]
    pub max_concurrent_jobs: usize,

    /// Seconds to wait for in-flight jobs when stopping.
    #[clap(long, default_value_t = 30)]
    pub stop_timeout_secs: u64,

    /// Interval in seconds between alarm checks.
    #[clap(long, default_value_t = 30)]
    pub alarm_tick_secs: u64,

    /// Interval in seconds between incomplete-session checks.
    #[clap(long, default_value_t = 300)]
    pub session_tick_secs: u64,

    /// Path to a TOML config file. Values in it override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            db_dir: self.db_dir.clone(),
            uploads_dir: self.uploads_dir.clone(),
            processed_dir: self.processed_dir.clone(),
            push_relay_url: self.push_relay_url.clone(),
            push_relay_timeout_sec: self.push_relay_timeout_sec,
            action_token_secret: self.action_token_secret.clone(),
            action_token_ttl_sec: self.action_token_ttl_sec,
            poll_interval_secs: self.poll_interval_secs,
            max_concurrent_jobs: self.max_concurrent_jobs,
            stop_timeout_secs: self.stop_timeout_secs,
            alarm_tick_secs: self.alarm_tick_secs,
            session_tick_secs: self.session_tick_secs,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    info!("Opening SQLite databases in {:?}...", config.db_dir);
    let workforce = Arc::new(SqliteWorkforceStore::new(config.workforce_db_path())?);
    let job_store = Arc::new(SqliteImageJobStore::new(config.jobs_db_path())?);

    std::fs::create_dir_all(&config.uploads_dir)
        .with_context(|| format!("Failed to create uploads dir {:?}", config.uploads_dir))?;
    std::fs::create_dir_all(&config.processed_dir)
        .with_context(|| format!("Failed to create processed dir {:?}", config.processed_dir))?;

    let channel: Arc<dyn PushChannel> = match &config.push_relay_url {
        Some(url) => {
            info!("Using push relay at {}", url);
            Arc::new(HttpPushChannel::new(
                url.clone(),
                config.push_relay_timeout_sec,
            )?)
        }
        None => {
            warn!("No push relay configured, notifications will only be logged");
            Arc::new(LogOnlyPushChannel)
        }
    };

    let token_secret = config.action_token_secret.clone().unwrap_or_else(|| {
        warn!("No action token secret configured, using an ephemeral one");
        Uuid::new_v4().to_string()
    });
    let token_signer = ActionTokenSigner::new(&token_secret, config.action_token_ttl);

    let dedup = Arc::new(DeliveryDedup::new());
    let notifier = Arc::new(PushNotifier::new(
        workforce.clone(),
        workforce.clone(),
        channel,
        token_signer,
        dedup.clone(),
    ));
    let scheduler = Arc::new(NotificationScheduler::new(
        workforce.clone(),
        notifier,
        dedup,
        config.scheduler.clone(),
    ));
    let registry = SchedulerRegistry::new(scheduler);
    registry.start().await;

    let processor = Arc::new(ImageJobProcessor::new(
        job_store,
        workforce,
        JobPaths::new(&config.uploads_dir, &config.processed_dir),
        config.job_processor.clone(),
    ));
    processor.start().await;

    info!("punchcard-scheduler running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutting down...");
    registry.stop().await;
    processor.stop().await;
    Ok(())
}
