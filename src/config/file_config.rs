use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub uploads_dir: Option<String>,
    pub processed_dir: Option<String>,
    pub push_relay_url: Option<String>,
    pub push_relay_timeout_sec: Option<u64>,
    pub action_token_secret: Option<String>,
    pub action_token_ttl_sec: Option<u64>,

    // Feature configs
    pub jobs: Option<JobsConfig>,
    pub scheduler: Option<SchedulerConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct JobsConfig {
    pub poll_interval_secs: Option<u64>,
    pub max_concurrent_jobs: Option<usize>,
    pub stop_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SchedulerConfig {
    pub alarm_tick_secs: Option<u64>,
    pub session_tick_secs: Option<u64>,
    pub session_window_start_hour: Option<u32>,
    pub session_window_end_hour: Option<u32>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
