use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub port: Option<u16>,
    pub logging_level: Option<String>,
    pub search_api_url: Option<String>,
    pub search_api_key: Option<String>,
    pub search_timeout_sec: Option<u64>,
    pub credential_key_path: Option<String>,

    // Feature configs
    pub scheduler: Option<ScanSchedulerConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ScanSchedulerConfig {
    pub api_name: Option<String>,
    pub default_daily_limit: Option<i64>,
    pub claim_batch_size: Option<usize>,
    pub max_attempts: Option<i32>,
    pub retry_backoff_secs: Option<u64>,
    pub posted_within_days: Option<u32>,
    pub max_tasks_per_batch: Option<usize>,
    pub tick_interval_secs: Option<u64>,
    pub stale_in_progress_threshold_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
