mod file_config;

pub use file_config::{FileConfig, ScanSchedulerConfig};

use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub search_api_url: Option<String>,
    pub search_api_key: Option<String>,
    pub search_timeout_sec: u64,
    pub credential_key_path: Option<PathBuf>,
    pub tick_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub search_api_url: Option<String>,
    pub search_api_key: Option<String>,
    pub search_timeout_sec: u64,
    pub credential_key_path: Option<PathBuf>,

    // Feature configs (with defaults)
    pub scheduler: ScanSchedulerSettings,
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

        let port = file.port.unwrap_or(cli.port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let search_api_url = file
            .search_api_url
            .or_else(|| cli.search_api_url.clone());
        let search_api_key = file
            .search_api_key
            .or_else(|| cli.search_api_key.clone());
        let search_timeout_sec = file.search_timeout_sec.unwrap_or(cli.search_timeout_sec);

        let credential_key_path = file
            .credential_key_path
            .map(PathBuf::from)
            .or_else(|| cli.credential_key_path.clone());
        if let Some(path) = &credential_key_path {
            if !path.exists() {
                bail!("Credential key file not found: {:?}", path);
            }
        }

        // Scheduler settings - merge file config with defaults
        let defaults = ScanSchedulerSettings::default();
        let sched_file = file.scheduler.unwrap_or_default();
        let scheduler = ScanSchedulerSettings {
            api_name: sched_file.api_name.unwrap_or(defaults.api_name),
            default_daily_limit: sched_file
                .default_daily_limit
                .unwrap_or(defaults.default_daily_limit),
            claim_batch_size: sched_file
                .claim_batch_size
                .unwrap_or(defaults.claim_batch_size),
            max_attempts: sched_file.max_attempts.unwrap_or(defaults.max_attempts),
            retry_backoff_secs: sched_file
                .retry_backoff_secs
                .unwrap_or(defaults.retry_backoff_secs),
            posted_within_days: sched_file
                .posted_within_days
                .unwrap_or(defaults.posted_within_days),
            max_tasks_per_batch: sched_file
                .max_tasks_per_batch
                .unwrap_or(defaults.max_tasks_per_batch),
            tick_interval_secs: sched_file
                .tick_interval_secs
                .unwrap_or(cli.tick_interval_secs),
            stale_in_progress_threshold_secs: sched_file
                .stale_in_progress_threshold_secs
                .unwrap_or(defaults.stale_in_progress_threshold_secs),
        };

        if scheduler.api_name.trim().is_empty() {
            bail!("scheduler.api_name must not be empty");
        }
        if scheduler.claim_batch_size == 0 {
            bail!("scheduler.claim_batch_size must be at least 1");
        }
        if scheduler.max_attempts < 1 {
            bail!("scheduler.max_attempts must be at least 1");
        }
        if scheduler.stale_in_progress_threshold_secs == 0 {
            bail!("scheduler.stale_in_progress_threshold_secs must be at least 1");
        }

        Ok(Self {
            db_dir,
            port,
            logging_level,
            search_api_url,
            search_api_key,
            search_timeout_sec,
            credential_key_path,
            scheduler,
        })
    }

    pub fn scan_db_path(&self) -> PathBuf {
        self.db_dir.join("scan.db")
    }
}

#[derive(Debug, Clone)]
pub struct ScanSchedulerSettings {
    /// Name of the search API budgets are kept for.
    pub api_name: String,
    /// Daily call limit of the shared default credential.
    pub default_daily_limit: i64,
    pub claim_batch_size: usize,
    pub max_attempts: i32,
    pub retry_backoff_secs: u64,
    pub posted_within_days: u32,
    pub max_tasks_per_batch: usize,
    /// 0 disables the background ticker.
    pub tick_interval_secs: u64,
    /// Processing tasks older than this are assumed abandoned and requeued.
    pub stale_in_progress_threshold_secs: u64,
}

impl Default for ScanSchedulerSettings {
    fn default() -> Self {
        Self {
            api_name: "jobs_search".to_string(),
            default_daily_limit: 100,
            claim_batch_size: 5,
            max_attempts: 3,
            retry_backoff_secs: 900, // 15 minutes
            posted_within_days: 7,
            max_tasks_per_batch: 200,
            tick_interval_secs: 60,
            stale_in_progress_threshold_secs: 3600,
        }
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
