use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use std::{fmt::Debug, path::PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use scan_scheduler::config::{AppConfig, CliConfig, FileConfig};
use scan_scheduler::scan::{
    BudgetLedger, CredentialCipher, KeyPool, PlaintextCredentialCipher, ProgressAggregator,
    RsaCredentialCipher, ScanManager, SharedCredential, SqliteScanStore, SystemTimeProvider,
    TaskExecutor, TimeProvider,
};
use scan_scheduler::search_client::{DistinctCompanySignals, HttpJobSearchClient};
use scan_scheduler::server::{metrics, run_server, RequestsLoggingLevel};

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
    /// Path to a TOML config file. Its values override the CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding the scan database.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3002)]
    pub port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Base URL of the external job search API.
    #[clap(long)]
    pub search_api_url: Option<String>,

    /// API key of the shared default credential.
    #[clap(long)]
    pub search_api_key: Option<String>,

    /// Timeout in seconds for search API requests.
    #[clap(long, default_value_t = 30)]
    pub search_timeout_sec: u64,

    /// PEM file with the RSA private key for owner credentials.
    #[clap(long, value_parser = parse_path)]
    pub credential_key_path: Option<PathBuf>,

    /// Seconds between executor cycles. Set to 0 to rely on the tick endpoint only.
    #[clap(long, default_value_t = 60)]
    pub tick_interval_secs: u64,
}

impl From<&CliArgs> for CliConfig {
    fn from(args: &CliArgs) -> Self {
        CliConfig {
            db_dir: args.db_dir.clone(),
            port: args.port,
            logging_level: args.logging_level.clone(),
            search_api_url: args.search_api_url.clone(),
            search_api_key: args.search_api_key.clone(),
            search_timeout_sec: args.search_timeout_sec,
            credential_key_path: args.credential_key_path.clone(),
            tick_interval_secs: args.tick_interval_secs,
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
        .try_init()?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config file {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&CliConfig::from(&cli_args), file_config)?;
    let settings = &config.scheduler;

    info!("Initializing metrics...");
    metrics::init_metrics();

    let db_path = config.scan_db_path();
    info!("Opening SQLite scan database at {:?}...", db_path);
    let store = Arc::new(SqliteScanStore::new(&db_path)?);
    let clock: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);

    let cipher: Arc<dyn CredentialCipher> = match &config.credential_key_path {
        Some(path) => {
            info!("Owner credentials decrypted with key {:?}", path);
            Arc::new(RsaCredentialCipher::from_pem_file(path)?)
        }
        None => {
            warn!("No credential key configured, owner credentials are read as plaintext");
            Arc::new(PlaintextCredentialCipher)
        }
    };

    let search_api_url = config
        .search_api_url
        .clone()
        .context("search_api_url must be specified via --search-api-url or in config file")?;
    let searcher = Arc::new(HttpJobSearchClient::new(
        search_api_url.clone(),
        config.search_timeout_sec,
    )?);
    info!("Search API configured at {}", search_api_url);

    let ledger = Arc::new(BudgetLedger::new(store.clone(), clock.clone()));
    let key_pool = Arc::new(KeyPool::new(
        store.clone(),
        ledger,
        cipher,
        SharedCredential {
            api_key: config.search_api_key.clone(),
            daily_limit: Some(settings.default_daily_limit),
        },
    ));
    let aggregator = Arc::new(ProgressAggregator::new(store.clone(), clock.clone()));
    let executor = Arc::new(TaskExecutor::new(
        store.clone(),
        key_pool.clone(),
        searcher,
        Arc::new(DistinctCompanySignals),
        aggregator.clone(),
        clock.clone(),
        settings,
    ));
    let manager = Arc::new(ScanManager::new(
        store,
        aggregator,
        key_pool,
        clock,
        settings,
    ));

    let shutdown = CancellationToken::new();

    let ticker = if settings.tick_interval_secs > 0 {
        let executor = executor.clone();
        let shutdown = shutdown.clone();
        let interval = Duration::from_secs(settings.tick_interval_secs);
        Some(tokio::spawn(async move {
            executor.run(interval, shutdown).await
        }))
    } else {
        info!("Background ticker disabled, cycles run via POST /v1/scan/tick");
        None
    };

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
            }
            shutdown.cancel();
        });
    }

    info!("Ready to serve at port {}!", config.port);
    let served = run_server(
        manager,
        executor,
        config.logging_level.clone(),
        config.port,
        shutdown.clone(),
    )
    .await;

    shutdown.cancel();
    if let Some(ticker) = ticker {
        if let Err(e) = ticker.await {
            warn!("Ticker task ended abnormally: {}", e);
        }
    }
    served
}
