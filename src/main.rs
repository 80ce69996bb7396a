//! # LLM Provider Gateway
//!
//! Chat gateway in front of independently configured LLM providers, with
//! hot-reloadable adapters, streaming relay and asynchronous request logging.
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults (in-memory storage, no providers, auth disabled)
//! llm-provider-gateway
//!
//! # Start with a config file
//! llm-provider-gateway --config /path/to/gateway.yaml
//!
//! # Or name the file through the environment, with overrides
//! GATEWAY_CONFIG=gateway.toml GATEWAY_PORT=9000 llm-provider-gateway
//! ```

use anyhow::Context;
use clap::Parser;
use gateway_config::{ConfigLoader, GatewayConfig};
use gateway_core::{ApiKeyRepository, ProviderRepository, RequestLogRepository, UserRepository};
use gateway_providers::{default_factories, InstanceStore, ProviderManager};
use gateway_server::{AccountService, AppState, Server, ServerConfig};
use gateway_storage::{
    ensure_schema, DatabasePool, InMemoryApiKeyRepository, InMemoryProviderRepository,
    InMemoryRequestLogRepository, InMemoryUserRepository, SqlApiKeyRepository,
    SqlProviderRepository, SqlRequestLogRepository, SqlUserRepository, StorageConfig,
};
use gateway_telemetry::{init_logging, AsyncLogWriter, LoggingConfig, Metrics, MetricsConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// LLM Provider Gateway - chat relay in front of hot-reloadable providers
#[derive(Parser, Debug)]
#[command(name = "llm-provider-gateway")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (YAML or TOML)
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,
}

/// Application entry point
#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load(cli.config).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            std::process::exit(1);
        }
    };

    if let Err(e) = init_logging(&logging_config(&config)) {
        eprintln!("Failed to initialize logging: {e}");
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting LLM Provider Gateway"
    );

    if let Err(e) = run(config).await {
        error!(error = %e, "Application failed");
        std::process::exit(1);
    }
}

async fn load(path: Option<PathBuf>) -> anyhow::Result<GatewayConfig> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = path {
        loader = loader.with_file(path);
    }
    Ok(loader.load().await?)
}

fn logging_config(config: &GatewayConfig) -> LoggingConfig {
    let format = config.logging.format.parse().unwrap_or_default();
    LoggingConfig::new()
        .with_level(&config.logging.level)
        .with_format(format)
}

/// Main application logic
async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    info!(
        host = %config.server.host,
        port = config.server.port,
        providers = config.providers.len(),
        auth = config.auth.is_enabled(),
        "Configuration loaded"
    );

    let repos = repositories(&config).await?;

    let metrics = Metrics::new(&MetricsConfig::default())?;

    let manager = Arc::new(ProviderManager::new(
        repos.providers,
        default_factories(),
        Arc::new(InstanceStore::new()),
    ));

    for seed in &config.providers {
        if manager.seed_provider(seed.to_provider_config()).await? {
            info!(provider = %seed.name, "Seeded provider from configuration");
        }
    }

    let report = manager.init_providers().await?;
    if !report.is_success() {
        warn!(
            failed = ?report.failed_names(),
            "Some providers could not be brought live"
        );
    }
    info!(live = manager.store().len(), "Provider store initialized");

    let log_writer = Arc::new(AsyncLogWriter::spawn(
        repos.request_logs,
        config.log_writer.queue_capacity,
        Some(metrics.clone()),
    ));

    let server_config = ServerConfig::from_settings(&config.server);
    let state = AppState::builder()
        .config(config)
        .manager(manager)
        .log_writer(Arc::clone(&log_writer))
        .metrics(metrics)
        .accounts(AccountService::new(repos.users, repos.api_keys))
        .build()?;

    let relay = state.relay.clone();
    let drain_timeout = server_config.shutdown_timeout;
    let result = Server::new(server_config, state).run().await;

    // Streams cut off by shutdown still submit their interrupted records.
    if !relay.drain(drain_timeout).await {
        warn!("Some streams did not finalize before the log writer closed");
    }

    info!("Flushing request logs");
    log_writer.shutdown().await;
    let stats = log_writer.stats();
    info!(
        written = stats.written,
        dropped = stats.dropped,
        failed = stats.failed,
        "Request log writer stopped"
    );

    result.context("server failed")
}

struct Repositories {
    providers: Arc<dyn ProviderRepository>,
    request_logs: Arc<dyn RequestLogRepository>,
    users: Arc<dyn UserRepository>,
    api_keys: Arc<dyn ApiKeyRepository>,
}

async fn repositories(config: &GatewayConfig) -> anyhow::Result<Repositories> {
    if !config.database.is_configured() {
        info!("No database configured, using in-memory storage");
        return Ok(Repositories {
            providers: Arc::new(InMemoryProviderRepository::new()),
            request_logs: Arc::new(InMemoryRequestLogRepository::new()),
            users: Arc::new(InMemoryUserRepository::new()),
            api_keys: Arc::new(InMemoryApiKeyRepository::new()),
        });
    }

    let storage = StorageConfig::new(&config.database.url)
        .with_max_connections(config.database.max_connections)
        .with_min_connections(config.database.min_connections)
        .with_connect_timeout(config.database.connect_timeout);

    let pool = DatabasePool::connect(storage)
        .await
        .context("failed to connect to database")?;
    ensure_schema(&pool).await.context("failed to prepare schema")?;
    info!(database = ?pool.database_type(), "Database ready");

    Ok(Repositories {
        providers: Arc::new(SqlProviderRepository::new(pool.clone())),
        request_logs: Arc::new(SqlRequestLogRepository::new(pool.clone())),
        users: Arc::new(SqlUserRepository::new(pool.clone())),
        api_keys: Arc::new(SqlApiKeyRepository::new(pool)),
    })
}
