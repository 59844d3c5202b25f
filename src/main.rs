//! CoinbaseAlpha - Main Entry Point
//!
//! Wires configuration, the document store, both collectors, the change
//! watchers and one strategy executor per portfolio, then runs until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use coinbase_alpha::config::load_config;
use coinbase_alpha::{
    AlertDispatcher, AppConfig, CoinbaseFeedClient, CoinbaseRestClient, DocumentStore,
    ExecutorFactory, InMemoryStore, PgDocumentStore, PollCollector, StreamCollector,
    WebhookNotifier,
};

/// CLI arguments for the application
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", env = "ALPHA_CONFIG")]
    config: String,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    if json {
        builder.json().try_init()
    } else {
        builder.with_file(true).with_line_number(true).try_init()
    }
    .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))
}

async fn build_store(config: &AppConfig) -> Result<Arc<dyn DocumentStore>> {
    match &config.database {
        Some(database) => {
            let store = PgDocumentStore::connect(database)
                .await
                .context("connecting to PostgreSQL")?;
            store.migrate().await.context("creating store tables")?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("No database configured, using the in-memory store; data will not survive a restart");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

fn build_alerts(config: &AppConfig) -> Result<AlertDispatcher> {
    match &config.alerts.webhook_url {
        Some(url) => {
            let notifier = WebhookNotifier::new(url, config.alerts.timeout())
                .context("creating alert webhook client")?;
            info!("Operator alerts go to the configured webhook");
            Ok(AlertDispatcher::new(Arc::new(notifier)))
        }
        None => Ok(AlertDispatcher::disabled()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let config = load_config(Some(&args.config)).context("loading configuration")?;

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.settings.log_level.clone());
    init_logging(&level, args.json_logs || config.settings.json_logs)?;

    info!("Starting CoinbaseAlpha");
    info!("Configuration file: {}", args.config);
    info!(
        assets = ?config.stream.assets,
        poll_pairs = config.poll.schedules.len(),
        portfolios = config.portfolios.len(),
        "Configuration loaded"
    );

    let cancel = CancellationToken::new();
    let store = build_store(&config).await?;
    let alerts = build_alerts(&config)?;
    let mut tasks: JoinSet<()> = JoinSet::new();

    // Stream collector
    let feed = CoinbaseFeedClient::new(&config.exchange.websocket_url);
    let stream =
        StreamCollector::new(feed, store.clone(), &config.stream).with_alerts(alerts.clone());
    let stream_stats = stream.stats();
    let stream_cancel = cancel.clone();
    tasks.spawn(async move {
        if let Err(e) = stream.run(stream_cancel).await {
            error!(error = %e, "Stream collector stopped");
        }
    });

    // Poll collector
    let rest = CoinbaseRestClient::with_timeout(
        &config.exchange.rest_url,
        Duration::from_secs(config.settings.request_timeout_seconds),
    )?;
    let poll =
        PollCollector::new(Arc::new(rest), store.clone(), &config.poll).with_alerts(alerts.clone());
    let poll_stats = poll.stats();
    let mut pollers = poll.spawn(cancel.clone());
    tasks.spawn(async move { while pollers.join_next().await.is_some() {} });

    // Executors and the watchers feeding them
    let factory = ExecutorFactory::from_config(&config, store.clone(), cancel.clone())?;
    let executors = factory.build_all(&config.portfolios).await?;
    let (watchers, handles) = factory.wire(executors, &config.watcher).await?;

    for handle in handles {
        let portfolio = handle.executor.portfolio_id().to_string();
        tasks.spawn(async move {
            if let Err(e) = handle.executor.run(handle.events).await {
                error!(%portfolio, error = %e, "Strategy executor stopped");
            }
        });
    }
    for watcher in watchers {
        tasks.spawn(watcher.run(cancel.clone()));
    }

    info!("Application initialized successfully");

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal, cleaning up...");
    cancel.cancel();

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "Task panicked");
        }
    }

    info!(
        stream = ?stream_stats.snapshot(),
        poll = ?poll_stats.snapshot(),
        "Collectors stopped"
    );
    Ok(())
}
