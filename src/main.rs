use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use scylla::client::session::Session;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod errors;
mod escalation;
mod http;
mod messaging;
mod metrics;
mod models;
mod notifier;
mod storage;
mod store;
mod transition;

use config::{EscalationConfig, NotifierConfig, ServerConfig, StorageConfig, StoreConfig};
use escalation::{EscalationScanner, HttpAdvanceClient};
use messaging::RedpandaChannel;
use metrics::Metrics;
use notifier::ChangeNotifier;
use storage::S3MetadataSource;
use store::ScyllaOrderStore;
use transition::TransitionProcessor;

/// Order lifecycle automation: stage transitions and customer notifications.
#[derive(Parser, Debug)]
#[command(name = "order-lifecycle", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the keyspace and the CDC-enabled orders table.
    Migrate,
    /// Serve the transition triggers, /metrics and /health.
    Serve,
    /// Run a single escalation scan and print its report.
    Scan,
    /// Run escalation scans on a fixed interval.
    Schedule,
    /// Stream the orders change feed into customer notifications.
    Watch,
    /// Serve, schedule and watch in one process.
    Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // RUST_LOG overrides the default filter, e.g. RUST_LOG=debug
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,order_lifecycle=debug")),
        )
        .init();

    let cli = Cli::parse();
    let metrics = Arc::new(Metrics::new()?);

    match cli.command {
        Command::Migrate => migrate().await,
        Command::Serve => serve(metrics).await,
        Command::Scan => scan(metrics).await,
        Command::Schedule => schedule(metrics).await,
        Command::Watch => watch(metrics).await,
        Command::Run => run(metrics).await,
    }
}

async fn open_store(cfg: &StoreConfig) -> anyhow::Result<(Arc<Session>, Arc<ScyllaOrderStore>)> {
    let session = Arc::new(store::connect(cfg).await?);
    let order_store = Arc::new(ScyllaOrderStore::new(session.clone(), cfg));
    Ok((session, order_store))
}

async fn migrate() -> anyhow::Result<()> {
    let cfg = StoreConfig::from_env()?;
    let (_, order_store) = open_store(&cfg).await?;
    order_store.ensure_schema(cfg.replication_factor).await?;
    tracing::info!(keyspace = %cfg.keyspace, table = %cfg.table, "✅ Schema is in place");
    Ok(())
}

async fn build_processor(
    order_store: Arc<ScyllaOrderStore>,
    metrics: Arc<Metrics>,
) -> anyhow::Result<Arc<TransitionProcessor>> {
    let metadata = Arc::new(S3MetadataSource::new(&StorageConfig::from_env()?).await);
    Ok(Arc::new(TransitionProcessor::new(order_store, metadata, metrics)))
}

fn build_scanner(
    order_store: Arc<ScyllaOrderStore>,
    metrics: Arc<Metrics>,
) -> anyhow::Result<(EscalationScanner, EscalationConfig)> {
    let cfg = EscalationConfig::from_env()?;
    let client = Arc::new(HttpAdvanceClient::new(&cfg).context("Failed to build advance client")?);
    Ok((EscalationScanner::new(order_store, client, metrics, &cfg), cfg))
}

fn build_notifier(metrics: Arc<Metrics>) -> anyhow::Result<Arc<ChangeNotifier>> {
    let notifier_cfg = NotifierConfig::from_env()?;
    let channel = Arc::new(RedpandaChannel::new(&notifier_cfg).context("Failed to create Kafka producer")?);
    Ok(Arc::new(ChangeNotifier::new(channel, metrics)))
}

async fn serve(metrics: Arc<Metrics>) -> anyhow::Result<()> {
    let server_cfg = ServerConfig::from_env()?;
    let (_, order_store) = open_store(&StoreConfig::from_env()?).await?;
    let processor = build_processor(order_store, metrics.clone()).await?;
    http::start_server(http::AppState { processor, metrics }, &server_cfg).await?;
    Ok(())
}

async fn scan(metrics: Arc<Metrics>) -> anyhow::Result<()> {
    let (_, order_store) = open_store(&StoreConfig::from_env()?).await?;
    let (scanner, _) = build_scanner(order_store, metrics)?;
    let report = scanner.run_once().await.context("Escalation scan failed")?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn schedule(metrics: Arc<Metrics>) -> anyhow::Result<()> {
    let (_, order_store) = open_store(&StoreConfig::from_env()?).await?;
    let (scanner, cfg) = build_scanner(order_store, metrics)?;
    tokio::select! {
        _ = scanner.run_every(cfg.interval) => {}
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down escalation schedule"),
    }
    Ok(())
}

async fn watch(metrics: Arc<Metrics>) -> anyhow::Result<()> {
    let store_cfg = StoreConfig::from_env()?;
    let (session, _) = open_store(&store_cfg).await?;
    let notifier = build_notifier(metrics)?;
    tokio::select! {
        result = notifier::watch_changes(session, &store_cfg.keyspace, &store_cfg.table, notifier) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down change feed");
            Ok(())
        }
    }
}

async fn run(metrics: Arc<Metrics>) -> anyhow::Result<()> {
    tracing::info!("🚀 Starting order lifecycle service");

    let server_cfg = ServerConfig::from_env()?;
    let store_cfg = StoreConfig::from_env()?;
    // one session serves the triggers, the scanner and the change feed
    let (session, order_store) = open_store(&store_cfg).await?;

    let processor = build_processor(order_store.clone(), metrics.clone()).await?;
    let (scanner, escalation_cfg) = build_scanner(order_store, metrics.clone())?;
    let notifier = build_notifier(metrics.clone())?;

    let server = http::start_server(http::AppState { processor, metrics }, &server_cfg);
    let feed = notifier::watch_changes(session, &store_cfg.keyspace, &store_cfg.table, notifier);

    tokio::select! {
        result = server => result.context("Trigger server stopped")?,
        result = feed => result?,
        _ = scanner.run_every(escalation_cfg.interval) => {}
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
    }
    Ok(())
}
