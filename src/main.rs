use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use steward::api;
use steward::broker::AlpacaClient;
use steward::config::{AppConfig, LoggingConfig};
use steward::engine::HttpDecisionEngine;
use steward::execution::{CircuitBreaker, OrderExecutor};
use steward::orchestrator::{Orchestrator, OrchestratorSettings};
use steward::persistence::PostgresStore;
use steward::queue::{JobStore, MemoryJobStore, PostgresJobStore, QueueJanitor};
use steward::Result;

fn init_logging(config: &LoggingConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("steward={},sqlx=warn", config.level)));

    let registry = tracing_subscriber::registry().with(filter);

    let mut guard = None;
    if let Some(directory) = &config.directory {
        let appender = tracing_appender::rolling::daily(directory, "steward.log");
        let (writer, g) = tracing_appender::non_blocking(appender);
        guard = Some(g);
        if config.json {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
                .init();
        } else {
            registry
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
                .init();
        }
    } else if config.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    let _log_guard = init_logging(&config.logging);

    let dry_run = config.dry_run.enabled;
    info!(
        "steward starting{}",
        if dry_run { " in DRY RUN mode" } else { "" }
    );

    let broker = Arc::new(AlpacaClient::new(&config.broker, dry_run)?);
    let engine = Arc::new(HttpDecisionEngine::new(&config.engine)?);

    // Dry runs skip the database entirely; everything lives in memory.
    let (store, jobs): (Option<Arc<PostgresStore>>, Arc<dyn JobStore>) = if dry_run {
        (None, Arc::new(MemoryJobStore::new(config.queue.max_attempts)))
    } else {
        let store = Arc::new(
            PostgresStore::connect(&config.database.url, config.database.max_connections)
                .await?,
        );
        store.migrate().await?;
        let jobs = Arc::new(PostgresJobStore::new(store.pool(), config.queue.max_attempts));
        (Some(store), jobs as Arc<dyn JobStore>)
    };

    let breaker = Arc::new(CircuitBreaker::new(
        config.execution.breaker_failure_threshold,
        Duration::from_secs(config.execution.breaker_cooldown_secs),
    ));
    let executor = Arc::new(OrderExecutor::new(
        Arc::clone(&broker) as _,
        breaker,
        &config.execution,
    ));

    let settings = OrchestratorSettings::from_config(&config);
    let orchestrator = Orchestrator::new(
        broker,
        engine,
        Arc::clone(&jobs),
        executor,
        store.clone(),
        settings,
    );

    // Recover what the previous run persisted: the kill-switch latch,
    // operating mode, and protective position annotations.
    if let Some(store) = &store {
        match store.load_status().await {
            Ok(Some(status)) => orchestrator.restore_status(&status).await,
            Ok(None) => {}
            Err(e) => warn!("could not load persisted agent status: {}", e),
        }
        match store.load_positions().await {
            Ok(positions) => orchestrator.restore_positions(positions).await,
            Err(e) => warn!("could not load persisted positions: {}", e),
        }
    }

    let janitor = Arc::new(QueueJanitor::new(Arc::clone(&jobs), config.queue.clone()));
    let janitor_handle = Arc::clone(&janitor).spawn();

    if config.orchestrator.auto_start {
        orchestrator.start().await?;
    } else {
        info!("auto start disabled, waiting for operator start");
    }

    let port = config.admin_port.unwrap_or(8080);
    let app = api::router(orchestrator.clone());
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("admin API listening on port {}", port);

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("admin API server error: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received");

    orchestrator.stop().await;
    janitor.stop();
    janitor_handle.abort();
    server.abort();

    info!("steward stopped");
    Ok(())
}
