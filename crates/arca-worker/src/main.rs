use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use arca_core::ArcaConfig;
use arca_db::{setup_database, PgTaskStore, TaskStore};
use arca_storage::ConnectionRegistry;
use arca_worker::telemetry::init_tracing;
use arca_worker::{
    ArchiveConfiguration, StaticArchiveCatalog, SweepConfig, SweepService, TaskEngine,
};
use tokio::sync::mpsc;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = ArcaConfig::from_env()?;
    init_tracing(&config.log_format);
    config.validate()?;

    tracing::info!(
        environment = %config.environment,
        pool_size = config.transfer.pool_size,
        "Starting arca worker"
    );

    let pool = setup_database(&config).await?;
    let store: Arc<dyn TaskStore> = Arc::new(PgTaskStore::new(pool));

    let registry = Arc::new(
        ConnectionRegistry::with_s3(config.transfer.clone())
            .context("Failed to initialize provider connections")?,
    );

    let catalog = StaticArchiveCatalog::new(config.archive.iter().map(ArchiveConfiguration::from));
    if catalog.is_empty() {
        tracing::warn!("No archive configured, set ARCHIVE_BUCKET to accept transfers");
    }

    let engine = Arc::new(TaskEngine::new(
        registry.clone(),
        store,
        Arc::new(catalog),
    ));
    engine
        .recover_on_startup()
        .await
        .context("Failed to recover interrupted tasks")?;

    let sweep = Arc::new(SweepService::new(
        engine.clone(),
        SweepConfig {
            interval: Duration::from_secs(config.sweep_interval_secs),
            retention: chrono::Duration::seconds(config.task_retention_secs),
        },
    ));
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    let sweep_handle = sweep.start(shutdown_rx);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    let _ = shutdown_tx.send(()).await;
    if let Err(e) = sweep_handle.await {
        tracing::error!(error = %e, "Cleanup sweep ended abnormally");
    }

    if !registry.shutdown(SHUTDOWN_GRACE).await {
        tracing::warn!("Transfers still running at shutdown were abandoned");
    }
    tracing::info!("Arca worker stopped");
    Ok(())
}
