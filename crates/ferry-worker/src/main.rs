//! ferry-worker binary - copies one table into another in parallel key ranges.

mod config;
mod coordinator;
mod metrics;
mod partition_worker;
mod pool;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use config::WorkerConfig;
use coordinator::JobCoordinator;
use ferry_connectors::{PostgresDestination, PostgresSource};
use metrics::WorkerMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = WorkerConfig::from_env()?;
    let job = &config.job;
    info!(
        "Starting ferry-worker: {} -> {} (grid={}, core={}, max={})",
        job.source_table, job.destination_table, job.grid_size, job.core_pool_size, job.max_pool_size
    );

    let source_pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.source_database_url)
        .await
        .context("Failed to connect to source database")?;
    let destination_pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.destination_database_url)
        .await
        .context("Failed to connect to destination database")?;
    info!("Connected to source and destination databases");

    let source = PostgresSource::connect(
        source_pool,
        &job.source_table,
        &job.source_key_column,
        &job.column_mapping,
    )
    .await?;
    let destination = PostgresDestination::connect(
        destination_pool,
        &job.destination_table,
        &job.column_mapping,
        job.chunk_size,
    )
    .await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Shutdown requested; finishing partitions already running");
            let _ = shutdown_tx.send(true);
        }
    });

    let worker_metrics = WorkerMetrics::new();
    let coordinator = JobCoordinator::new(
        Arc::new(source),
        Arc::new(destination),
        worker_metrics.clone(),
    );
    let outcome = coordinator.run(job, shutdown_rx).await?;
    debug!("Final metrics:\n{}", worker_metrics.encode());

    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if !outcome.is_success() {
        anyhow::bail!(
            "job {} failed: {} of {} partitions failed",
            outcome.job_id,
            outcome.failures().len(),
            outcome.partition_count
        );
    }
    Ok(())
}
