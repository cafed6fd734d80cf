//! Replication job runner
//!
//! Thin binary around the sync engine: reads environment configuration,
//! wires the components, processes every object type sequentially, and
//! exits non-zero on any unhandled error — including a count mismatch
//! surviving a full reconciliation.

use anyhow::Context;
use bridge_native::ReqwestHttpClient;
use bridge_traits::origin::{ObjectSpec, RecordSource};
use bridge_traits::time::SystemClock;
use core_sync::{SyncConfig, SyncCoordinator};
use core_warehouse::schema::ensure_schema;
use provider_hubspot::HubSpotConnector;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    init_tracing();
    let _ = dotenvy::dotenv();

    tracing::info!(service = "sync-runner", "starting");

    if let Err(e) = run().await {
        tracing::error!(error = %e, "replication run failed");
        std::process::exit(1);
    }

    tracing::info!("replication run completed");
}

async fn run() -> anyhow::Result<()> {
    let api_token =
        std::env::var("HUBSPOT_API_TOKEN").context("HUBSPOT_API_TOKEN must be set")?;
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite:warehouse.db?mode=rwc".to_string());

    let config = SyncConfig::from_env();
    let specs = vec![ObjectSpec::contacts(), ObjectSpec::companies()];

    tracing::info!(
        database = %database_url,
        objects = specs.len(),
        reconciliation_frequency = config.reconciliation_frequency,
        "configuration loaded"
    );

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await
        .context("failed to connect to warehouse database")?;
    ensure_schema(&pool, &specs).await?;

    let http = Arc::new(ReqwestHttpClient::new());
    let source: Arc<dyn RecordSource> = Arc::new(HubSpotConnector::new(http, api_token));

    let coordinator = SyncCoordinator::new(config, pool, source, specs, Arc::new(SystemClock));
    let reports = coordinator.sync_all().await?;

    for report in &reports {
        tracing::info!(
            object_type = %report.object_type,
            full_load = report.full_load,
            records_synced = report.records_synced,
            recovered = report.recovered,
            soft_deleted = report.soft_deleted,
            duplicates_removed = report.duplicates_removed,
            reconciled = report.reconciled,
            "object type replicated"
        );
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}
