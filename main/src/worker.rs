use std::sync::Arc;

use common::{
    storage::db::SurrealDbClient, storage::store::StorageManager, utils::config::get_config,
};
use ingestion_pipeline::{run_worker_loop, IngestionPipeline};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Standalone ingestion worker; claims and processes queued ingest tasks.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );
    db.ensure_initialized().await?;

    let storage = StorageManager::new(&config).await?;

    let ingestion_pipeline = Arc::new(IngestionPipeline::new(Arc::clone(&db), storage, &config)?);

    run_worker_loop(db, ingestion_pipeline).await
}
