use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "metrics")]
use std::net::SocketAddr;

#[cfg(feature = "metrics")]
use metrics::describe_counter;
#[cfg(feature = "metrics")]
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::catalog::{CatalogError, TableManager};
use crate::context::ShardlineContext;
use crate::ingest::{IngestOptions, IngestionPipeline};
use crate::repository::{interface::Repository, sqlite::SqliteRepository};
use crate::store::{memory::MemoryShardStore, ShardStore};

use super::schema;

pub const HTTP_REQUESTS: &str = "shardline_http_requests";

async fn build_repository(
    config: &schema::ShardlineConfig,
) -> Result<Arc<dyn Repository>, CatalogError> {
    let repository: Arc<dyn Repository> = match &config.catalog {
        schema::Catalog::Sqlite(schema::Sqlite { dsn }) => {
            Arc::new(SqliteRepository::try_new(dsn.to_string()).await?)
        }
    };

    Ok(repository)
}

fn build_shard_store(config: &schema::ShardlineConfig) -> Arc<dyn ShardStore> {
    match &config.shard_store {
        schema::ShardStore::Memory(schema::Memory { shard_count }) => {
            Arc::new(MemoryShardStore::new(*shard_count))
        }
    }
}

#[cfg(feature = "metrics")]
pub fn setup_metrics(metrics: &schema::Metrics) -> Result<(), String> {
    let addr: SocketAddr = format!("{}:{}", metrics.host, metrics.port)
        .parse()
        .map_err(|e| format!("Error parsing the Prometheus metrics export address: {e}"))?;
    let builder = PrometheusBuilder::new().with_http_listener(addr);
    builder
        .install()
        .map_err(|e| format!("Failed to install recorder/exporter: {e}"))?;

    describe_counter!(HTTP_REQUESTS, "Counter tracking HTTP request statistics");
    Ok(())
}

pub async fn build_context(
    cfg: &schema::ShardlineConfig,
) -> Result<ShardlineContext, CatalogError> {
    let repository = build_repository(cfg).await?;
    let pipeline = IngestionPipeline::new(build_shard_store(cfg), IngestOptions::from(&cfg.ingest));

    Ok(ShardlineContext::new(
        TableManager::new(repository),
        pipeline,
        cfg.session.max_sessions,
        Duration::from_millis(cfg.session.acquire_timeout_ms),
    ))
}
