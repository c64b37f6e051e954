use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::warn;

use crate::catalog::{CatalogError, CatalogResult, CatalogSession, TableManager};
use crate::ingest::IngestionPipeline;

/// Everything a frontend needs to serve requests: the table manager, the
/// ingestion pipeline and a bounded pool of catalog sessions.
pub struct ShardlineContext {
    table_manager: TableManager,
    pipeline: IngestionPipeline,
    sessions: Arc<Semaphore>,
    max_sessions: usize,
    acquire_timeout: Duration,
}

impl ShardlineContext {
    pub fn new(
        table_manager: TableManager,
        pipeline: IngestionPipeline,
        max_sessions: usize,
        acquire_timeout: Duration,
    ) -> Self {
        let max_sessions = max_sessions.max(1);
        Self {
            table_manager,
            pipeline,
            sessions: Arc::new(Semaphore::new(max_sessions)),
            max_sessions,
            acquire_timeout,
        }
    }

    pub fn table_manager(&self) -> &TableManager {
        &self.table_manager
    }

    pub fn pipeline(&self) -> &IngestionPipeline {
        &self.pipeline
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    pub fn active_sessions(&self) -> usize {
        self.max_sessions - self.sessions.available_permits()
    }

    /// Check out a session from the pool, waiting up to the configured
    /// acquire timeout for one to be returned.
    pub async fn session(&self) -> CatalogResult<CatalogSession> {
        match timeout(self.acquire_timeout, self.sessions.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(CatalogSession::new(permit)),
            // The semaphore is never closed
            Ok(Err(_)) | Err(_) => {
                warn!(
                    "No session available after {:?} ({} in use)",
                    self.acquire_timeout, self.max_sessions
                );
                Err(CatalogError::NoSessionAvailable {
                    timeout_ms: self.acquire_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Check out a session and open `database` in it.
    pub async fn session_for(&self, database: &str) -> CatalogResult<CatalogSession> {
        let mut session = self.session().await?;
        self.table_manager.open_database(&mut session, database).await?;
        Ok(session)
    }
}
