use async_trait::async_trait;
use serde::Serialize;

use crate::catalog::RegisteredTable;
use crate::data_types::{Row, ShardId};

pub mod memory;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreError {
    #[error("Transient I/O failure: {reason}")]
    Transient { reason: String },

    #[error("Append timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("Append rejected: {reason}")]
    Rejected { reason: String },
}

impl StoreError {
    /// Timeouts and transient I/O failures may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transient { .. } | StoreError::Timeout { .. })
    }
}

pub type StoreResult<T, E = StoreError> = Result<T, E>;

/// The storage collaborator that durably holds committed rows.
#[async_trait]
pub trait ShardStore: Send + Sync {
    /// Atomically append `rows` (in order) to one shard of `table`.
    ///
    /// Implementations upsert by primary key: resubmitting the same rows after a
    /// failure or timeout leaves the shard as if they were appended once.
    async fn append(
        &self,
        table: &RegisteredTable,
        shard: ShardId,
        rows: &[Row],
    ) -> StoreResult<()>;

    /// Number of shards; stable for the lifetime of a table.
    fn shard_count(&self) -> u32;
}
