//! Bulk row ingestion: validation, shard partitioning and per-shard commits.

use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::sync::watch;

use crate::data_types::{ColumnType, ShardId};
use crate::store::StoreError;

mod metrics;
pub mod pipeline;
pub mod validate;

pub use pipeline::IngestionPipeline;
pub use validate::{validate_batch, ValidatedBatch};

/// A row that doesn't conform to the table's schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("Row {row_index} has {actual} value(s), expected {expected}")]
    RowShape {
        row_index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Row {row_index}: column {column:?} expects {expected}, got {actual}")]
    Type {
        row_index: usize,
        column: String,
        expected: ColumnType,
        actual: String,
    },

    #[error("Row {row_index}: column {column:?} is not nullable")]
    NullConstraint { row_index: usize, column: String },
}

impl ValidationError {
    pub fn row_index(&self) -> usize {
        match self {
            ValidationError::RowShape { row_index, .. }
            | ValidationError::Type { row_index, .. }
            | ValidationError::NullConstraint { row_index, .. } => *row_index,
        }
    }
}

/// Why a shard's rows were not committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShardFailureCause {
    /// The store kept failing, or failed permanently.
    Store { error: StoreError, attempts: u32 },
    /// The batch was cancelled before the shard's append was issued.
    NotIssued,
    /// The append task died before reporting back.
    Aborted { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardFailure {
    pub shard: ShardId,
    pub cause: ShardFailureCause,
}

/// Outcome of a batch insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchResult {
    /// Every row was committed.
    Success {
        rows: usize,
        committed_shards: Vec<ShardId>,
    },
    /// Some shards failed. Rows on the committed shards stay committed.
    PartialCommit {
        committed_shards: Vec<ShardId>,
        failed_shards: Vec<ShardFailure>,
    },
    /// At least one row is invalid; nothing was committed.
    ValidationFailed { violations: Vec<ValidationError> },
}

impl BatchResult {
    pub fn is_success(&self) -> bool {
        matches!(self, BatchResult::Success { .. })
    }
}

/// Tuning of the shard fan-out and the retry policy of each append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOptions {
    /// Maximum number of concurrent shard appends per batch
    pub max_in_flight: usize,
    /// Timeout of a single append attempt
    pub append_timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            append_timeout: Duration::from_millis(5000),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(50),
            retry_max_delay: Duration::from_millis(2000),
        }
    }
}

impl IngestOptions {
    /// Delay before retry number `retry` (1-based): exponential in the retry
    /// number, capped at the max delay, with up to 25% of random jitter added.
    pub(crate) fn backoff(&self, retry: u32) -> Duration {
        let base_ms = self.retry_base_delay.as_millis() as u64;
        let max_ms = self.retry_max_delay.as_millis() as u64;
        let exp = 1u64 << retry.saturating_sub(1).min(16);
        let delay_ms = base_ms.saturating_mul(exp).min(max_ms);

        let jitter_ms = rand::thread_rng().gen_range(0..=delay_ms / 4);
        Duration::from_millis(delay_ms + jitter_ms)
    }
}

/// Caller side of a batch cancellation.
#[derive(Debug)]
pub struct CancellationHandle {
    tx: watch::Sender<bool>,
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            rx: self.tx.subscribe(),
        }
    }

    /// Stop issuing new shard appends. Appends already in flight complete.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Debug, Clone)]
pub struct CancellationToken {
    rx: watch::Receiver<bool>,
}

impl CancellationToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        CancellationHandle::new().token()
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(1, 50)]
    #[case(2, 100)]
    #[case(3, 200)]
    #[case(6, 1600)]
    #[case(7, 2000)]
    #[case(40, 2000)]
    fn test_backoff_is_exponential_and_capped(#[case] retry: u32, #[case] expected_ms: u64) {
        let options = IngestOptions::default();
        for _ in 0..20 {
            let delay = options.backoff(retry);
            assert!(delay >= Duration::from_millis(expected_ms));
            assert!(delay <= Duration::from_millis(expected_ms + expected_ms / 4));
        }
    }

    #[test]
    fn test_cancellation() {
        let handle = CancellationHandle::new();
        let token = handle.token();
        let other = token.clone();
        assert!(!token.is_cancelled());

        handle.cancel();
        assert!(token.is_cancelled());
        assert!(other.is_cancelled());

        assert!(!CancellationToken::never().is_cancelled());
    }

    #[test]
    fn test_batch_result_serialization() {
        let result = BatchResult::PartialCommit {
            committed_shards: vec![ShardId(0)],
            failed_shards: vec![ShardFailure {
                shard: ShardId(3),
                cause: ShardFailureCause::Store {
                    error: StoreError::Timeout { timeout_ms: 100 },
                    attempts: 4,
                },
            }],
        };

        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            serde_json::json!({
                "status": "partial_commit",
                "committed_shards": [0],
                "failed_shards": [{
                    "shard": 3,
                    "cause": {
                        "kind": "store",
                        "error": {"kind": "timeout", "timeout_ms": 100},
                        "attempts": 4
                    }
                }]
            })
        );
    }
}
