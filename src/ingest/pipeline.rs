use std::sync::Arc;
use std::time::Instant;

use futures::{stream, StreamExt};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogResult, CatalogSession, RegisteredTable};
use crate::data_types::{Batch, Row, ShardId};
use crate::ingest::metrics::IngestMetrics;
use crate::ingest::{
    validate_batch, BatchResult, CancellationToken, IngestOptions, ShardFailure,
    ShardFailureCause,
};
use crate::router::ShardRouter;
use crate::store::{ShardStore, StoreError};

/// Validates batches against the catalog, routes their rows and commits them
/// shard by shard to the store.
pub struct IngestionPipeline {
    store: Arc<dyn ShardStore>,
    router: ShardRouter,
    options: IngestOptions,
    metrics: IngestMetrics,
}

impl IngestionPipeline {
    pub fn new(store: Arc<dyn ShardStore>, options: IngestOptions) -> Self {
        let router = ShardRouter::new(store.shard_count());
        Self {
            store,
            router,
            options,
            metrics: IngestMetrics::default(),
        }
    }

    pub fn router(&self) -> &ShardRouter {
        &self.router
    }

    pub fn options(&self) -> &IngestOptions {
        &self.options
    }

    /// Insert a batch into a table of the session's open database.
    ///
    /// Fails only if the table can't be resolved; every other outcome is
    /// described by the returned [`BatchResult`].
    pub async fn insert_batch(
        &self,
        session: &CatalogSession,
        table_name: &str,
        batch: Batch,
    ) -> CatalogResult<BatchResult> {
        self.insert_batch_with_cancellation(
            session,
            table_name,
            batch,
            CancellationToken::never(),
        )
        .await
    }

    pub async fn insert_batch_with_cancellation(
        &self,
        session: &CatalogSession,
        table_name: &str,
        batch: Batch,
        cancel: CancellationToken,
    ) -> CatalogResult<BatchResult> {
        let table = session.catalog()?.registered_table(table_name)?;
        Ok(self.insert_into(table, batch, cancel).await)
    }

    /// Insert a batch into an already resolved table.
    pub async fn insert_into(
        &self,
        table: RegisteredTable,
        batch: Batch,
        cancel: CancellationToken,
    ) -> BatchResult {
        let start = Instant::now();
        let row_count = batch.len();
        self.metrics.rows_received.increment(row_count as u64);

        let validated = match validate_batch(table.schema.clone(), batch) {
            Ok(validated) => validated,
            Err(violations) => {
                info!(
                    "Rejected batch of {row_count} row(s) for table {:?}: {} violation(s)",
                    table.schema.name,
                    violations.len()
                );
                self.metrics.validation_failures.increment(1);
                return BatchResult::ValidationFailed { violations };
            }
        };

        let groups = validated.partition(&self.router);
        debug!(
            "Routed {row_count} row(s) for table {:?} to {} shard(s)",
            table.schema.name,
            groups.len()
        );

        let table = Arc::new(table);
        let mut outcomes: Vec<(ShardId, usize, Result<(), ShardFailureCause>)> =
            stream::iter(groups)
                .map(|(shard, rows)| {
                    let store = self.store.clone();
                    let table = table.clone();
                    let options = self.options.clone();
                    let metrics = self.metrics.clone();
                    let cancel = cancel.clone();

                    async move {
                        let rows_in_shard = rows.len();

                        // Checked when a slot frees up, so cancelling stops
                        // shards that haven't been started yet.
                        if cancel.is_cancelled() {
                            return (shard, rows_in_shard, Err(ShardFailureCause::NotIssued));
                        }

                        // Detached, so the append completes even if the caller
                        // stops waiting for the batch.
                        let outcome = tokio::spawn(async move {
                            append_with_retry(store.as_ref(), &table, shard, &rows, &options, &metrics)
                                .await
                        })
                        .await
                        .unwrap_or_else(|e| {
                            Err(ShardFailureCause::Aborted {
                                reason: e.to_string(),
                            })
                        });

                        (shard, rows_in_shard, outcome)
                    }
                })
                .buffer_unordered(self.options.max_in_flight.max(1))
                .collect()
                .await;

        outcomes.sort_by_key(|(shard, _, _)| *shard);

        let mut committed_shards = vec![];
        let mut committed_rows = 0;
        let mut failed_shards = vec![];
        for (shard, rows, outcome) in outcomes {
            match outcome {
                Ok(()) => {
                    committed_shards.push(shard);
                    committed_rows += rows;
                }
                Err(cause) => {
                    warn!(
                        "Giving up on {rows} row(s) for {shard} of table {:?}: {cause:?}",
                        table.schema.name
                    );
                    failed_shards.push(ShardFailure { shard, cause });
                }
            }
        }

        self.metrics.rows_committed.increment(committed_rows as u64);
        self.metrics
            .failed_shards
            .increment(failed_shards.len() as u64);
        self.metrics
            .batch_time
            .record(start.elapsed().as_secs_f64());

        if failed_shards.is_empty() {
            info!(
                "Inserted {committed_rows} row(s) into table {:?} across {} shard(s) in {:?}",
                table.schema.name,
                committed_shards.len(),
                start.elapsed()
            );
            BatchResult::Success {
                rows: committed_rows,
                committed_shards,
            }
        } else {
            warn!(
                "Partially inserted {committed_rows} of {row_count} row(s) into table {:?}: \
                {} shard(s) committed, {} failed",
                table.schema.name,
                committed_shards.len(),
                failed_shards.len()
            );
            BatchResult::PartialCommit {
                committed_shards,
                failed_shards,
            }
        }
    }
}

/// Append one shard's rows, retrying timeouts and transient failures with
/// exponential backoff until the retry budget runs out.
async fn append_with_retry(
    store: &dyn ShardStore,
    table: &RegisteredTable,
    shard: ShardId,
    rows: &[Row],
    options: &IngestOptions,
    metrics: &IngestMetrics,
) -> Result<(), ShardFailureCause> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        metrics.shard_appends.increment(1);

        let result = match timeout(options.append_timeout, store.append(table, shard, rows)).await
        {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout {
                timeout_ms: options.append_timeout.as_millis() as u64,
            }),
        };

        match result {
            Ok(()) => {
                debug!(
                    "Committed {} row(s) to {shard} after {attempts} attempt(s)",
                    rows.len()
                );
                return Ok(());
            }
            Err(error) if error.is_retryable() && attempts <= options.max_retries => {
                let delay = options.backoff(attempts);
                warn!("Append to {shard} failed ({error}), retrying in {delay:?}");
                metrics.shard_retries.increment(1);
                tokio::time::sleep(delay).await;
            }
            Err(error) => return Err(ShardFailureCause::Store { error, attempts }),
        }
    }
}
