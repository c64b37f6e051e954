use metrics::{
    counter, describe_counter, describe_histogram, histogram, Counter, Histogram,
};

const ROWS_RECEIVED: &str = "shardline_ingest_rows_received_total";
const ROWS_COMMITTED: &str = "shardline_ingest_rows_committed_total";
const VALIDATION_FAILURES: &str = "shardline_ingest_validation_failures_total";
const SHARD_APPENDS: &str = "shardline_ingest_shard_appends_total";
const SHARD_RETRIES: &str = "shardline_ingest_shard_retries_total";
const FAILED_SHARDS: &str = "shardline_ingest_failed_shards_total";
const BATCH_TIME: &str = "shardline_ingest_batch_time_seconds";

#[derive(Clone)]
pub struct IngestMetrics {
    pub rows_received: Counter,
    pub rows_committed: Counter,
    pub validation_failures: Counter,
    pub shard_appends: Counter,
    pub shard_retries: Counter,
    pub failed_shards: Counter,
    pub batch_time: Histogram,
}

impl Default for IngestMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestMetrics {
    fn new() -> Self {
        describe_counter!(ROWS_RECEIVED, "The total row count of all submitted batches");
        describe_counter!(
            ROWS_COMMITTED,
            "The total row count durably appended to shards"
        );
        describe_counter!(
            VALIDATION_FAILURES,
            "The number of batches rejected by schema validation"
        );
        describe_counter!(SHARD_APPENDS, "The number of shard append attempts");
        describe_counter!(
            SHARD_RETRIES,
            "The number of shard appends retried after a transient failure or timeout"
        );
        describe_counter!(
            FAILED_SHARDS,
            "The number of shard appends that were given up on"
        );
        describe_histogram!(BATCH_TIME, "The time taken to ingest a single batch");

        Self {
            rows_received: counter!(ROWS_RECEIVED),
            rows_committed: counter!(ROWS_COMMITTED),
            validation_failures: counter!(VALIDATION_FAILURES),
            shard_appends: counter!(SHARD_APPENDS),
            shard_retries: counter!(SHARD_RETRIES),
            failed_shards: counter!(FAILED_SHARDS),
            batch_time: histogram!(BATCH_TIME),
        }
    }
}
