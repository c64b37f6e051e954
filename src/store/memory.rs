use std::collections::HashMap;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::catalog::RegisteredTable;
use crate::data_types::{Row, ShardId, TableId};
use crate::store::{ShardStore, StoreError, StoreResult};

type ShardRows = IndexMap<Vec<u8>, Row>;

/// In-process shard store: every shard keeps, per table, its rows keyed by the
/// encoded primary key in first-insertion order.
#[derive(Debug)]
pub struct MemoryShardStore {
    shards: Vec<Mutex<HashMap<TableId, ShardRows>>>,
}

impl MemoryShardStore {
    pub fn new(shard_count: u32) -> Self {
        Self {
            shards: (0..shard_count.max(1))
                .map(|_| Mutex::new(HashMap::new()))
                .collect(),
        }
    }

    /// All rows of `table` held by `shard`.
    pub fn scan(&self, table: TableId, shard: ShardId) -> Vec<Row> {
        self.shards
            .get(shard.0 as usize)
            .and_then(|shard| shard.lock().get(&table).map(|rows| rows.values().cloned().collect()))
            .unwrap_or_default()
    }

    /// Total number of rows of `table` across all shards.
    pub fn row_count(&self, table: TableId) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().get(&table).map(IndexMap::len).unwrap_or(0))
            .sum()
    }

    /// Shards that currently hold at least one row of `table`.
    pub fn populated_shards(&self, table: TableId) -> Vec<ShardId> {
        self.shards
            .iter()
            .enumerate()
            .filter(|(_, shard)| {
                shard
                    .lock()
                    .get(&table)
                    .map(|rows| !rows.is_empty())
                    .unwrap_or(false)
            })
            .map(|(id, _)| ShardId(id as u32))
            .collect()
    }
}

#[async_trait]
impl ShardStore for MemoryShardStore {
    async fn append(
        &self,
        table: &RegisteredTable,
        shard: ShardId,
        rows: &[Row],
    ) -> StoreResult<()> {
        let target = self
            .shards
            .get(shard.0 as usize)
            .ok_or_else(|| StoreError::Rejected {
                reason: format!("{shard} is out of range ({} shards)", self.shards.len()),
            })?;

        let pk_positions = table.schema.primary_key_positions();

        // Holding the shard lock for the whole batch makes the append atomic.
        let mut tables = target.lock();
        let entries = tables.entry(table.id).or_default();
        for row in rows {
            entries.insert(row.encode_key(&pk_positions), row.clone());
        }

        debug!(
            "Appended {} row(s) to {shard} of table {:?}",
            rows.len(),
            table.schema.name
        );
        Ok(())
    }

    fn shard_count(&self) -> u32 {
        self.shards.len() as u32
    }
}
