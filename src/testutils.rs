use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::catalog::RegisteredTable;
use crate::data_types::{Row, ShardId};
use crate::store::memory::MemoryShardStore;
use crate::store::{ShardStore, StoreError, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Transient,
    Reject,
    /// Never completes
    Hang,
}

/// A [`MemoryShardStore`] with scripted per-shard failures, latency and
/// bookkeeping of attempts and concurrency.
#[derive(Debug)]
pub struct FaultyShardStore {
    inner: MemoryShardStore,
    latency: Option<Duration>,
    next_faults: Mutex<HashMap<ShardId, VecDeque<Fault>>>,
    permanent_faults: Mutex<HashMap<ShardId, Fault>>,
    attempts: Mutex<HashMap<ShardId, u32>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FaultyShardStore {
    pub fn new(shard_count: u32) -> Self {
        Self {
            inner: MemoryShardStore::new(shard_count),
            latency: None,
            next_faults: Mutex::new(HashMap::new()),
            permanent_faults: Mutex::new(HashMap::new()),
            attempts: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn inner(&self) -> &MemoryShardStore {
        &self.inner
    }

    /// Fail the next `times` appends to `shard`.
    pub fn fail_next(&self, shard: ShardId, fault: Fault, times: usize) {
        self.next_faults
            .lock()
            .entry(shard)
            .or_default()
            .extend(std::iter::repeat(fault).take(times));
    }

    /// Fail every append to `shard`.
    pub fn fail_always(&self, shard: ShardId, fault: Fault) {
        self.permanent_faults.lock().insert(shard, fault);
    }

    pub fn attempts(&self, shard: ShardId) -> u32 {
        self.attempts.lock().get(&shard).copied().unwrap_or(0)
    }

    pub fn total_attempts(&self) -> u32 {
        self.attempts.lock().values().sum()
    }

    /// Highest number of appends observed running at the same time.
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_fault(&self, shard: ShardId) -> Option<Fault> {
        self.next_faults
            .lock()
            .get_mut(&shard)
            .and_then(VecDeque::pop_front)
            .or_else(|| self.permanent_faults.lock().get(&shard).copied())
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ShardStore for FaultyShardStore {
    async fn append(
        &self,
        table: &RegisteredTable,
        shard: ShardId,
        rows: &[Row],
    ) -> StoreResult<()> {
        *self.attempts.lock().entry(shard).or_default() += 1;

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        match self.next_fault(shard) {
            Some(Fault::Transient) => Err(StoreError::Transient {
                reason: "injected fault".to_string(),
            }),
            Some(Fault::Reject) => Err(StoreError::Rejected {
                reason: "injected fault".to_string(),
            }),
            Some(Fault::Hang) => std::future::pending().await,
            None => self.inner.append(table, shard, rows).await,
        }
    }

    fn shard_count(&self) -> u32 {
        self.inner.shard_count()
    }
}
