//! Row-to-shard routing.
//!
//! A row's shard is derived from its sharding key only: the canonical byte
//! encoding of the sharding-key values (see [`Value::encode_key`]) is hashed
//! with SHA-256, the first eight bytes of the digest are read as a big-endian
//! `u64` and reduced modulo the shard count. The scheme doesn't depend on the
//! process, platform or Rust version, so a key always lands on the same shard
//! for a given shard count.

use sha2::{Digest, Sha256};

use crate::data_types::{Row, ShardId, Value};
use crate::schema::TableSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardRouter {
    shard_count: u32,
}

impl ShardRouter {
    /// Build a router over `shard_count` shards (at least one).
    pub fn new(shard_count: u32) -> Self {
        Self {
            shard_count: shard_count.max(1),
        }
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    /// Shard of a row that has already been validated against `schema`.
    pub fn route(&self, schema: &TableSchema, row: &Row) -> ShardId {
        self.route_encoded(&row.encode_key(&schema.sharding_key_positions()))
    }

    /// Shard of a row given the precomputed positions of its sharding key.
    pub(crate) fn route_positions(&self, row: &Row, positions: &[usize]) -> ShardId {
        self.route_encoded(&row.encode_key(positions))
    }

    /// Shard owning the given sharding-key values, in sharding-key order.
    pub fn route_key<'a>(&self, values: impl IntoIterator<Item = &'a Value>) -> ShardId {
        let mut buf = vec![];
        for value in values {
            value.encode_key(&mut buf);
        }
        self.route_encoded(&buf)
    }

    fn route_encoded(&self, key: &[u8]) -> ShardId {
        let digest = Sha256::digest(key);
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        ShardId((u64::from_be_bytes(prefix) % u64::from(self.shard_count)) as u32)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::schema::tests::iot_temperature_schema;

    fn iot_row(device: i32, sensor: i32, ts: i64, temperature: f64) -> Row {
        Row::new(vec![
            Value::Int32(device),
            Value::Int32(sensor),
            Value::Int64(ts),
            Value::Float64(16.0),
            Value::Float64(50.0),
            Value::Float64(temperature),
        ])
    }

    #[rstest]
    fn test_equal_sharding_keys_share_a_shard(
        #[values(1, 2, 3, 7, 16, 64, 1000)] shard_count: u32,
    ) {
        let schema = iot_temperature_schema();
        let router = ShardRouter::new(shard_count);

        for device in 0..50 {
            let first = router.route(&schema, &iot_row(device, 12, 1000, 22.3));
            let second = router.route(&schema, &iot_row(device, 12, 1001, 22.4));
            assert_eq!(first, second);
            assert!(first.0 < shard_count);
        }
    }

    #[test]
    fn test_route_key_matches_route() {
        let schema = iot_temperature_schema();
        let router = ShardRouter::new(16);
        let row = iot_row(1, 12, 1000, 22.3);

        assert_eq!(
            router.route(&schema, &row),
            router.route_key(&[Value::Int32(1), Value::Int32(12)])
        );
    }

    #[test]
    fn test_single_shard() {
        let schema = iot_temperature_schema();
        let router = ShardRouter::new(1);
        assert_eq!(router.route(&schema, &iot_row(9, 9, 9, 9.0)), ShardId(0));

        // A zero shard count is clamped
        assert_eq!(ShardRouter::new(0).shard_count(), 1);
    }

    #[test]
    fn test_stable_assignment() {
        // Routing must never change between releases for the same key.
        let router = ShardRouter::new(1024);
        let first = router.route_key(&[Value::Int32(1), Value::Int32(12)]);
        for _ in 0..10 {
            assert_eq!(router.route_key(&[Value::Int32(1), Value::Int32(12)]), first);
        }
    }

    #[test]
    fn test_distribution_is_roughly_uniform() {
        let router = ShardRouter::new(8);
        let mut counts = [0usize; 8];
        for key in 0..16_000i64 {
            counts[router.route_key(&[Value::Int64(key)]).0 as usize] += 1;
        }

        // 2000 expected per shard
        for count in counts {
            assert!((1500..2500).contains(&count), "skewed shard counts {counts:?}");
        }
    }
}
