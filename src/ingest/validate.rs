use std::collections::BTreeMap;
use std::sync::Arc;

use crate::data_types::{Batch, Row, ShardId};
use crate::ingest::ValidationError;
use crate::router::ShardRouter;
use crate::schema::TableSchema;

/// A batch whose every row conforms to its table's schema.
///
/// Can only be obtained through [`validate_batch`].
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedBatch {
    schema: Arc<TableSchema>,
    rows: Batch,
}

impl ValidatedBatch {
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Group the rows by shard. Rows keep their relative batch order within
    /// each shard; shards are returned in ascending order.
    pub fn partition(self, router: &ShardRouter) -> BTreeMap<ShardId, Vec<Row>> {
        let positions = self.schema.sharding_key_positions();

        let mut groups: BTreeMap<ShardId, Vec<Row>> = BTreeMap::new();
        for row in self.rows {
            groups
                .entry(router.route_positions(&row, &positions))
                .or_default()
                .push(row);
        }
        groups
    }
}

/// Check every row of `batch` against `schema`, collecting all violations.
pub fn validate_batch(
    schema: Arc<TableSchema>,
    batch: Batch,
) -> Result<ValidatedBatch, Vec<ValidationError>> {
    let violations: Vec<_> = batch
        .iter()
        .enumerate()
        .flat_map(|(row_index, row)| validate_row(&schema, row_index, row))
        .collect();

    if violations.is_empty() {
        Ok(ValidatedBatch {
            schema,
            rows: batch,
        })
    } else {
        Err(violations)
    }
}

fn validate_row(schema: &TableSchema, row_index: usize, row: &Row) -> Vec<ValidationError> {
    if row.len() != schema.columns.len() {
        return vec![ValidationError::RowShape {
            row_index,
            expected: schema.columns.len(),
            actual: row.len(),
        }];
    }

    schema
        .columns
        .iter()
        .zip(row.values())
        .filter_map(|(column, value)| {
            if value.is_null() {
                (!column.nullable).then(|| ValidationError::NullConstraint {
                    row_index,
                    column: column.name.clone(),
                })
            } else if value.column_type() != Some(column.r#type) {
                Some(ValidationError::Type {
                    row_index,
                    column: column.name.clone(),
                    expected: column.r#type,
                    actual: value.type_name().to_string(),
                })
            } else {
                None
            }
        })
        .collect()
}
