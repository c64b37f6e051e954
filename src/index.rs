//! How a registered secondary index is used to look rows up.
//!
//! A lookup supplies values for a prefix of the index's equality columns. When
//! those values cover the table's whole sharding key, the matching rows can
//! only live on one shard; otherwise every shard has to be consulted. Within
//! the consulted rows, matches are ordered by the sort columns and projected
//! onto the covered columns (equality, then sort, then include).

use std::cmp::Ordering;

use crate::data_types::{Row, ShardId, Value};
use crate::router::ShardRouter;
use crate::schema::{IndexError, IndexSpecification, NullsOrder, SortDirection, TableSchema};

/// Where an index lookup has to go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupTarget {
    Single(ShardId),
    AllShards,
}

/// An index specification resolved against its table's column positions.
#[derive(Debug, Clone)]
pub struct IndexContract<'a> {
    schema: &'a TableSchema,
    index: &'a IndexSpecification,
    equality: Vec<usize>,
    sort: Vec<(usize, SortDirection, NullsOrder)>,
    covered: Vec<usize>,
}

impl<'a> IndexContract<'a> {
    pub fn new(
        schema: &'a TableSchema,
        index: &'a IndexSpecification,
    ) -> Result<Self, IndexError> {
        index.validate(schema)?;

        Ok(Self {
            schema,
            index,
            equality: schema.positions(&index.equality_columns),
            sort: index
                .sort_columns
                .iter()
                .filter_map(|sort| {
                    schema
                        .column_position(&sort.column)
                        .map(|position| (position, sort.direction, sort.nulls))
                })
                .collect(),
            covered: index
                .covered_columns()
                .filter_map(|column| schema.column_position(column))
                .collect(),
        })
    }

    pub fn index(&self) -> &IndexSpecification {
        self.index
    }

    /// Shard(s) holding the rows that match `equality_values`, a prefix of the
    /// index's equality columns. Values past the last equality column are
    /// ignored, as in [`IndexContract::scan`].
    pub fn lookup_target(&self, router: &ShardRouter, equality_values: &[Value]) -> LookupTarget {
        let key: Option<Vec<&Value>> = self
            .schema
            .sharding_key
            .iter()
            .map(|column| {
                self.index
                    .equality_columns
                    .iter()
                    .position(|c| c == column)
                    .and_then(|position| equality_values.get(position))
            })
            .collect();

        match key {
            Some(key) => LookupTarget::Single(router.route_key(key)),
            None => LookupTarget::AllShards,
        }
    }

    /// Index entries of the rows matching `equality_values`, in index order.
    ///
    /// `equality_values` binds a prefix of the equality columns. Values beyond
    /// the index's equality columns don't take part in the match and are
    /// ignored, so they can't narrow the result.
    pub fn scan<'r>(
        &self,
        rows: impl IntoIterator<Item = &'r Row>,
        equality_values: &[Value],
    ) -> Vec<Row> {
        let prefix = &self.equality[..equality_values.len().min(self.equality.len())];
        let mut wanted = vec![];
        for value in equality_values.iter().take(prefix.len()) {
            value.encode_key(&mut wanted);
        }

        let mut matches: Vec<&Row> = rows
            .into_iter()
            .filter(|row| row.encode_key(prefix) == wanted)
            .collect();
        matches.sort_by(|a, b| self.compare(a, b));

        matches
            .into_iter()
            .map(|row| {
                Row::new(
                    self.covered
                        .iter()
                        .map(|position| row.get(*position).cloned().unwrap_or(Value::Null))
                        .collect(),
                )
            })
            .collect()
    }

    fn compare(&self, a: &Row, b: &Row) -> Ordering {
        for (position, direction, nulls) in &self.sort {
            let left = a.get(*position).unwrap_or(&Value::Null);
            let right = b.get(*position).unwrap_or(&Value::Null);

            // Null placement doesn't flip with the direction
            let ordering = match (left.is_null(), right.is_null(), nulls) {
                (true, true, _) => Ordering::Equal,
                (true, false, NullsOrder::First) | (false, true, NullsOrder::Last) => {
                    Ordering::Less
                }
                (true, false, NullsOrder::Last) | (false, true, NullsOrder::First) => {
                    Ordering::Greater
                }
                (false, false, _) => match direction {
                    SortDirection::Asc => left.compare(right),
                    SortDirection::Desc => left.compare(right).reverse(),
                },
            };

            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_types::{Column, ColumnType};
    use crate::schema::tests::{iot_temperature_index, iot_temperature_schema};

    fn iot_row(device: i32, sensor: i32, ts: i64, temperature: Option<f64>) -> Row {
        Row::new(vec![
            Value::Int32(device),
            Value::Int32(sensor),
            Value::Int64(ts),
            Value::Float64(16.0),
            Value::Float64(50.0),
            temperature.map(Value::Float64).unwrap_or(Value::Null),
        ])
    }

    #[test]
    fn test_lookup_target() {
        let schema = iot_temperature_schema();
        let index = iot_temperature_index();
        let contract = IndexContract::new(&schema, &index).unwrap();
        let router = ShardRouter::new(16);

        let values = [Value::Int32(1), Value::Int32(12)];
        assert_eq!(
            contract.lookup_target(&router, &values),
            LookupTarget::Single(router.route(&schema, &iot_row(1, 12, 0, None)))
        );

        // Only part of the sharding key is known
        assert_eq!(
            contract.lookup_target(&router, &[Value::Int32(1)]),
            LookupTarget::AllShards
        );

        // The sharding key isn't an equality column at all
        let by_ts = IndexSpecification::new("by_ts", "IOT_TEMPERATURE").with_sort(
            "ts",
            SortDirection::Asc,
            NullsOrder::Last,
        );
        let contract = IndexContract::new(&schema, &by_ts).unwrap();
        assert_eq!(contract.lookup_target(&router, &[]), LookupTarget::AllShards);
    }

    #[test]
    fn test_lookup_target_with_reordered_equality_columns() {
        let schema = iot_temperature_schema();
        let index = IndexSpecification::new("by_sensor", "IOT_TEMPERATURE")
            .with_equality(&["sensorID", "deviceID"]);
        let contract = IndexContract::new(&schema, &index).unwrap();
        let router = ShardRouter::new(16);

        assert_eq!(
            contract.lookup_target(&router, &[Value::Int32(12), Value::Int32(1)]),
            LookupTarget::Single(router.route(&schema, &iot_row(1, 12, 0, None)))
        );
    }

    #[test]
    fn test_scan_filters_sorts_and_projects() {
        let schema = iot_temperature_schema();
        let index = iot_temperature_index();
        let contract = IndexContract::new(&schema, &index).unwrap();

        let rows = vec![
            iot_row(1, 12, 1000, Some(22.3)),
            iot_row(2, 12, 1005, Some(30.0)),
            iot_row(1, 12, 1001, Some(22.4)),
            iot_row(1, 13, 1002, Some(25.0)),
        ];

        assert_eq!(
            contract.scan(&rows, &[Value::Int32(1), Value::Int32(12)]),
            vec![
                Row::new(vec![
                    Value::Int32(1),
                    Value::Int32(12),
                    Value::Int64(1001),
                    Value::Float64(22.4)
                ]),
                Row::new(vec![
                    Value::Int32(1),
                    Value::Int32(12),
                    Value::Int64(1000),
                    Value::Float64(22.3)
                ]),
            ]
        );

        // Prefix of the equality columns
        let ts: Vec<_> = contract
            .scan(&rows, &[Value::Int32(1)])
            .into_iter()
            .map(|entry| entry.0[2].clone())
            .collect();
        assert_eq!(
            ts,
            vec![Value::Int64(1002), Value::Int64(1001), Value::Int64(1000)]
        );
    }

    #[test]
    fn test_values_past_equality_columns_are_ignored() {
        let schema = iot_temperature_schema();
        let index = iot_temperature_index();
        let contract = IndexContract::new(&schema, &index).unwrap();
        let router = ShardRouter::new(16);

        let rows = vec![
            iot_row(1, 12, 1000, Some(22.3)),
            iot_row(1, 12, 1001, Some(22.4)),
        ];
        let key = [Value::Int32(1), Value::Int32(12)];
        // Would match neither row if it took part
        let extended = [Value::Int32(1), Value::Int32(12), Value::Int64(5)];

        assert_eq!(contract.scan(&rows, &extended), contract.scan(&rows, &key));
        assert_eq!(contract.scan(&rows, &extended).len(), 2);
        assert_eq!(
            contract.lookup_target(&router, &extended),
            contract.lookup_target(&router, &key)
        );
    }

    #[test]
    fn test_scan_null_placement() {
        let schema = TableSchema::new(
            "readings",
            vec![
                Column::new("id", ColumnType::Int64, false),
                Column::new("value", ColumnType::Float64, true),
            ],
            &["id"],
            &["id"],
        );
        let rows: Vec<_> = [Some(2.0), None, Some(1.0), Some(3.0)]
            .into_iter()
            .enumerate()
            .map(|(id, value)| {
                Row::new(vec![
                    Value::Int64(id as i64),
                    value.map(Value::Float64).unwrap_or(Value::Null),
                ])
            })
            .collect();

        let order = |direction, nulls| {
            let index =
                IndexSpecification::new("by_value", "readings").with_sort("value", direction, nulls);
            IndexContract::new(&schema, &index)
                .unwrap()
                .scan(&rows, &[])
                .into_iter()
                .map(|entry| entry.0[0].clone())
                .collect::<Vec<_>>()
        };

        let nulls = Value::Null;
        let f = Value::Float64;
        assert_eq!(
            order(SortDirection::Asc, NullsOrder::Last),
            vec![f(1.0), f(2.0), f(3.0), nulls.clone()]
        );
        assert_eq!(
            order(SortDirection::Asc, NullsOrder::First),
            vec![nulls.clone(), f(1.0), f(2.0), f(3.0)]
        );
        assert_eq!(
            order(SortDirection::Desc, NullsOrder::Last),
            vec![f(3.0), f(2.0), f(1.0), nulls.clone()]
        );
        assert_eq!(
            order(SortDirection::Desc, NullsOrder::First),
            vec![nulls, f(3.0), f(2.0), f(1.0)]
        );
    }

    #[test]
    fn test_invalid_index_has_no_contract() {
        let schema = iot_temperature_schema();
        let index = IndexSpecification::new("idx", "IOT_TEMPERATURE").with_include(&["power"]);
        assert_eq!(
            IndexContract::new(&schema, &index).unwrap_err(),
            IndexError::NoKeyColumns
        );
    }
}
