//! Table and index definitions, and the invariants they must satisfy before
//! they can be registered in a catalog.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::data_types::Column;

/// The role a column name plays in a table or index definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ColumnRole {
    PrimaryKey,
    ShardingKey,
    Equality,
    Sort,
    Include,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("Table name must not be empty")]
    EmptyName,

    #[error("Table must have at least one column")]
    NoColumns,

    #[error("Column at position {position} has an empty name")]
    EmptyColumnName { position: usize },

    #[error("Column {name:?} is defined more than once")]
    DuplicateColumn { name: String },

    #[error("The {role} must reference at least one column")]
    EmptyKey { role: ColumnRole },

    #[error("The {role} references unknown column {column:?}")]
    UnknownColumn { role: ColumnRole, column: String },

    #[error("The {role} references column {column:?} more than once")]
    DuplicateKeyColumn { role: ColumnRole, column: String },

    #[error("Primary key column {column:?} must not be nullable")]
    NullablePrimaryKey { column: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IndexError {
    #[error("Index name must not be empty")]
    EmptyName,

    #[error("Index is defined over table {actual:?}, expected {expected:?}")]
    TableMismatch { expected: String, actual: String },

    #[error("The {role} columns reference unknown column {column:?}")]
    UnknownColumn { role: ColumnRole, column: String },

    #[error("Column {column:?} is listed more than once in the {role} columns")]
    DuplicateColumn { role: ColumnRole, column: String },

    #[error("Column {column:?} is used as both a {first} and a {second} column")]
    OverlappingColumn {
        column: String,
        first: ColumnRole,
        second: ColumnRole,
    },

    #[error("Index must have at least one equality or sort column")]
    NoKeyColumns,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<Column>,
    pub primary_key: Vec<String>,
    pub sharding_key: Vec<String>,
}

impl TableSchema {
    pub fn new(
        name: impl Into<String>,
        columns: Vec<Column>,
        primary_key: &[&str],
        sharding_key: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            columns,
            primary_key: primary_key.iter().map(|c| c.to_string()).collect(),
            sharding_key: sharding_key.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Row positions of the primary key columns, in key order.
    pub fn primary_key_positions(&self) -> Vec<usize> {
        self.positions(&self.primary_key)
    }

    /// Row positions of the sharding key columns, in key order.
    pub fn sharding_key_positions(&self) -> Vec<usize> {
        self.positions(&self.sharding_key)
    }

    pub(crate) fn positions(&self, names: &[String]) -> Vec<usize> {
        names
            .iter()
            .filter_map(|name| self.column_position(name))
            .collect()
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.name.trim().is_empty() {
            return Err(SchemaError::EmptyName);
        }
        if self.columns.is_empty() {
            return Err(SchemaError::NoColumns);
        }

        let mut seen = HashSet::new();
        for (position, column) in self.columns.iter().enumerate() {
            if column.name.trim().is_empty() {
                return Err(SchemaError::EmptyColumnName { position });
            }
            if !seen.insert(column.name.as_str()) {
                return Err(SchemaError::DuplicateColumn {
                    name: column.name.clone(),
                });
            }
        }

        self.validate_key(ColumnRole::PrimaryKey, &self.primary_key)?;
        self.validate_key(ColumnRole::ShardingKey, &self.sharding_key)?;

        if let Some(column) = self
            .primary_key
            .iter()
            .filter_map(|name| self.column(name))
            .find(|column| column.nullable)
        {
            return Err(SchemaError::NullablePrimaryKey {
                column: column.name.clone(),
            });
        }

        Ok(())
    }

    fn validate_key(&self, role: ColumnRole, key: &[String]) -> Result<(), SchemaError> {
        if key.is_empty() {
            return Err(SchemaError::EmptyKey { role });
        }

        let mut seen = HashSet::new();
        for column in key {
            if self.column(column).is_none() {
                return Err(SchemaError::UnknownColumn {
                    role,
                    column: column.clone(),
                });
            }
            if !seen.insert(column.as_str()) {
                return Err(SchemaError::DuplicateKeyColumn {
                    role,
                    column: column.clone(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NullsOrder {
    First,
    #[default]
    Last,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortColumn {
    pub column: String,
    #[serde(default)]
    pub direction: SortDirection,
    #[serde(default)]
    pub nulls: NullsOrder,
}

/// A secondary index: point-matched equality columns, an ordered sort key and
/// covering (include) columns stored alongside each entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexSpecification {
    pub name: String,
    pub table: String,
    #[serde(default)]
    pub equality_columns: Vec<String>,
    #[serde(default)]
    pub sort_columns: Vec<SortColumn>,
    #[serde(default)]
    pub include_columns: Vec<String>,
}

impl IndexSpecification {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            equality_columns: vec![],
            sort_columns: vec![],
            include_columns: vec![],
        }
    }

    pub fn with_equality(mut self, columns: &[&str]) -> Self {
        self.equality_columns
            .extend(columns.iter().map(|c| c.to_string()));
        self
    }

    pub fn with_sort(
        mut self,
        column: &str,
        direction: SortDirection,
        nulls: NullsOrder,
    ) -> Self {
        self.sort_columns.push(SortColumn {
            column: column.to_string(),
            direction,
            nulls,
        });
        self
    }

    pub fn with_include(mut self, columns: &[&str]) -> Self {
        self.include_columns
            .extend(columns.iter().map(|c| c.to_string()));
        self
    }

    /// Columns stored in each index entry: equality, then sort, then include.
    pub fn covered_columns(&self) -> impl Iterator<Item = &str> {
        self.equality_columns
            .iter()
            .map(String::as_str)
            .chain(self.sort_columns.iter().map(|s| s.column.as_str()))
            .chain(self.include_columns.iter().map(String::as_str))
    }

    pub fn validate(&self, schema: &TableSchema) -> Result<(), IndexError> {
        if self.name.trim().is_empty() {
            return Err(IndexError::EmptyName);
        }
        if self.table != schema.name {
            return Err(IndexError::TableMismatch {
                expected: schema.name.clone(),
                actual: self.table.clone(),
            });
        }
        if self.equality_columns.is_empty() && self.sort_columns.is_empty() {
            return Err(IndexError::NoKeyColumns);
        }

        let roles = self
            .equality_columns
            .iter()
            .map(|c| (c.as_str(), ColumnRole::Equality))
            .chain(
                self.sort_columns
                    .iter()
                    .map(|s| (s.column.as_str(), ColumnRole::Sort)),
            )
            .chain(
                self.include_columns
                    .iter()
                    .map(|c| (c.as_str(), ColumnRole::Include)),
            );

        let mut assigned: Vec<(&str, ColumnRole)> = vec![];
        for (column, role) in roles {
            if schema.column(column).is_none() {
                return Err(IndexError::UnknownColumn {
                    role,
                    column: column.to_string(),
                });
            }
            if let Some((_, first)) = assigned.iter().find(|(c, _)| *c == column) {
                return Err(if *first == role {
                    IndexError::DuplicateColumn {
                        role,
                        column: column.to_string(),
                    }
                } else {
                    IndexError::OverlappingColumn {
                        column: column.to_string(),
                        first: *first,
                        second: role,
                    }
                });
            }
            assigned.push((column, role));
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use rstest::rstest;

    use super::*;
    use crate::data_types::ColumnType;

    pub(crate) fn iot_temperature_schema() -> TableSchema {
        TableSchema::new(
            "IOT_TEMPERATURE",
            vec![
                Column::new("deviceID", ColumnType::Int32, false),
                Column::new("sensorID", ColumnType::Int32, false),
                Column::new("ts", ColumnType::Int64, false),
                Column::new("ambient_temp", ColumnType::Float64, true),
                Column::new("power", ColumnType::Float64, true),
                Column::new("temperature", ColumnType::Float64, true),
            ],
            &["deviceID", "sensorID", "ts"],
            &["deviceID", "sensorID"],
        )
    }

    pub(crate) fn iot_temperature_index() -> IndexSpecification {
        IndexSpecification::new("iot_temperature_by_device", "IOT_TEMPERATURE")
            .with_equality(&["deviceID", "sensorID"])
            .with_sort("ts", SortDirection::Desc, NullsOrder::Last)
            .with_include(&["temperature"])
    }

    #[test]
    fn test_valid_schema() {
        let schema = iot_temperature_schema();
        schema.validate().unwrap();
        assert_eq!(schema.primary_key_positions(), vec![0, 1, 2]);
        assert_eq!(schema.sharding_key_positions(), vec![0, 1]);
    }

    #[test]
    fn test_sharding_key_need_not_be_primary_key_prefix() {
        let mut schema = iot_temperature_schema();
        schema.sharding_key = vec!["power".to_string()];
        schema.validate().unwrap();
    }

    #[rstest]
    #[case::empty_name(|s: &mut TableSchema| s.name = " ".into(), SchemaError::EmptyName)]
    #[case::no_columns(|s: &mut TableSchema| s.columns.clear(), SchemaError::NoColumns)]
    #[case::duplicate_column(
        |s: &mut TableSchema| s.columns[4].name = "ambient_temp".into(),
        SchemaError::DuplicateColumn { name: "ambient_temp".into() }
    )]
    #[case::empty_column_name(
        |s: &mut TableSchema| s.columns[5].name = "".into(),
        SchemaError::EmptyColumnName { position: 5 }
    )]
    #[case::empty_primary_key(
        |s: &mut TableSchema| s.primary_key.clear(),
        SchemaError::EmptyKey { role: ColumnRole::PrimaryKey }
    )]
    #[case::empty_sharding_key(
        |s: &mut TableSchema| s.sharding_key.clear(),
        SchemaError::EmptyKey { role: ColumnRole::ShardingKey }
    )]
    #[case::unknown_primary_key_column(
        |s: &mut TableSchema| s.primary_key.push("missing".into()),
        SchemaError::UnknownColumn { role: ColumnRole::PrimaryKey, column: "missing".into() }
    )]
    #[case::unknown_sharding_key_column(
        |s: &mut TableSchema| s.sharding_key = vec!["missing".into()],
        SchemaError::UnknownColumn { role: ColumnRole::ShardingKey, column: "missing".into() }
    )]
    #[case::repeated_key_column(
        |s: &mut TableSchema| s.sharding_key.push("deviceID".into()),
        SchemaError::DuplicateKeyColumn { role: ColumnRole::ShardingKey, column: "deviceID".into() }
    )]
    #[case::nullable_primary_key(
        |s: &mut TableSchema| s.columns[2].nullable = true,
        SchemaError::NullablePrimaryKey { column: "ts".into() }
    )]
    fn test_invalid_schema(
        #[case] mutate: fn(&mut TableSchema),
        #[case] expected: SchemaError,
    ) {
        let mut schema = iot_temperature_schema();
        mutate(&mut schema);
        assert_eq!(schema.validate().unwrap_err(), expected);
    }

    #[test]
    fn test_valid_index() {
        let index = iot_temperature_index();
        index.validate(&iot_temperature_schema()).unwrap();
        assert_eq!(
            index.covered_columns().collect::<Vec<_>>(),
            vec!["deviceID", "sensorID", "ts", "temperature"]
        );
    }

    #[test]
    fn test_sort_only_index() {
        let index = IndexSpecification::new("by_ts", "IOT_TEMPERATURE").with_sort(
            "ts",
            SortDirection::Asc,
            NullsOrder::First,
        );
        index.validate(&iot_temperature_schema()).unwrap();
    }

    #[rstest]
    #[case::empty_name(
        IndexSpecification::new("", "IOT_TEMPERATURE").with_equality(&["deviceID"]),
        IndexError::EmptyName
    )]
    #[case::other_table(
        IndexSpecification::new("idx", "OTHER").with_equality(&["deviceID"]),
        IndexError::TableMismatch { expected: "IOT_TEMPERATURE".into(), actual: "OTHER".into() }
    )]
    #[case::no_key_columns(
        IndexSpecification::new("idx", "IOT_TEMPERATURE").with_include(&["power"]),
        IndexError::NoKeyColumns
    )]
    #[case::unknown_include(
        IndexSpecification::new("idx", "IOT_TEMPERATURE")
            .with_equality(&["deviceID"])
            .with_include(&["humidity"]),
        IndexError::UnknownColumn { role: ColumnRole::Include, column: "humidity".into() }
    )]
    #[case::equality_and_sort(
        IndexSpecification::new("idx", "IOT_TEMPERATURE")
            .with_equality(&["deviceID", "ts"])
            .with_sort("ts", SortDirection::Desc, NullsOrder::Last),
        IndexError::OverlappingColumn {
            column: "ts".into(),
            first: ColumnRole::Equality,
            second: ColumnRole::Sort,
        }
    )]
    #[case::sort_and_include(
        IndexSpecification::new("idx", "IOT_TEMPERATURE")
            .with_sort("ts", SortDirection::Desc, NullsOrder::Last)
            .with_include(&["ts"]),
        IndexError::OverlappingColumn {
            column: "ts".into(),
            first: ColumnRole::Sort,
            second: ColumnRole::Include,
        }
    )]
    #[case::repeated_equality(
        IndexSpecification::new("idx", "IOT_TEMPERATURE").with_equality(&["deviceID", "deviceID"]),
        IndexError::DuplicateColumn { role: ColumnRole::Equality, column: "deviceID".into() }
    )]
    fn test_invalid_index(#[case] index: IndexSpecification, #[case] expected: IndexError) {
        assert_eq!(
            index.validate(&iot_temperature_schema()).unwrap_err(),
            expected
        );
    }
}
