use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;

use crate::data_types::{IndexId, TableId};
use crate::repository::interface::Error as RepositoryError;
use crate::schema::{IndexError, IndexSpecification, SchemaError, TableSchema};

pub mod manager;
mod schema_catalog;
pub mod session;

pub use manager::TableManager;
pub use schema_catalog::{CatalogWriter, SchemaCatalog};
pub use session::CatalogSession;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    // Table errors
    #[error("Table {name:?} already exists")]
    DuplicateTable { name: String },

    #[error("Table {name:?} doesn't exist")]
    UnknownTable { name: String },

    #[error("Invalid schema for table {name:?}: {source}")]
    InvalidSchema { name: String, source: SchemaError },

    // Index errors
    #[error("Index {name:?} already exists")]
    DuplicateIndex { name: String },

    #[error("Invalid index {name:?}: {source}")]
    InvalidIndex { name: String, source: IndexError },

    // Database errors
    #[error("Database {name:?} already exists")]
    DatabaseAlreadyExists { name: String },

    #[error("Database {name:?} doesn't exist")]
    DatabaseNotFound { name: String },

    #[error("No database is open in this session")]
    NoOpenDatabase,

    #[error("No session available after waiting {timeout_ms} ms")]
    NoSessionAvailable { timeout_ms: u64 },

    #[error("Catalog mutation aborted: {reason}")]
    Aborted { reason: String },

    // Repository implementation errors
    #[error("Corrupt catalog entry: {reason}")]
    Corrupt { reason: String },

    #[error("Internal SQL error: {0:?}")]
    SqlxError(sqlx::Error),

    #[error("Failed parsing JSON: {0}")]
    SerdeJsonError(#[from] serde_json::Error),
}

impl From<RepositoryError> for CatalogError {
    fn from(err: RepositoryError) -> CatalogError {
        match err {
            RepositoryError::UniqueConstraintViolation(e)
            | RepositoryError::FKConstraintViolation(e)
            | RepositoryError::SqlxError(e) => CatalogError::SqlxError(e),
            RepositoryError::SerdeJsonError(e) => CatalogError::SerdeJsonError(e),
        }
    }
}

pub type CatalogResult<T, E = CatalogError> = Result<T, E>;

/// Failure of a composite table operation.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(
        "Table {table:?} was left behind: rolling back after {cause} failed with {rollback}"
    )]
    RollbackFailed {
        table: String,
        cause: Box<CatalogError>,
        rollback: Box<CatalogError>,
    },
}

pub type TableResult<T, E = TableError> = Result<T, E>;

/// A table as registered in a database: its persistent ID and frozen schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredTable {
    pub id: TableId,
    pub schema: Arc<TableSchema>,
}

impl RegisteredTable {
    pub fn new(id: TableId, schema: Arc<TableSchema>) -> Self {
        Self { id, schema }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredIndex {
    pub id: IndexId,
    pub table_id: TableId,
    pub spec: Arc<IndexSpecification>,
}

/// Immutable view of a database's tables and indexes.
///
/// Tables are kept in registration order, indexes are keyed by their
/// (database-wide unique) name.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    pub(crate) tables: IndexMap<String, RegisteredTable>,
    pub(crate) indexes: IndexMap<String, RegisteredIndex>,
}

impl CatalogSnapshot {
    pub fn table(&self, name: &str) -> Option<&RegisteredTable> {
        self.tables.get(name)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    /// Indexes over the table with the given ID, in registration order.
    pub fn indexes_of(&self, table_id: TableId) -> impl Iterator<Item = &RegisteredIndex> {
        self.indexes
            .values()
            .filter(move |index| index.table_id == table_id)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// A table schema together with its secondary indexes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDescription {
    pub schema: TableSchema,
    pub indexes: Vec<IndexSpecification>,
}
