use std::fmt::Debug;

use async_trait::async_trait;

use crate::data_types::{DatabaseId, IndexId, TableId};
use crate::schema::{IndexSpecification, TableSchema};

#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Eq)]
pub struct DatabaseRecord {
    pub id: DatabaseId,
    pub name: String,
}

#[derive(sqlx::FromRow, Debug, PartialEq, Eq)]
pub struct AllTableColumnsResult {
    pub table_id: TableId,
    pub table_name: String,
    pub column_name: String,
    pub column_type: String,
    pub nullable: bool,
    pub primary_key_position: Option<i64>,
    pub sharding_key_position: Option<i64>,
}

#[derive(sqlx::FromRow, Debug, PartialEq, Eq)]
pub struct IndexRecord {
    pub id: IndexId,
    pub table_id: TableId,
    pub name: String,
    pub definition: String,
}

/// Wrapper for conversion of database-specific error codes into actual errors
#[derive(Debug)]
pub enum Error {
    UniqueConstraintViolation(sqlx::Error),
    FKConstraintViolation(sqlx::Error),
    SerdeJsonError(serde_json::Error),

    // All other errors
    SqlxError(sqlx::Error),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerdeJsonError(err)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Durable storage of the catalog metadata. Every mutating call has committed
/// by the time it returns.
#[async_trait]
pub trait Repository: Send + Sync + Debug {
    async fn setup(&self) -> Result<(), Error>;

    async fn create_database(&self, database_name: &str) -> Result<DatabaseId, Error>;

    async fn get_database(&self, database_name: &str) -> Result<DatabaseRecord, Error>;

    async fn list_databases(&self) -> Result<Vec<DatabaseRecord>, Error>;

    /// Delete a database along with all of its tables and indexes.
    async fn delete_database(&self, database_id: DatabaseId) -> Result<(), Error>;

    /// Persist a table and its columns in a single transaction.
    async fn create_table(
        &self,
        database_id: DatabaseId,
        schema: &TableSchema,
    ) -> Result<TableId, Error>;

    /// Columns of every table in the database, ordered by table creation and
    /// column position.
    async fn list_table_columns(
        &self,
        database_id: DatabaseId,
    ) -> Result<Vec<AllTableColumnsResult>, Error>;

    /// Delete a table along with all of its indexes.
    async fn delete_table(&self, table_id: TableId) -> Result<(), Error>;

    async fn create_index(
        &self,
        database_id: DatabaseId,
        table_id: TableId,
        index: &IndexSpecification,
    ) -> Result<IndexId, Error>;

    async fn list_indexes(&self, database_id: DatabaseId) -> Result<Vec<IndexRecord>, Error>;
}
