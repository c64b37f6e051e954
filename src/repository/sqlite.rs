use std::{fmt::Debug, str::FromStr};

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::sqlite::SqliteJournalMode;
use sqlx::{
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, QueryBuilder, Row, Sqlite,
};

use crate::data_types::{DatabaseId, IndexId, TableId};
use crate::schema::{IndexSpecification, TableSchema};

use super::interface::{
    AllTableColumnsResult, DatabaseRecord, Error, IndexRecord, Repository, Result,
};

const IN_MEMORY_DSN: &str = "sqlite::memory:";

#[derive(Debug)]
pub struct SqliteRepository {
    pub executor: Pool<Sqlite>,
}

impl SqliteRepository {
    pub const MIGRATOR: Migrator = sqlx::migrate!("migrations/sqlite");

    pub async fn try_new(dsn: String) -> Result<Self> {
        let in_memory = dsn == IN_MEMORY_DSN;

        let options = SqliteConnectOptions::from_str(&dsn)
            .map_err(Self::interpret_error)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(if in_memory {
                SqliteJournalMode::Memory
            } else {
                SqliteJournalMode::Wal
            });

        let mut pool_options = SqlitePoolOptions::new();
        if in_memory {
            // Every connection to an in-memory SQLite database gets its own
            // private database.
            pool_options = pool_options.max_connections(1).idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(Self::interpret_error)?;
        let repo = Self { executor: pool };
        repo.setup().await?;
        Ok(repo)
    }

    pub fn interpret_error(error: sqlx::Error) -> Error {
        if let sqlx::Error::Database(ref d) = error {
            // Reference: https://www.sqlite.org/rescode.html
            let message = d.message();

            // sqlx doesn't surface the extended error code for FK violations,
            // so match on the message instead.
            if message.contains("FOREIGN KEY constraint failed") {
                return Error::FKConstraintViolation(error);
            }
            if message.contains("UNIQUE constraint failed") {
                return Error::UniqueConstraintViolation(error);
            }
        }
        Error::SqlxError(error)
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn setup(&self) -> Result<(), Error> {
        Self::MIGRATOR
            .run(&self.executor)
            .await
            .map_err(|e| Error::SqlxError(e.into()))
    }

    async fn create_database(&self, database_name: &str) -> Result<DatabaseId, Error> {
        let id = sqlx::query(r#"INSERT INTO database (name) VALUES ($1) RETURNING (id)"#)
            .bind(database_name)
            .fetch_one(&self.executor)
            .await
            .map_err(Self::interpret_error)?
            .try_get("id")
            .map_err(Self::interpret_error)?;

        Ok(id)
    }

    async fn get_database(&self, name: &str) -> Result<DatabaseRecord, Error> {
        let database =
            sqlx::query_as(r#"SELECT id, name FROM database WHERE database.name = $1"#)
                .bind(name)
                .fetch_one(&self.executor)
                .await
                .map_err(Self::interpret_error)?;

        Ok(database)
    }

    async fn list_databases(&self) -> Result<Vec<DatabaseRecord>, Error> {
        let databases = sqlx::query_as(r#"SELECT id, name FROM database ORDER BY name"#)
            .fetch(&self.executor)
            .try_collect()
            .await
            .map_err(Self::interpret_error)?;

        Ok(databases)
    }

    async fn delete_database(&self, database_id: DatabaseId) -> Result<(), Error> {
        sqlx::query("DELETE FROM database WHERE id = $1 RETURNING id")
            .bind(database_id)
            .fetch_one(&self.executor)
            .await
            .map_err(Self::interpret_error)?;
        Ok(())
    }

    async fn create_table(
        &self,
        database_id: DatabaseId,
        schema: &TableSchema,
    ) -> Result<TableId, Error> {
        let mut tx = self
            .executor
            .begin()
            .await
            .map_err(Self::interpret_error)?;

        let new_table_id: i64 = sqlx::query(
            r#"INSERT INTO "table" (database_id, name) VALUES ($1, $2) RETURNING (id)"#,
        )
        .bind(database_id)
        .bind(&schema.name)
        .fetch_one(&mut *tx)
        .await
        .map_err(Self::interpret_error)?
        .try_get("id")
        .map_err(Self::interpret_error)?;

        // TODO this breaks if we have more than (bind limit / 7) columns
        if !schema.columns.is_empty() {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO table_column(table_id, ordinal, name, type, nullable, \
                primary_key_position, sharding_key_position) ",
            );

            builder.push_values(schema.columns.iter().enumerate(), |mut b, (ordinal, col)| {
                let primary_key_position = schema
                    .primary_key
                    .iter()
                    .position(|name| *name == col.name)
                    .map(|p| p as i64);
                let sharding_key_position = schema
                    .sharding_key
                    .iter()
                    .position(|name| *name == col.name)
                    .map(|p| p as i64);

                b.push_bind(new_table_id)
                    .push_bind(ordinal as i64)
                    .push_bind(col.name.clone())
                    .push_bind(col.r#type.to_string())
                    .push_bind(col.nullable)
                    .push_bind(primary_key_position)
                    .push_bind(sharding_key_position);
            });

            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(Self::interpret_error)?;
        }

        tx.commit().await.map_err(Self::interpret_error)?;
        Ok(new_table_id)
    }

    async fn list_table_columns(
        &self,
        database_id: DatabaseId,
    ) -> Result<Vec<AllTableColumnsResult>, Error> {
        let columns = sqlx::query_as(
            r#"
        SELECT
            "table".id AS table_id,
            "table".name AS table_name,
            table_column.name AS column_name,
            table_column.type AS column_type,
            table_column.nullable AS nullable,
            table_column.primary_key_position AS primary_key_position,
            table_column.sharding_key_position AS sharding_key_position
        FROM "table"
        INNER JOIN table_column ON table_column.table_id = "table".id
        WHERE "table".database_id = $1
        ORDER BY "table".id, table_column.ordinal
        "#,
        )
        .bind(database_id)
        .fetch(&self.executor)
        .try_collect()
        .await
        .map_err(Self::interpret_error)?;

        Ok(columns)
    }

    async fn delete_table(&self, table_id: TableId) -> Result<(), Error> {
        sqlx::query("DELETE FROM \"table\" WHERE id = $1 RETURNING id")
            .bind(table_id)
            .fetch_one(&self.executor)
            .await
            .map_err(Self::interpret_error)?;
        Ok(())
    }

    async fn create_index(
        &self,
        database_id: DatabaseId,
        table_id: TableId,
        index: &IndexSpecification,
    ) -> Result<IndexId, Error> {
        let definition = serde_json::to_string(index)?;

        let id = sqlx::query(
            r#"INSERT INTO table_index (database_id, table_id, name, definition)
            VALUES ($1, $2, $3, $4) RETURNING (id)"#,
        )
        .bind(database_id)
        .bind(table_id)
        .bind(&index.name)
        .bind(definition)
        .fetch_one(&self.executor)
        .await
        .map_err(Self::interpret_error)?
        .try_get("id")
        .map_err(Self::interpret_error)?;

        Ok(id)
    }

    async fn list_indexes(&self, database_id: DatabaseId) -> Result<Vec<IndexRecord>, Error> {
        let indexes = sqlx::query_as(
            r#"SELECT id, table_id, name, definition FROM table_index
            WHERE database_id = $1 ORDER BY id"#,
        )
        .bind(database_id)
        .fetch(&self.executor)
        .try_collect()
        .await
        .map_err(Self::interpret_error)?;

        Ok(indexes)
    }
}
