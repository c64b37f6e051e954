use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use itertools::Itertools;
use parking_lot::RwLock;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::catalog::{
    CatalogError, CatalogResult, CatalogSnapshot, RegisteredIndex, RegisteredTable,
    TableDescription,
};
use crate::data_types::{Column, ColumnType, DatabaseId};
use crate::repository::interface::{
    AllTableColumnsResult, DatabaseRecord, Error as RepositoryError, Repository,
};
use crate::schema::{IndexSpecification, TableSchema};

/// The tables and indexes of one database.
///
/// Reads work off an immutable [`CatalogSnapshot`] and never block on, or
/// observe the middle of, a mutation. Mutations go through a [`CatalogWriter`],
/// of which at most one exists per catalog at any time.
#[derive(Debug)]
pub struct SchemaCatalog {
    database: DatabaseRecord,
    repository: Arc<dyn Repository>,
    snapshot: RwLock<Arc<CatalogSnapshot>>,
    write_lock: Mutex<()>,
    dropped: AtomicBool,
    // Set when a writer went away without committing what it persisted
    stale: AtomicBool,
}

impl SchemaCatalog {
    /// Rebuild the catalog of `database` from its persisted state.
    pub async fn load(
        repository: Arc<dyn Repository>,
        database: DatabaseRecord,
    ) -> CatalogResult<Self> {
        let snapshot = load_snapshot(repository.as_ref(), &database).await?;

        Ok(Self {
            database,
            repository,
            snapshot: RwLock::new(Arc::new(snapshot)),
            write_lock: Mutex::new(()),
            dropped: AtomicBool::new(false),
            stale: AtomicBool::new(false),
        })
    }

    pub fn database_name(&self) -> &str {
        &self.database.name
    }

    pub fn database_id(&self) -> DatabaseId {
        self.database.id
    }

    /// The current state of the catalog.
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.snapshot.read().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Table names in registration order.
    pub fn list_tables(&self) -> Vec<String> {
        self.snapshot().table_names()
    }

    pub fn get_table(&self, name: &str) -> CatalogResult<TableSchema> {
        self.registered_table(name)
            .map(|table| table.schema.as_ref().clone())
    }

    pub fn registered_table(&self, name: &str) -> CatalogResult<RegisteredTable> {
        self.snapshot()
            .table(name)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownTable {
                name: name.to_string(),
            })
    }

    pub fn describe_table(&self, name: &str) -> CatalogResult<TableDescription> {
        let snapshot = self.snapshot();
        let table = snapshot
            .table(name)
            .ok_or_else(|| CatalogError::UnknownTable {
                name: name.to_string(),
            })?;

        Ok(TableDescription {
            schema: table.schema.as_ref().clone(),
            indexes: snapshot
                .indexes_of(table.id)
                .map(|index| index.spec.as_ref().clone())
                .collect(),
        })
    }

    pub async fn register_table(self: &Arc<Self>, schema: TableSchema) -> CatalogResult<()> {
        let catalog = self.clone();
        detached(async move {
            let mut writer = catalog.writer().await?;
            writer.register_table(schema).await?;
            writer.commit();
            Ok(())
        })
        .await
    }

    pub async fn register_index(self: &Arc<Self>, spec: IndexSpecification) -> CatalogResult<()> {
        let catalog = self.clone();
        detached(async move {
            let mut writer = catalog.writer().await?;
            writer.register_index(spec).await?;
            writer.commit();
            Ok(())
        })
        .await
    }

    pub async fn drop_table(self: &Arc<Self>, name: &str) -> CatalogResult<()> {
        let catalog = self.clone();
        let name = name.to_string();
        detached(async move {
            let mut writer = catalog.writer().await?;
            writer.drop_table(&name).await?;
            writer.commit();
            Ok(())
        })
        .await
    }

    /// Wait for exclusive mutation access to the catalog.
    ///
    /// If a previous writer was dropped without committing what it had
    /// persisted, the catalog is first reloaded from the repository.
    pub async fn writer(&self) -> CatalogResult<CatalogWriter<'_>> {
        let guard = self.write_lock.lock().await;
        if self.dropped.load(Ordering::Acquire) {
            return Err(CatalogError::DatabaseNotFound {
                name: self.database.name.clone(),
            });
        }

        if self.stale.load(Ordering::Acquire) {
            let snapshot = load_snapshot(self.repository.as_ref(), &self.database).await?;
            *self.snapshot.write() = Arc::new(snapshot);
            self.stale.store(false, Ordering::Release);
            info!(
                "Reloaded catalog of database {:?} after an uncommitted mutation",
                self.database.name
            );
        }

        let draft = self.snapshot().as_ref().clone();
        Ok(CatalogWriter {
            catalog: self,
            _guard: guard,
            draft,
            unsynced: false,
        })
    }

    pub(crate) fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }
}

/// Run a catalog mutation on its own task, so that it runs to its end even if
/// the caller stops waiting for it.
pub(crate) async fn detached<T, E>(
    mutation: impl Future<Output = Result<T, E>> + Send + 'static,
) -> Result<T, E>
where
    T: Send + 'static,
    E: From<CatalogError> + Send + 'static,
{
    tokio::spawn(mutation).await.unwrap_or_else(|e| {
        Err(CatalogError::Aborted {
            reason: e.to_string(),
        }
        .into())
    })
}

/// Exclusive mutation access to a [`SchemaCatalog`].
///
/// Every operation is persisted before it is applied to the writer's draft. The
/// draft becomes visible to readers in one step on [`CatalogWriter::commit`],
/// so a sequence of operations (e.g. a registration and its rollback) is never
/// partially observed. A writer dropped without committing publishes nothing;
/// if it had persisted anything, the next writer reloads the catalog.
pub struct CatalogWriter<'a> {
    catalog: &'a SchemaCatalog,
    _guard: MutexGuard<'a, ()>,
    draft: CatalogSnapshot,
    unsynced: bool,
}

impl<'a> CatalogWriter<'a> {
    pub fn database_name(&self) -> &str {
        self.catalog.database_name()
    }

    /// Publish the draft to readers and release the catalog.
    pub fn commit(mut self) {
        *self.catalog.snapshot.write() = Arc::new(std::mem::take(&mut self.draft));
        self.unsynced = false;
    }

    async fn persist<T>(
        &mut self,
        call: impl Future<Output = Result<T, RepositoryError>>,
    ) -> Result<T, RepositoryError> {
        // Pending calls count too: the write may land after we're dropped
        let unsynced = std::mem::replace(&mut self.unsynced, true);
        let result = call.await;
        if result.is_err() {
            self.unsynced = unsynced;
        }
        result
    }

    pub async fn register_table(&mut self, schema: TableSchema) -> CatalogResult<()> {
        schema
            .validate()
            .map_err(|source| CatalogError::InvalidSchema {
                name: schema.name.clone(),
                source,
            })?;

        if self.draft.tables.contains_key(&schema.name) {
            return Err(CatalogError::DuplicateTable { name: schema.name });
        }

        let catalog = self.catalog;
        let table_id = self
            .persist(catalog.repository.create_table(catalog.database.id, &schema))
            .await
            .map_err(|e| match e {
                RepositoryError::UniqueConstraintViolation(_) => {
                    CatalogError::DuplicateTable {
                        name: schema.name.clone(),
                    }
                }
                RepositoryError::FKConstraintViolation(_) => {
                    CatalogError::DatabaseNotFound {
                        name: catalog.database.name.clone(),
                    }
                }
                e => e.into(),
            })?;

        info!(
            "Registered table {:?} in database {:?}",
            schema.name, self.catalog.database.name
        );
        self.draft.tables.insert(
            schema.name.clone(),
            RegisteredTable::new(table_id, Arc::new(schema)),
        );
        Ok(())
    }

    pub async fn register_index(&mut self, spec: IndexSpecification) -> CatalogResult<()> {
        let table = self
            .draft
            .tables
            .get(&spec.table)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownTable {
                name: spec.table.clone(),
            })?;

        if self.draft.indexes.contains_key(&spec.name) {
            return Err(CatalogError::DuplicateIndex { name: spec.name });
        }

        spec.validate(&table.schema)
            .map_err(|source| CatalogError::InvalidIndex {
                name: spec.name.clone(),
                source,
            })?;

        let catalog = self.catalog;
        let index_id = self
            .persist(catalog.repository.create_index(catalog.database.id, table.id, &spec))
            .await
            .map_err(|e| match e {
                RepositoryError::UniqueConstraintViolation(_) => {
                    CatalogError::DuplicateIndex {
                        name: spec.name.clone(),
                    }
                }
                RepositoryError::FKConstraintViolation(_) => CatalogError::UnknownTable {
                    name: spec.table.clone(),
                },
                e => e.into(),
            })?;

        info!(
            "Registered index {:?} on table {:?} in database {:?}",
            spec.name, spec.table, self.catalog.database.name
        );
        self.draft.indexes.insert(
            spec.name.clone(),
            RegisteredIndex {
                id: index_id,
                table_id: table.id,
                spec: Arc::new(spec),
            },
        );
        Ok(())
    }

    /// Drop a table together with all of its indexes.
    pub async fn drop_table(&mut self, name: &str) -> CatalogResult<()> {
        let table_id = self
            .draft
            .tables
            .get(name)
            .map(|table| table.id)
            .ok_or_else(|| CatalogError::UnknownTable {
                name: name.to_string(),
            })?;

        let catalog = self.catalog;
        self.persist(catalog.repository.delete_table(table_id))
            .await
            .map_err(|e| match e {
                RepositoryError::SqlxError(sqlx::error::Error::RowNotFound) => {
                    CatalogError::UnknownTable {
                        name: name.to_string(),
                    }
                }
                e => e.into(),
            })?;

        self.draft.tables.shift_remove(name);
        self.draft
            .indexes
            .retain(|_, index| index.table_id != table_id);

        info!(
            "Dropped table {:?} from database {:?}",
            name, self.catalog.database.name
        );
        Ok(())
    }

    /// Delete the whole database. The catalog stays empty and refuses
    /// further mutations.
    pub(crate) async fn drop_database(mut self) -> CatalogResult<()> {
        let catalog = self.catalog;
        self.persist(catalog.repository.delete_database(catalog.database.id))
            .await
            .map_err(|e| match e {
                RepositoryError::SqlxError(sqlx::error::Error::RowNotFound) => {
                    CatalogError::DatabaseNotFound {
                        name: catalog.database.name.clone(),
                    }
                }
                e => e.into(),
            })?;

        self.catalog.dropped.store(true, Ordering::Release);
        self.draft = CatalogSnapshot::default();
        self.commit();
        Ok(())
    }
}

impl Drop for CatalogWriter<'_> {
    fn drop(&mut self) {
        if self.unsynced {
            warn!(
                "Catalog writer for database {:?} dropped without committing, reloading on next write",
                self.catalog.database.name
            );
            self.catalog.stale.store(true, Ordering::Release);
        }
    }
}

async fn load_snapshot(
    repository: &dyn Repository,
    database: &DatabaseRecord,
) -> CatalogResult<CatalogSnapshot> {
    let columns = repository.list_table_columns(database.id).await?;
    let indexes = repository.list_indexes(database.id).await?;

    let mut snapshot = CatalogSnapshot::default();

    for (table_id, table_columns) in &columns.iter().group_by(|col| col.table_id) {
        let schema = build_schema(table_columns.collect())?;
        snapshot.tables.insert(
            schema.name.clone(),
            RegisteredTable::new(table_id, Arc::new(schema)),
        );
    }

    for index in indexes {
        let spec: IndexSpecification = serde_json::from_str(&index.definition)?;
        if !snapshot.tables.values().any(|t| t.id == index.table_id) {
            return Err(CatalogError::Corrupt {
                reason: format!(
                    "index {:?} references missing table {}",
                    index.name, index.table_id
                ),
            });
        }
        snapshot.indexes.insert(
            index.name,
            RegisteredIndex {
                id: index.id,
                table_id: index.table_id,
                spec: Arc::new(spec),
            },
        );
    }

    debug!(
        "Loaded database {:?} with {} table(s) and {} index(es)",
        database.name,
        snapshot.tables.len(),
        snapshot.indexes.len()
    );

    Ok(snapshot)
}

fn build_schema(columns: Vec<&AllTableColumnsResult>) -> CatalogResult<TableSchema> {
    let name = columns
        .first()
        .map(|col| col.table_name.clone())
        .unwrap_or_default();

    let mut primary_key = vec![];
    let mut sharding_key = vec![];
    let mut schema_columns = Vec::with_capacity(columns.len());

    for col in columns {
        let r#type =
            ColumnType::from_str(&col.column_type).map_err(|e: strum::ParseError| {
                CatalogError::Corrupt {
                    reason: format!(
                        "column {:?} of table {:?} has type {:?}: {e}",
                        col.column_name, col.table_name, col.column_type
                    ),
                }
            })?;

        if let Some(position) = col.primary_key_position {
            primary_key.push((position, col.column_name.clone()));
        }
        if let Some(position) = col.sharding_key_position {
            sharding_key.push((position, col.column_name.clone()));
        }
        schema_columns.push(Column::new(col.column_name.clone(), r#type, col.nullable));
    }

    let key = |mut positions: Vec<(i64, String)>| {
        positions.sort_by_key(|(position, _)| *position);
        positions.into_iter().map(|(_, name)| name).collect()
    };

    Ok(TableSchema {
        name,
        columns: schema_columns,
        primary_key: key(primary_key),
        sharding_key: key(sharding_key),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::repository::sqlite::SqliteRepository;
    use crate::schema::tests::{iot_temperature_index, iot_temperature_schema};
    use crate::schema::{IndexError, SchemaError};

    async fn make_catalog() -> Arc<SchemaCatalog> {
        let repository: Arc<dyn Repository> = Arc::new(
            SqliteRepository::try_new("sqlite::memory:".to_string())
                .await
                .unwrap(),
        );
        let id = repository.create_database("testdb").await.unwrap();
        Arc::new(
            SchemaCatalog::load(
                repository,
                DatabaseRecord {
                    id,
                    name: "testdb".to_string(),
                },
            )
            .await
            .unwrap(),
        )
    }

    fn named_schema(name: &str) -> TableSchema {
        let mut schema = iot_temperature_schema();
        schema.name = name.to_string();
        schema
    }

    #[tokio::test]
    async fn test_register_then_get_table() {
        let catalog = make_catalog().await;
        catalog
            .register_table(iot_temperature_schema())
            .await
            .unwrap();

        assert_eq!(
            catalog.get_table("IOT_TEMPERATURE").unwrap(),
            iot_temperature_schema()
        );
        assert!(!catalog.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_table_keeps_first_registration() {
        let catalog = make_catalog().await;
        catalog
            .register_table(iot_temperature_schema())
            .await
            .unwrap();

        let mut other = iot_temperature_schema();
        other.columns.truncate(3);
        assert!(matches!(
            catalog.register_table(other).await.unwrap_err(),
            CatalogError::DuplicateTable { name } if name == "IOT_TEMPERATURE"
        ));
        assert_eq!(
            catalog.get_table("IOT_TEMPERATURE").unwrap(),
            iot_temperature_schema()
        );
    }

    #[tokio::test]
    async fn test_invalid_schema_is_not_registered() {
        let catalog = make_catalog().await;
        let mut schema = iot_temperature_schema();
        schema.primary_key.clear();

        assert!(matches!(
            catalog.register_table(schema).await.unwrap_err(),
            CatalogError::InvalidSchema {
                source: SchemaError::EmptyKey { .. },
                ..
            }
        ));
        assert!(catalog.list_tables().is_empty());
    }

    #[tokio::test]
    async fn test_list_tables_in_registration_order() {
        let catalog = make_catalog().await;
        for name in ["zeta", "alpha", "mid"] {
            catalog.register_table(named_schema(name)).await.unwrap();
        }
        assert_eq!(catalog.list_tables(), vec!["zeta", "alpha", "mid"]);

        catalog.drop_table("alpha").await.unwrap();
        assert_eq!(catalog.list_tables(), vec!["zeta", "mid"]);
    }

    #[tokio::test]
    async fn test_register_index_errors() {
        let catalog = make_catalog().await;

        assert!(matches!(
            catalog
                .register_index(iot_temperature_index())
                .await
                .unwrap_err(),
            CatalogError::UnknownTable { name } if name == "IOT_TEMPERATURE"
        ));

        catalog
            .register_table(iot_temperature_schema())
            .await
            .unwrap();
        catalog
            .register_index(iot_temperature_index())
            .await
            .unwrap();

        assert!(matches!(
            catalog
                .register_index(iot_temperature_index())
                .await
                .unwrap_err(),
            CatalogError::DuplicateIndex { .. }
        ));

        let invalid = IndexSpecification::new("by_humidity", "IOT_TEMPERATURE")
            .with_equality(&["humidity"]);
        assert!(matches!(
            catalog.register_index(invalid).await.unwrap_err(),
            CatalogError::InvalidIndex {
                source: IndexError::UnknownColumn { .. },
                ..
            }
        ));

        assert_eq!(
            catalog.describe_table("IOT_TEMPERATURE").unwrap().indexes,
            vec![iot_temperature_index()]
        );
    }

    #[tokio::test]
    async fn test_index_names_are_unique_per_database() {
        let catalog = make_catalog().await;
        catalog
            .register_table(iot_temperature_schema())
            .await
            .unwrap();
        catalog.register_table(named_schema("OTHER")).await.unwrap();
        catalog
            .register_index(iot_temperature_index())
            .await
            .unwrap();

        let mut index = iot_temperature_index();
        index.table = "OTHER".to_string();
        assert!(matches!(
            catalog.register_index(index).await.unwrap_err(),
            CatalogError::DuplicateIndex { .. }
        ));
    }

    #[tokio::test]
    async fn test_drop_table_removes_indexes() {
        let catalog = make_catalog().await;
        catalog
            .register_table(iot_temperature_schema())
            .await
            .unwrap();
        catalog
            .register_index(iot_temperature_index())
            .await
            .unwrap();

        catalog.drop_table("IOT_TEMPERATURE").await.unwrap();
        assert!(matches!(
            catalog.get_table("IOT_TEMPERATURE").unwrap_err(),
            CatalogError::UnknownTable { .. }
        ));
        assert!(catalog.snapshot().indexes.is_empty());
        assert!(matches!(
            catalog.drop_table("IOT_TEMPERATURE").await.unwrap_err(),
            CatalogError::UnknownTable { .. }
        ));

        // The index name is free again
        catalog
            .register_table(iot_temperature_schema())
            .await
            .unwrap();
        catalog
            .register_index(iot_temperature_index())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_writer_publishes_on_commit() {
        let catalog = make_catalog().await;
        let before = catalog.snapshot();

        let mut writer = catalog.writer().await.unwrap();
        writer.register_table(named_schema("first")).await.unwrap();
        writer.register_table(named_schema("second")).await.unwrap();
        assert!(catalog.list_tables().is_empty());

        writer.commit();
        assert_eq!(catalog.list_tables(), vec!["first", "second"]);
        // Old snapshots are unaffected
        assert!(before.is_empty());
    }

    #[tokio::test]
    async fn test_uncommitted_writer_publishes_nothing() {
        let catalog = make_catalog().await;
        catalog.register_table(named_schema("kept")).await.unwrap();

        {
            let mut writer = catalog.writer().await.unwrap();
            writer
                .register_table(iot_temperature_schema())
                .await
                .unwrap();
            writer.drop_table("kept").await.unwrap();
        }
        assert_eq!(catalog.list_tables(), vec!["kept"]);

        // The next writer catches up with what was persisted
        let writer = catalog.writer().await.unwrap();
        assert_eq!(catalog.list_tables(), vec!["IOT_TEMPERATURE"]);
        drop(writer);

        // A writer that persisted nothing leaves the catalog alone
        {
            let mut writer = catalog.writer().await.unwrap();
            assert!(matches!(
                writer.drop_table("missing").await.unwrap_err(),
                CatalogError::UnknownTable { .. }
            ));
        }
        catalog.register_table(named_schema("next")).await.unwrap();
        assert_eq!(catalog.list_tables(), vec!["IOT_TEMPERATURE", "next"]);
    }

    #[tokio::test]
    async fn test_dropped_caller_doesnt_interrupt_mutation() {
        let catalog = make_catalog().await;

        // Dropping the caller's future right away still registers the table
        let registration = catalog.register_table(iot_temperature_schema());
        tokio::pin!(registration);
        assert!(futures::poll!(registration.as_mut()).is_pending());
        drop(registration);

        // Let the detached task take the catalog, then wait for it to finish
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(catalog.writer().await.unwrap());
        assert_eq!(catalog.list_tables(), vec!["IOT_TEMPERATURE"]);
    }

    #[tokio::test]
    async fn test_reload_from_repository() {
        let catalog = make_catalog().await;
        catalog.register_table(named_schema("first")).await.unwrap();
        catalog
            .register_table(iot_temperature_schema())
            .await
            .unwrap();
        catalog
            .register_index(iot_temperature_index())
            .await
            .unwrap();

        let reloaded = SchemaCatalog::load(
            catalog.repository().clone(),
            DatabaseRecord {
                id: catalog.database_id(),
                name: "testdb".to_string(),
            },
        )
        .await
        .unwrap();

        assert_eq!(reloaded.list_tables(), vec!["first", "IOT_TEMPERATURE"]);
        assert_eq!(
            reloaded.describe_table("IOT_TEMPERATURE").unwrap(),
            catalog.describe_table("IOT_TEMPERATURE").unwrap()
        );
        assert_eq!(
            reloaded.registered_table("first").unwrap(),
            catalog.registered_table("first").unwrap()
        );
    }
}
