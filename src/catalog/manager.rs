use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};

use crate::catalog::schema_catalog::detached;
use crate::catalog::{
    CatalogError, CatalogResult, CatalogSession, SchemaCatalog, TableDescription,
    TableError, TableResult,
};
use crate::repository::interface::{Error as RepositoryError, Repository};
use crate::schema::{IndexSpecification, TableSchema};

/// Database and table lifecycle on top of the per-database catalogs.
///
/// Catalogs are loaded from the repository the first time a database is
/// opened and shared between all sessions that open it afterwards.
#[derive(Debug)]
pub struct TableManager {
    repository: Arc<dyn Repository>,
    catalogs: Arc<DashMap<String, Arc<SchemaCatalog>>>,
}

impl TableManager {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self {
            repository,
            catalogs: Arc::new(DashMap::new()),
        }
    }

    /// Catalog of the named database.
    pub async fn catalog(&self, name: &str) -> CatalogResult<Arc<SchemaCatalog>> {
        if let Some(catalog) = self.catalogs.get(name) {
            return Ok(catalog.value().clone());
        }

        let database = self
            .repository
            .get_database(name)
            .await
            .map_err(|e| match e {
                RepositoryError::SqlxError(sqlx::error::Error::RowNotFound) => {
                    CatalogError::DatabaseNotFound {
                        name: name.to_string(),
                    }
                }
                e => e.into(),
            })?;

        let catalog = Arc::new(SchemaCatalog::load(self.repository.clone(), database).await?);

        // Another caller may have loaded it in the meantime; keep theirs.
        Ok(self
            .catalogs
            .entry(name.to_string())
            .or_insert(catalog)
            .value()
            .clone())
    }

    pub async fn list_databases(&self) -> CatalogResult<Vec<String>> {
        Ok(self
            .repository
            .list_databases()
            .await?
            .into_iter()
            .map(|database| database.name)
            .collect())
    }

    pub async fn open_database(
        &self,
        session: &mut CatalogSession,
        name: &str,
    ) -> CatalogResult<()> {
        let catalog = self.catalog(name).await?;
        session.open(catalog);
        Ok(())
    }

    /// Create a database and make it the session's open database.
    ///
    /// Fails with `DatabaseAlreadyExists` while the session holds a non-empty
    /// database, or if the named database exists and has tables. An existing
    /// empty database is simply opened.
    pub async fn create_database(
        &self,
        session: &mut CatalogSession,
        name: &str,
    ) -> CatalogResult<()> {
        if let Ok(open) = session.catalog() {
            if !open.is_empty() {
                return Err(CatalogError::DatabaseAlreadyExists {
                    name: open.database_name().to_string(),
                });
            }
        }

        match self.catalog(name).await {
            Ok(catalog) if catalog.is_empty() => {
                info!("Database {name:?} already exists and is empty, opening it");
                session.open(catalog);
                return Ok(());
            }
            Ok(_) => {
                return Err(CatalogError::DatabaseAlreadyExists {
                    name: name.to_string(),
                })
            }
            Err(CatalogError::DatabaseNotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        self.repository
            .create_database(name)
            .await
            .map_err(|e| match e {
                RepositoryError::UniqueConstraintViolation(_) => {
                    CatalogError::DatabaseAlreadyExists {
                        name: name.to_string(),
                    }
                }
                e => e.into(),
            })?;
        info!("Created database {name:?}");

        self.open_database(session, name).await
    }

    /// Drop a database with all of its tables and indexes. Sessions that have
    /// it open see it as empty from then on.
    pub async fn drop_database(
        &self,
        session: &mut CatalogSession,
        name: &str,
    ) -> CatalogResult<()> {
        let catalog = self.catalog(name).await?;
        let catalogs = self.catalogs.clone();
        let cached_name = name.to_string();
        detached(async move {
            catalog.writer().await?.drop_database().await?;
            catalogs.remove_if(&cached_name, |_, cached| Arc::ptr_eq(cached, &catalog));
            Ok::<_, CatalogError>(())
        })
        .await?;

        if session.database() == Some(name) {
            session.close();
        }

        info!("Dropped database {name:?}");
        Ok(())
    }

    /// Register a table in the session's database, optionally together with
    /// one index.
    pub async fn create_table(
        &self,
        session: &CatalogSession,
        schema: TableSchema,
        index: Option<IndexSpecification>,
    ) -> TableResult<()> {
        match index {
            Some(index) => self.create_table_with_index(session, schema, index).await,
            None => Ok(session.catalog()?.register_table(schema).await?),
        }
    }

    /// Register a table and an index over it as one unit: if the index can't
    /// be registered the table is removed again, and readers never see the
    /// table on its own.
    ///
    /// The work runs to its end even if the caller's future is dropped; the
    /// outcome is published in one step once both registrations are done.
    pub async fn create_table_with_index(
        &self,
        session: &CatalogSession,
        schema: TableSchema,
        index: IndexSpecification,
    ) -> TableResult<()> {
        let catalog = session.catalog()?.clone();
        detached(async move {
            let mut writer = catalog.writer().await?;

            let table = schema.name.clone();
            writer.register_table(schema).await?;

            let result: TableResult<()> = match writer.register_index(index).await {
                Ok(()) => Ok(()),
                Err(cause) => {
                    warn!("Rolling back table {table:?}: {cause}");
                    match writer.drop_table(&table).await {
                        Ok(()) => Err(cause.into()),
                        // The table is still persisted, so it stays visible
                        Err(rollback) => Err(TableError::RollbackFailed {
                            table,
                            cause: Box::new(cause),
                            rollback: Box::new(rollback),
                        }),
                    }
                }
            };

            writer.commit();
            result
        })
        .await
    }

    pub async fn drop_table(&self, session: &CatalogSession, name: &str) -> CatalogResult<()> {
        session.catalog()?.drop_table(name).await
    }

    pub fn list_tables(&self, session: &CatalogSession) -> CatalogResult<Vec<String>> {
        Ok(session.catalog()?.list_tables())
    }

    pub fn get_table(&self, session: &CatalogSession, name: &str) -> CatalogResult<TableSchema> {
        session.catalog()?.get_table(name)
    }

    pub fn describe_table(
        &self,
        session: &CatalogSession,
        name: &str,
    ) -> CatalogResult<TableDescription> {
        session.catalog()?.describe_table(name)
    }
}
