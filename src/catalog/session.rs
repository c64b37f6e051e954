use std::sync::Arc;

use tokio::sync::OwnedSemaphorePermit;
use tracing::debug;
use uuid::Uuid;

use crate::catalog::{CatalogError, CatalogResult, SchemaCatalog};

/// A caller's handle on the catalog, bound to at most one open database.
///
/// Sessions are handed out by the context from a bounded pool; the slot is
/// returned when the session is dropped, whichever way the caller exits.
#[derive(Debug)]
pub struct CatalogSession {
    id: Uuid,
    database: Option<Arc<SchemaCatalog>>,
    _permit: OwnedSemaphorePermit,
}

impl CatalogSession {
    pub(crate) fn new(permit: OwnedSemaphorePermit) -> Self {
        let id = Uuid::new_v4();
        debug!("Acquired session {id}");
        Self {
            id,
            database: None,
            _permit: permit,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Name of the open database, if any.
    pub fn database(&self) -> Option<&str> {
        self.database.as_ref().map(|catalog| catalog.database_name())
    }

    /// Catalog of the open database.
    pub fn catalog(&self) -> CatalogResult<&Arc<SchemaCatalog>> {
        self.database.as_ref().ok_or(CatalogError::NoOpenDatabase)
    }

    pub(crate) fn open(&mut self, catalog: Arc<SchemaCatalog>) {
        debug!(
            "Session {} switched to database {:?}",
            self.id,
            catalog.database_name()
        );
        self.database = Some(catalog);
    }

    pub(crate) fn close(&mut self) -> Option<Arc<SchemaCatalog>> {
        self.database.take()
    }
}

impl Drop for CatalogSession {
    fn drop(&mut self) {
        debug!("Released session {}", self.id);
    }
}
