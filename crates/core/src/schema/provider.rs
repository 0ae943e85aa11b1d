use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::error::Result;
use crate::load_order::{grouped_load_order, LoadOrder};

use super::documents::ApiSchemaDocuments;

/// Everything derived from one schema load.
#[derive(Debug)]
pub struct SchemaSnapshot {
    pub reload_id: Uuid,
    pub documents: Arc<ApiSchemaDocuments>,
    pub load_order: Vec<LoadOrder>,
}

impl SchemaSnapshot {
    /// Validate the schemas and derive the load order.
    pub fn build(documents: ApiSchemaDocuments) -> Result<Self> {
        documents.validate_reference_consistency()?;
        let load_order = grouped_load_order(&documents)?;
        Ok(Self {
            reload_id: Uuid::new_v4(),
            documents: Arc::new(documents),
            load_order,
        })
    }
}

/// Holds the current schema snapshot. Readers clone the `Arc` and keep a
/// consistent view for the rest of their request even if a reload happens.
#[derive(Debug)]
pub struct SchemaProvider {
    current: RwLock<Arc<SchemaSnapshot>>,
    source: Option<(PathBuf, Vec<PathBuf>)>,
}

impl SchemaProvider {
    pub fn new(documents: ApiSchemaDocuments) -> Result<Self> {
        Ok(Self {
            current: RwLock::new(Arc::new(SchemaSnapshot::build(documents)?)),
            source: None,
        })
    }

    /// Load from schema files; [`reload_from_source`](Self::reload_from_source)
    /// re-reads the same files.
    pub fn from_files(core_path: &Path, extension_paths: &[PathBuf]) -> Result<Self> {
        let documents = ApiSchemaDocuments::load(core_path, extension_paths)?;
        let mut provider = Self::new(documents)?;
        provider.source = Some((core_path.to_path_buf(), extension_paths.to_vec()));
        Ok(provider)
    }

    pub fn current(&self) -> Arc<SchemaSnapshot> {
        self.current.read().clone()
    }

    /// Build a new snapshot and swap it in. On failure the current snapshot
    /// stays in place.
    pub fn reload(&self, documents: ApiSchemaDocuments) -> Result<Arc<SchemaSnapshot>> {
        let snapshot = Arc::new(SchemaSnapshot::build(documents)?);
        *self.current.write() = snapshot.clone();
        info!(
            reload_id = %snapshot.reload_id,
            resources = snapshot.load_order.len(),
            "schema reloaded"
        );
        Ok(snapshot)
    }

    /// Re-read the files this provider was created from. A provider built
    /// from in-memory documents keeps its snapshot.
    pub fn reload_from_source(&self) -> Result<Arc<SchemaSnapshot>> {
        match &self.source {
            Some((core_path, extension_paths)) => {
                let documents = ApiSchemaDocuments::load(core_path, extension_paths)?;
                self.reload(documents)
            }
            None => Ok(self.current()),
        }
    }
}
