//! Index manifest: the dimensionality and embedding model an index was built with.

use anyhow::Result;
use imagecache_traits::CacheError;
use redb::{Database, TableDefinition};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::record_table::{RecordTable, init_table};
use crate::time_utils::now_ms;

const MANIFEST_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("index_manifest");
const MANIFEST_KEY: &str = "index";

const MIN_DIMENSION: usize = 1;

/// Fixed properties of a persisted index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub dimension: usize,
    pub embedding_model: String,
    pub created_at: i64,
}

impl IndexManifest {
    pub fn new(dimension: usize, embedding_model: impl Into<String>) -> Self {
        Self {
            dimension,
            embedding_model: embedding_model.into(),
            created_at: now_ms(),
        }
    }

    /// Validate manifest values
    pub fn validate(&self) -> Result<()> {
        if self.dimension < MIN_DIMENSION {
            return Err(anyhow::anyhow!(
                "Index dimension must be at least {}",
                MIN_DIMENSION
            ));
        }
        Ok(())
    }
}

/// Manifest storage
#[derive(Clone)]
pub struct ManifestStorage {
    db: Arc<Database>,
}

impl RecordTable for ManifestStorage {
    type Record = IndexManifest;

    const TABLE: TableDefinition<'static, &'static str, &'static [u8]> = MANIFEST_TABLE;

    fn db(&self) -> &Arc<Database> {
        &self.db
    }
}

impl ManifestStorage {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        init_table(&db, MANIFEST_TABLE)?;
        Ok(Self { db })
    }

    /// Get the stored manifest
    pub fn get(&self) -> Result<Option<IndexManifest>> {
        self.get_record(MANIFEST_KEY)
    }

    /// Replace the stored manifest
    pub fn set(&self, manifest: &IndexManifest) -> Result<()> {
        manifest.validate()?;
        self.put_record(MANIFEST_KEY, manifest)
    }

    /// Remove the stored manifest so the next `ensure` starts over.
    pub fn clear(&self) -> Result<bool> {
        self.remove_record(MANIFEST_KEY)
    }

    /// Return the stored manifest, creating it on first use.
    ///
    /// Fails with `CacheError::DimensionMismatch` when the stored dimension
    /// differs from `dimension`; the index must be purged before it can be
    /// used with the new dimensionality.
    pub fn ensure(&self, dimension: usize, embedding_model: &str) -> Result<IndexManifest> {
        match self.get()? {
            Some(manifest) => {
                if manifest.dimension != dimension {
                    return Err(CacheError::DimensionMismatch {
                        expected: manifest.dimension,
                        actual: dimension,
                    }
                    .into());
                }
                if manifest.embedding_model != embedding_model {
                    tracing::warn!(
                        stored = %manifest.embedding_model,
                        configured = %embedding_model,
                        "Embedding model differs from the one the index was built with"
                    );
                }
                Ok(manifest)
            }
            None => {
                let manifest = IndexManifest::new(dimension, embedding_model);
                self.set(&manifest)?;
                Ok(manifest)
            }
        }
    }
}
