//! imagecache Storage - persistence and indexing for the semantic image cache
//!
//! This crate provides the two stores every cache entry lives in, plus the
//! redb tables that make them durable.
//!
//! # Architecture
//!
//! `MetadataStore` is the durable record of every entry (including its
//! embedding). `VectorIndex` is an in-memory nearest-neighbour structure
//! whose full contents can be captured as a checksummed snapshot and kept in
//! `SnapshotStorage`. `ManifestStorage` pins the dimensionality an index was
//! built with.
//!
//! # Tables
//!
//! - `cache_entries` - Entry records (bincode)
//! - `index_snapshot` - Latest encoded vector index snapshot
//! - `index_manifest` - Index dimension and embedding model

pub mod entry;
pub mod manifest;
pub mod metadata;
pub mod record_table;
pub mod snapshot;
pub mod time_utils;
pub mod vector_index;

use anyhow::Result;
use redb::Database;
use std::path::Path;
use std::sync::Arc;

pub use entry::CacheEntry;
pub use manifest::{IndexManifest, ManifestStorage};
pub use metadata::{MetadataStore, UsageAgePredicate};
pub use record_table::RecordTable;
pub use snapshot::SnapshotStorage;
pub use vector_index::{ScoredId, VectorIndex, cosine_similarity};

/// Central storage manager that initializes all storage subsystems
pub struct Storage {
    db: Arc<Database>,
    pub metadata: MetadataStore,
    pub snapshots: SnapshotStorage,
    pub manifest: ManifestStorage,
}

impl Storage {
    /// Create a new storage instance at the given path.
    ///
    /// This will create the database file if it doesn't exist and initialize
    /// all required tables.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let db = Arc::new(Database::create(path.as_ref())?);

        let metadata = MetadataStore::new(db.clone())?;
        let snapshots = SnapshotStorage::new(db.clone())?;
        let manifest = ManifestStorage::new(db.clone())?;

        Ok(Self {
            db,
            metadata,
            snapshots,
            manifest,
        })
    }

    /// Get a reference to the underlying database
    pub fn get_db(&self) -> Arc<Database> {
        self.db.clone()
    }
}
