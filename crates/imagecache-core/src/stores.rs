//! The single write path into the vector index and metadata store.

use imagecache_storage::{CacheEntry, MetadataStore, UsageAgePredicate, VectorIndex};
use imagecache_traits::Result;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::locks::EntryLocks;
use crate::snapshot::SnapshotWriter;

/// Index, metadata and snapshot handles shared by the coordinator and the
/// manager.
///
/// Every mutation of either store goes through `commit`, `remove` or
/// `remove_if`, each holding the per-id lock, so an id is never present in
/// one store without the other once the call returns.
#[derive(Clone)]
pub struct CacheStores {
    pub index: Arc<VectorIndex>,
    pub metadata: MetadataStore,
    pub snapshots: SnapshotWriter,
    locks: Arc<EntryLocks>,
}

impl CacheStores {
    pub fn new(index: Arc<VectorIndex>, metadata: MetadataStore, snapshots: SnapshotWriter) -> Self {
        Self {
            index,
            metadata,
            snapshots,
            locks: Arc::new(EntryLocks::new()),
        }
    }

    /// Two-step commit: index first, then metadata. A failed metadata write
    /// rolls the index insert back.
    pub async fn commit(&self, entry: &CacheEntry) -> Result<()> {
        let _guard = self.locks.lock(&entry.id).await;

        self.index.insert(&entry.id, entry.embedding.clone())?;
        if let Err(e) = self.metadata.put(entry) {
            self.index.remove(&entry.id);
            warn!(entry_id = %entry.id, error = %e, "Metadata write failed, rolled back index insert");
            return Err(e.into());
        }

        debug!(entry_id = %entry.id, file = %entry.file_reference, "Committed cache entry");
        Ok(())
    }

    /// Remove an entry from both stores. Returns the removed record.
    pub async fn remove(&self, id: &str) -> Result<Option<CacheEntry>> {
        let _guard = self.locks.lock(id).await;

        let entry = self.metadata.get(id)?;
        self.metadata.delete(id)?;
        let had_vector = self.index.remove(id);

        if entry.is_some() || had_vector {
            debug!(entry_id = %id, "Removed cache entry");
        }
        Ok(entry)
    }

    /// Remove an entry only if it still matches `predicate`.
    ///
    /// The predicate is re-evaluated inside the metadata transaction, so an
    /// entry reused since it was selected survives.
    pub async fn remove_if(
        &self,
        id: &str,
        predicate: &UsageAgePredicate,
    ) -> Result<Option<CacheEntry>> {
        let _guard = self.locks.lock(id).await;

        let removed = self.metadata.delete_if(id, predicate)?;
        if removed.is_some() {
            self.index.remove(id);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imagecache_storage::Storage;
    use imagecache_traits::FileReference;
    use tempfile::tempdir;

    fn setup() -> (CacheStores, Storage, tempfile::TempDir) {
        let temp_dir = tempdir().unwrap();
        let storage = Storage::new(temp_dir.path().join("test.db")).unwrap();
        let index = Arc::new(VectorIndex::new(2));
        let snapshots = SnapshotWriter::new(index.clone(), storage.snapshots.clone(), false);
        let stores = CacheStores::new(index, storage.metadata.clone(), snapshots);
        (stores, storage, temp_dir)
    }

    fn entry(embedding: Vec<f32>) -> CacheEntry {
        CacheEntry::new("prompt".into(), embedding, FileReference::new("a.jpg"))
    }

    #[tokio::test]
    async fn test_commit_writes_both_stores() {
        let (stores, _storage, _temp_dir) = setup();
        let entry = entry(vec![1.0, 0.0]);
        stores.commit(&entry).await.unwrap();

        assert!(stores.index.contains(&entry.id));
        assert_eq!(stores.metadata.get(&entry.id).unwrap(), Some(entry));
    }

    #[tokio::test]
    async fn test_commit_rejects_wrong_dimension_without_partial_state() {
        let (stores, _storage, _temp_dir) = setup();
        let entry = entry(vec![1.0, 0.0, 0.0]);

        assert!(stores.commit(&entry).await.is_err());
        assert!(stores.index.is_empty());
        assert_eq!(stores.metadata.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_metadata_write_rolls_back_index() {
        let (stores, storage, _temp_dir) = setup();

        // Swap the entry table for one with other key/value types so every
        // metadata write fails after the index insert succeeded.
        let db = storage.get_db();
        let write_txn = db.begin_write().unwrap();
        write_txn
            .delete_table(redb::TableDefinition::<&str, &[u8]>::new("cache_entries"))
            .unwrap();
        write_txn
            .open_table(redb::TableDefinition::<u64, u64>::new("cache_entries"))
            .unwrap();
        write_txn.commit().unwrap();

        let entry = entry(vec![1.0, 0.0]);
        assert!(stores.commit(&entry).await.is_err());
        assert!(!stores.index.contains(&entry.id));
        assert!(stores.index.is_empty());
    }

    #[tokio::test]
    async fn test_remove_clears_both_stores() {
        let (stores, _storage, _temp_dir) = setup();
        let entry = entry(vec![1.0, 0.0]);
        stores.commit(&entry).await.unwrap();

        let removed = stores.remove(&entry.id).await.unwrap();
        assert_eq!(removed.map(|e| e.id), Some(entry.id.clone()));
        assert!(!stores.index.contains(&entry.id));
        assert!(stores.metadata.get(&entry.id).unwrap().is_none());

        assert!(stores.remove(&entry.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_if_keeps_reused_entry() {
        let (stores, _storage, _temp_dir) = setup();
        let entry = entry(vec![1.0, 0.0]).with_created_at(0);
        stores.commit(&entry).await.unwrap();
        let predicate = UsageAgePredicate::new(0, 1, 10 * imagecache_storage::time_utils::DAY_MS);

        stores.metadata.update_usage(&entry.id, 1).unwrap();
        assert!(stores.remove_if(&entry.id, &predicate).await.unwrap().is_none());
        assert!(stores.index.contains(&entry.id));
    }
}
