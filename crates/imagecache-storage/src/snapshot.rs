//! Persisted vector index snapshots.

use anyhow::Result;
use redb::{Database, ReadableDatabase, TableDefinition};
use std::sync::Arc;

use crate::record_table::init_table;

const SNAPSHOT_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("index_snapshot");
const CURRENT_KEY: &str = "current";

/// Stores the latest encoded `VectorIndex` snapshot.
#[derive(Clone)]
pub struct SnapshotStorage {
    db: Arc<Database>,
}

impl SnapshotStorage {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        init_table(&db, SNAPSHOT_TABLE)?;
        Ok(Self { db })
    }

    /// Replace the stored snapshot.
    pub fn save(&self, bytes: &[u8]) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SNAPSHOT_TABLE)?;
            table.insert(CURRENT_KEY, bytes)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load the stored snapshot, if any.
    pub fn load(&self) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SNAPSHOT_TABLE)?;
        Ok(table.get(CURRENT_KEY)?.map(|value| value.value().to_vec()))
    }

    /// Remove the stored snapshot. Returns true if one existed.
    pub fn clear(&self) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(SNAPSHOT_TABLE)?;
            table.remove(CURRENT_KEY)?.is_some()
        };
        write_txn.commit()?;
        Ok(existed)
    }
}
