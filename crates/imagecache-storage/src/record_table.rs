use anyhow::Result;
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Trait for tables holding one bincode-encoded record per string key.
///
/// Provides default implementations for CRUD plus the two read-modify-write
/// primitives the cache relies on (`update`, `remove_if`). Both run inside a
/// single redb write transaction; redb serializes write transactions, so
/// every operation on a key is linearizable.
pub trait RecordTable: Send + Sync {
    /// Record type stored in the table.
    type Record: Serialize + DeserializeOwned;

    /// The table definition for this storage type.
    const TABLE: TableDefinition<'static, &'static str, &'static [u8]>;

    /// Get reference to the database.
    fn db(&self) -> &Arc<Database>;

    /// Store a record, replacing any previous value.
    fn put_record(&self, id: &str, record: &Self::Record) -> Result<()> {
        let bytes = encode(record)?;
        let write_txn = self.db().begin_write()?;
        {
            let mut table = write_txn.open_table(Self::TABLE)?;
            table.insert(id, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Get a record by ID.
    fn get_record(&self, id: &str) -> Result<Option<Self::Record>> {
        let read_txn = self.db().begin_read()?;
        let table = read_txn.open_table(Self::TABLE)?;

        match table.get(id)? {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    /// List all records as (id, record) pairs in key order.
    fn list_records(&self) -> Result<Vec<(String, Self::Record)>> {
        let read_txn = self.db().begin_read()?;
        let table = read_txn.open_table(Self::TABLE)?;

        let mut items = Vec::new();
        for item in table.iter()? {
            let (key, value) = item?;
            items.push((key.value().to_string(), decode(value.value())?));
        }

        Ok(items)
    }

    /// Delete by ID, returns true if existed.
    fn remove_record(&self, id: &str) -> Result<bool> {
        let write_txn = self.db().begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(Self::TABLE)?;
            table.remove(id)?.is_some()
        };
        write_txn.commit()?;
        Ok(existed)
    }

    /// Apply `mutate` to the stored record and write it back atomically.
    ///
    /// Returns the updated record, or `None` (without writing) when the ID
    /// does not exist.
    fn update_record<F>(&self, id: &str, mutate: F) -> Result<Option<Self::Record>>
    where
        F: FnOnce(&mut Self::Record),
    {
        let write_txn = self.db().begin_write()?;
        let updated = {
            let mut table = write_txn.open_table(Self::TABLE)?;
            let existing = table.get(id)?.map(|value| value.value().to_vec());
            match existing {
                Some(bytes) => {
                    let mut record: Self::Record = decode(&bytes)?;
                    mutate(&mut record);
                    let encoded = encode(&record)?;
                    table.insert(id, encoded.as_slice())?;
                    Some(record)
                }
                None => None,
            }
        };
        write_txn.commit()?;
        Ok(updated)
    }

    /// Remove the record only if `should_remove` still holds for its
    /// current value. Returns the removed record.
    fn remove_record_if<F>(&self, id: &str, should_remove: F) -> Result<Option<Self::Record>>
    where
        F: FnOnce(&Self::Record) -> bool,
    {
        let write_txn = self.db().begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(Self::TABLE)?;
            let existing = table.get(id)?.map(|value| value.value().to_vec());
            match existing {
                Some(bytes) => {
                    let record: Self::Record = decode(&bytes)?;
                    if should_remove(&record) {
                        table.remove(id)?;
                        Some(record)
                    } else {
                        None
                    }
                }
                None => None,
            }
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// Check if ID exists.
    fn contains_record(&self, id: &str) -> Result<bool> {
        let read_txn = self.db().begin_read()?;
        let table = read_txn.open_table(Self::TABLE)?;
        Ok(table.get(id)?.is_some())
    }

    /// Count all records.
    fn count_records(&self) -> Result<usize> {
        let read_txn = self.db().begin_read()?;
        let table = read_txn.open_table(Self::TABLE)?;
        Ok(table.len()? as usize)
    }

    /// Delete every record, returning how many were removed.
    fn clear_records(&self) -> Result<usize> {
        let write_txn = self.db().begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(Self::TABLE)?;
            let mut keys = Vec::new();
            for item in table.iter()? {
                let (key, _) = item?;
                keys.push(key.value().to_string());
            }
            for key in &keys {
                table.remove(key.as_str())?;
            }
            keys.len()
        };
        write_txn.commit()?;
        Ok(removed)
    }
}

fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>> {
    Ok(bincode::serde::encode_to_vec(record, bincode::config::standard())?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (record, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(record)
}

/// Create `table` if it does not exist yet.
pub(crate) fn init_table(
    db: &Database,
    table: TableDefinition<'static, &'static str, &'static [u8]>,
) -> Result<()> {
    let write_txn = db.begin_write()?;
    write_txn.open_table(table)?;
    write_txn.commit()?;
    Ok(())
}
