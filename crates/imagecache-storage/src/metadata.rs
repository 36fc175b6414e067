//! Metadata store - one record per cache entry.
//!
//! # Tables
//!
//! - `cache_entries`: entry_id -> CacheEntry (bincode)

use anyhow::Result;
use redb::{Database, TableDefinition};
use std::sync::Arc;

use crate::entry::CacheEntry;
use crate::record_table::{RecordTable, init_table};
use crate::time_utils::days_to_ms;

const CACHE_ENTRY_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("cache_entries");

/// Eviction predicate used by cleanup: low usage and old enough.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageAgePredicate {
    /// Entries with `usage_count <= max_usage` qualify
    pub max_usage: u64,
    /// Entries at least this old qualify
    pub min_age_ms: i64,
    /// Reference time for age computation
    pub now_ms: i64,
}

impl UsageAgePredicate {
    pub fn new(max_usage: u64, days_old: u32, now_ms: i64) -> Self {
        Self {
            max_usage,
            min_age_ms: days_to_ms(days_old),
            now_ms,
        }
    }

    pub fn matches(&self, entry: &CacheEntry) -> bool {
        entry.usage_count <= self.max_usage && entry.age_ms(self.now_ms) >= self.min_age_ms
    }
}

/// Metadata store for cache entries.
#[derive(Clone)]
pub struct MetadataStore {
    db: Arc<Database>,
}

impl RecordTable for MetadataStore {
    type Record = CacheEntry;

    const TABLE: TableDefinition<'static, &'static str, &'static [u8]> = CACHE_ENTRY_TABLE;

    fn db(&self) -> &Arc<Database> {
        &self.db
    }
}

impl MetadataStore {
    /// Create a new MetadataStore instance
    pub fn new(db: Arc<Database>) -> Result<Self> {
        init_table(&db, CACHE_ENTRY_TABLE)?;
        Ok(Self { db })
    }

    /// Store an entry record, replacing any record with the same ID.
    pub fn put(&self, entry: &CacheEntry) -> Result<()> {
        self.put_record(&entry.id, entry)
    }

    /// Get an entry by ID
    pub fn get(&self, id: &str) -> Result<Option<CacheEntry>> {
        self.get_record(id)
    }

    /// Delete an entry, returns true if it existed
    pub fn delete(&self, id: &str) -> Result<bool> {
        self.remove_record(id)
    }

    /// Delete an entry only if `predicate` still matches its current state.
    pub fn delete_if(&self, id: &str, predicate: &UsageAgePredicate) -> Result<Option<CacheEntry>> {
        self.remove_record_if(id, |entry| predicate.matches(entry))
    }

    /// Atomically increment `usage_count` and set `last_used_at`.
    ///
    /// Returns `None` when the entry was deleted concurrently; that case is
    /// a silent no-op.
    pub fn update_usage(&self, id: &str, now_ms: i64) -> Result<Option<CacheEntry>> {
        self.update_record(id, |entry| entry.touch(now_ms))
    }

    /// All entries matching `predicate`.
    pub fn find<P>(&self, predicate: P) -> Result<Vec<CacheEntry>>
    where
        P: Fn(&CacheEntry) -> bool,
    {
        Ok(self
            .list_records()?
            .into_iter()
            .map(|(_, entry)| entry)
            .filter(|entry| predicate(entry))
            .collect())
    }

    /// All entries, most recently created first.
    pub fn list(&self) -> Result<Vec<CacheEntry>> {
        let mut entries = self.find(|_| true)?;
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }

    pub fn contains(&self, id: &str) -> Result<bool> {
        self.contains_record(id)
    }

    pub fn count(&self) -> Result<usize> {
        self.count_records()
    }

    /// Sum of usage counts over all entries.
    pub fn total_usage(&self) -> Result<u64> {
        Ok(self
            .list_records()?
            .iter()
            .map(|(_, entry)| entry.usage_count)
            .sum())
    }

    /// Delete all entries, returning how many were removed.
    pub fn clear(&self) -> Result<usize> {
        self.clear_records()
    }
}
