//! Per-entry write locks.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Serializes index/metadata mutations for one entry id while letting
/// unrelated ids proceed concurrently.
#[derive(Default)]
pub struct EntryLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl EntryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`.
    pub async fn lock(&self, id: &str) -> EntryGuard {
        let lock = self
            .locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        EntryGuard {
            guard: Some(guard),
            id: id.to_string(),
            locks: self.locks.clone(),
        }
    }

    /// Number of ids currently holding a lock slot.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

pub struct EntryGuard {
    guard: Option<OwnedMutexGuard<()>>,
    id: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl Drop for EntryGuard {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
