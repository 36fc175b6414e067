//! Writes vector index snapshots to storage.

use imagecache_storage::{SnapshotStorage, VectorIndex};
use imagecache_traits::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Persists the index after writes.
///
/// Encoding the index is O(entries x dimension), so snapshot-on-write runs
/// on the blocking pool and coalesces: writes that arrive while a save is
/// queued are covered by that save.
#[derive(Clone)]
pub struct SnapshotWriter {
    index: Arc<VectorIndex>,
    storage: SnapshotStorage,
    on_write: bool,
    write_lock: Arc<Mutex<()>>,
    queued: Arc<AtomicBool>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl SnapshotWriter {
    pub fn new(index: Arc<VectorIndex>, storage: SnapshotStorage, on_write: bool) -> Self {
        Self {
            index,
            storage,
            on_write,
            write_lock: Arc::new(Mutex::new(())),
            queued: Arc::new(AtomicBool::new(false)),
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Encode the index and replace the stored snapshot. Returns the number
    /// of vectors written.
    pub fn save(&self) -> Result<usize> {
        let _guard = self.write_lock.lock();
        let bytes = self.index.snapshot()?;
        self.storage.save(&bytes)?;
        let count = self.index.len();
        debug!(vectors = count, bytes = bytes.len(), "Saved index snapshot");
        Ok(count)
    }

    /// Queue a save after a mutation when snapshot-on-write is enabled.
    ///
    /// Outside a tokio runtime the save runs inline. Failures are logged
    /// only: the metadata store stays authoritative and the next open
    /// reconciles the index from it.
    pub fn after_write(&self) {
        if !self.on_write || self.queued.swap(true, Ordering::AcqRel) {
            return;
        }

        match Handle::try_current() {
            Ok(handle) => {
                let writer = self.clone();
                let task = handle.spawn_blocking(move || writer.save_queued());
                let mut tasks = self.tasks.lock();
                tasks.retain(|task| !task.is_finished());
                tasks.push(task);
            }
            Err(_) => self.save_queued(),
        }
    }

    /// Wait until every save queued so far has been written.
    pub async fn flush(&self) {
        loop {
            let tasks = std::mem::take(&mut *self.tasks.lock());
            if tasks.is_empty() {
                return;
            }
            for task in tasks {
                if let Err(e) = task.await {
                    warn!(error = %e, "Index snapshot task failed");
                }
            }
        }
    }

    pub fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.storage.clear()?;
        Ok(())
    }

    fn save_queued(&self) {
        // Cleared before encoding: a write landing after this point queues
        // its own save.
        self.queued.store(false, Ordering::Release);
        if let Err(e) = self.save() {
            warn!(error = %e, "Failed to persist index snapshot");
        }
    }
}
