//! Generation deduplication and commit of new cache entries.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use imagecache_storage::CacheEntry;
use imagecache_traits::{
    CacheError, FileReference, FileStore, GeneratedImage, ImageGenerator, Result,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use crate::decision::{CacheDecisionEngine, Decision};
use crate::models::ImageRequest;
use crate::stores::CacheStores;

/// What a generation job produced.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    /// An equivalent entry was committed before the job started; nothing was
    /// generated.
    Reused { entry: CacheEntry, score: f32 },
    /// A new image was generated and committed.
    Generated { entry: CacheEntry },
    /// A new image was generated but not cached (no embedding, or the commit
    /// failed).
    Uncached { file_reference: FileReference },
}

type PendingGeneration = Shared<BoxFuture<'static, Result<GenerationOutcome>>>;

/// Deduplicates concurrent generation for requests with the same
/// normalization key.
///
/// Each job runs on its own task: callers that stop waiting do not cancel
/// it, and its result is still committed for everyone else attached.
#[derive(Clone)]
pub struct GenerationCoordinator {
    stores: CacheStores,
    decision: CacheDecisionEngine,
    generator: Arc<dyn ImageGenerator>,
    file_store: Arc<dyn FileStore>,
    in_flight: Arc<DashMap<String, PendingGeneration>>,
    generations: Arc<AtomicU64>,
}

impl GenerationCoordinator {
    pub fn new(
        stores: CacheStores,
        decision: CacheDecisionEngine,
        generator: Arc<dyn ImageGenerator>,
        file_store: Arc<dyn FileStore>,
    ) -> Self {
        Self {
            stores,
            decision,
            generator,
            file_store,
            in_flight: Arc::new(DashMap::new()),
            generations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Generate (and, with an embedding, commit) an image for `request`, or
    /// wait for the generation already running for the same key.
    pub async fn resolve_or_generate(
        &self,
        request: &ImageRequest,
        embedding: Option<Vec<f32>>,
    ) -> Result<GenerationOutcome> {
        let key = request.normalization_key();
        let pending = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(existing) => {
                debug!(key = %key, "Attaching to in-flight generation");
                existing.get().clone()
            }
            Entry::Vacant(slot) => {
                let pending = self.spawn_generation(key, request.clone(), embedding);
                slot.insert(pending.clone());
                pending
            }
        };
        pending.await
    }

    /// Number of image generator invocations since startup.
    pub fn generation_count(&self) -> u64 {
        self.generations.load(Ordering::Relaxed)
    }

    /// Number of keys with a generation currently running.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    fn spawn_generation(
        &self,
        key: String,
        request: ImageRequest,
        embedding: Option<Vec<f32>>,
    ) -> PendingGeneration {
        let coordinator = self.clone();
        let handle = tokio::spawn(async move {
            let in_flight = coordinator.in_flight.clone();
            let _guard = scopeguard::guard(key, move |key| {
                in_flight.remove(&key);
            });
            coordinator.run(&request, embedding).await
        });

        async move {
            handle.await.unwrap_or_else(|e| {
                Err(CacheError::Generation(format!("generation task failed: {e}")))
            })
        }
        .boxed()
        .shared()
    }

    async fn run(
        &self,
        request: &ImageRequest,
        embedding: Option<Vec<f32>>,
    ) -> Result<GenerationOutcome> {
        // A job for this key may have committed between the caller's miss and now.
        if let Some(embedding) = embedding.as_deref()
            && let Ok(Decision::Hit { entry, score }) =
                self.decision.decide(embedding, &request.tags)
            && self
                .file_store
                .exists(&entry.file_reference)
                .await
                .unwrap_or(false)
        {
            debug!(entry_id = %entry.id, score, "Equivalent entry already committed");
            return Ok(GenerationOutcome::Reused { entry, score });
        }

        self.generations.fetch_add(1, Ordering::Relaxed);
        info!(prompt = %request.prompt, style = ?request.style, "Generating image");

        let generated = self
            .generator
            .generate(&request.prompt, request.style.as_deref())
            .await
            .map_err(|e| match e {
                CacheError::Generation(_) => e,
                other => CacheError::Generation(other.to_string()),
            })?;
        let file_reference = match generated {
            GeneratedImage::Bytes(bytes) => self.file_store.save(&bytes).await?,
            GeneratedImage::Stored(reference) => reference,
        };
        if !self.file_store.exists(&file_reference).await? {
            return Err(CacheError::Generation(format!(
                "generated file {} does not exist",
                file_reference
            )));
        }

        let Some(embedding) = embedding else {
            info!(file = %file_reference, "Generated image without caching it");
            return Ok(GenerationOutcome::Uncached { file_reference });
        };

        let entry = CacheEntry::new(request.prompt.clone(), embedding, file_reference.clone())
            .with_tags(request.tags.iter().cloned())
            .with_style(request.style.clone());

        match self.stores.commit(&entry).await {
            Ok(()) => {
                self.stores.snapshots.after_write();
                info!(entry_id = %entry.id, file = %file_reference, "Cached generated image");
                Ok(GenerationOutcome::Generated { entry })
            }
            Err(e) => {
                warn!(error = %e, file = %file_reference, "Failed to cache generated image");
                Ok(GenerationOutcome::Uncached { file_reference })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotWriter;
    use crate::testkit::{CountingGenerator, MemoryFileStore};
    use imagecache_storage::{Storage, VectorIndex};
    use std::time::Duration;
    use tempfile::tempdir;

    struct Fixture {
        coordinator: GenerationCoordinator,
        stores: CacheStores,
        generator: Arc<CountingGenerator>,
        files: Arc<MemoryFileStore>,
        _storage: Storage,
        _temp_dir: tempfile::TempDir,
    }

    fn fixture(delay_ms: u64) -> Fixture {
        let temp_dir = tempdir().unwrap();
        let storage = Storage::new(temp_dir.path().join("test.db")).unwrap();
        let index = Arc::new(VectorIndex::new(2));
        let snapshots = SnapshotWriter::new(index.clone(), storage.snapshots.clone(), true);
        let stores = CacheStores::new(index.clone(), storage.metadata.clone(), snapshots);
        let decision = CacheDecisionEngine::new(index, storage.metadata.clone(), 0.85, 5);
        let generator = Arc::new(CountingGenerator::new(delay_ms));
        let files = Arc::new(MemoryFileStore::new());
        let coordinator =
            GenerationCoordinator::new(stores.clone(), decision, generator.clone(), files.clone());
        Fixture {
            coordinator,
            stores,
            generator,
            files,
            _storage: storage,
            _temp_dir: temp_dir,
        }
    }

    #[tokio::test]
    async fn test_generates_and_commits() {
        let fx = fixture(0);
        let request = ImageRequest::new("a dark forest").with_tags(["forest"]);

        let outcome = fx
            .coordinator
            .resolve_or_generate(&request, Some(vec![1.0, 0.0]))
            .await
            .unwrap();

        let GenerationOutcome::Generated { entry } = outcome else {
            panic!("expected a generated entry, got {outcome:?}");
        };
        assert_eq!(entry.usage_count, 0);
        assert!(fx.stores.index.contains(&entry.id));
        assert!(fx.stores.metadata.get(&entry.id).unwrap().is_some());
        assert!(fx.files.contains(&entry.file_reference));
        assert_eq!(fx.generator.call_count(), 1);
        assert_eq!(fx.coordinator.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_without_embedding_nothing_is_committed() {
        let fx = fixture(0);
        let request = ImageRequest::new("a dark forest");

        let outcome = fx.coordinator.resolve_or_generate(&request, None).await.unwrap();

        assert!(matches!(outcome, GenerationOutcome::Uncached { .. }));
        assert!(fx.stores.index.is_empty());
        assert_eq!(fx.stores.metadata.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_generation_failure_commits_nothing() {
        let fx = fixture(0);
        fx.generator.set_failing(true);
        let request = ImageRequest::new("a dark forest");

        let err = fx
            .coordinator
            .resolve_or_generate(&request, Some(vec![1.0, 0.0]))
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::Generation(_)));
        assert!(fx.stores.index.is_empty());
        assert_eq!(fx.stores.metadata.count().unwrap(), 0);
        assert_eq!(fx.coordinator.in_flight_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_identical_requests_share_one_generation() {
        let fx = fixture(50);
        let request = ImageRequest::new("a dark forest").with_tags(["forest"]);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let coordinator = fx.coordinator.clone();
            let request = request.clone();
            handles.push(tokio::spawn(async move {
                coordinator
                    .resolve_or_generate(&request, Some(vec![1.0, 0.0]))
                    .await
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                GenerationOutcome::Generated { entry } => ids.push(entry.id),
                other => panic!("unexpected outcome: {other:?}"),
            }
        }

        assert_eq!(fx.generator.call_count(), 1);
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(fx.stores.metadata.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_late_request_reuses_committed_entry() {
        let fx = fixture(0);
        let request = ImageRequest::new("a dark forest");
        let first = fx
            .coordinator
            .resolve_or_generate(&request, Some(vec![1.0, 0.0]))
            .await
            .unwrap();
        let GenerationOutcome::Generated { entry } = first else {
            panic!("expected a generated entry");
        };

        let second = fx
            .coordinator
            .resolve_or_generate(&request, Some(vec![1.0, 0.0]))
            .await
            .unwrap();

        match second {
            GenerationOutcome::Reused { entry: reused, .. } => assert_eq!(reused.id, entry.id),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(fx.generator.call_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_abandoned_caller_does_not_cancel_generation() {
        let fx = fixture(100);
        let request = ImageRequest::new("a dark forest");

        let coordinator = fx.coordinator.clone();
        let caller = tokio::spawn(async move {
            coordinator
                .resolve_or_generate(&request, Some(vec![1.0, 0.0]))
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        caller.abort();

        for _ in 0..50 {
            if fx.stores.metadata.count().unwrap() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(fx.stores.metadata.count().unwrap(), 1);
        assert_eq!(fx.stores.index.len(), 1);
    }
}
