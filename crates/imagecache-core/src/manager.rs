//! Public façade of the image cache.

use imagecache_storage::time_utils::now_ms;
use imagecache_storage::{CacheEntry, IndexManifest, Storage, UsageAgePredicate, VectorIndex};
use imagecache_traits::{
    CacheError, EmbeddingProvider, FileReference, FileStore, ImageGenerator, Result,
};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::coordinator::{GenerationCoordinator, GenerationOutcome};
use crate::decision::{CacheDecisionEngine, Decision};
use crate::models::{
    CacheStats, CleanupReport, ImageRequest, ImageResult, LookupOutcome, OpenReport,
    SnapshotStatus,
};
use crate::snapshot::SnapshotWriter;
use crate::stores::CacheStores;

enum QueryEmbedding {
    Ready(Vec<f32>),
    Unavailable(String),
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    provider_failures: AtomicU64,
}

/// Semantic image cache.
///
/// Construct one per process with [`CacheManager::open`] and share it by
/// reference (`Arc`) between workers.
pub struct CacheManager {
    config: CacheConfig,
    storage: Arc<Storage>,
    stores: CacheStores,
    decision: CacheDecisionEngine,
    coordinator: GenerationCoordinator,
    embedding: Arc<dyn EmbeddingProvider>,
    file_store: Arc<dyn FileStore>,
    counters: Counters,
    open_report: OpenReport,
}

impl CacheManager {
    /// Open the cache: check the index manifest, restore the index snapshot
    /// and reconcile it with the metadata store.
    ///
    /// Fails with `CacheError::DimensionMismatch` when the configured or
    /// provided dimensionality differs from the persisted index; the cache
    /// must be purged before it can be used with a new dimension. A corrupt
    /// snapshot does not fail the open.
    pub fn open(
        config: CacheConfig,
        storage: Arc<Storage>,
        embedding: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn ImageGenerator>,
        file_store: Arc<dyn FileStore>,
    ) -> Result<Self> {
        config.validate()?;
        if embedding.dimension() != config.dimension {
            return Err(CacheError::DimensionMismatch {
                expected: config.dimension,
                actual: embedding.dimension(),
            });
        }
        storage
            .manifest
            .ensure(config.dimension, embedding.model_name())?;

        let index = Arc::new(VectorIndex::new(config.dimension));
        let snapshots = SnapshotWriter::new(
            index.clone(),
            storage.snapshots.clone(),
            config.snapshot_on_write,
        );
        let stores = CacheStores::new(index.clone(), storage.metadata.clone(), snapshots);
        let open_report = reconcile(&stores, &storage)?;

        let decision = CacheDecisionEngine::new(
            index,
            storage.metadata.clone(),
            config.similarity_threshold,
            config.top_k,
        );
        let coordinator = GenerationCoordinator::new(
            stores.clone(),
            decision.clone(),
            generator,
            file_store.clone(),
        );

        info!(
            dimension = config.dimension,
            model = %embedding.model_name(),
            entries = stores.index.len(),
            restored = open_report.restored,
            repopulated = open_report.repopulated,
            orphans_removed = open_report.orphans_removed,
            "Image cache opened"
        );

        Ok(Self {
            config,
            storage,
            stores,
            decision,
            coordinator,
            embedding,
            file_store,
            counters: Counters::default(),
            open_report,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// What happened while opening.
    pub fn open_report(&self) -> &OpenReport {
        &self.open_report
    }

    /// Return a cached image close enough to `request`, or generate one.
    ///
    /// Embedding provider failures degrade to a miss: the image is still
    /// generated (deduplicated as usual) but not cached. Only generation
    /// failures and dimension mismatches are returned as errors.
    pub async fn resolve(&self, request: &ImageRequest) -> Result<ImageResult> {
        let embedding = match self.embed_query(&request.prompt).await? {
            QueryEmbedding::Ready(embedding) => Some(embedding),
            QueryEmbedding::Unavailable(_) => None,
        };

        if let Some(embedding) = embedding.as_deref() {
            match self.try_hit(embedding, &request.tags).await {
                Ok(Some(result)) => return Ok(result),
                Ok(None) => {}
                Err(e @ CacheError::DimensionMismatch { .. }) => return Err(e),
                Err(e) => warn!(error = %e, "Cache lookup failed, treating as miss"),
            }
        }

        // A reused entry can be removed before its usage is recorded. Each
        // retry decides again without it; the last attempt skips reuse.
        let attempts = self.decision.top_k();
        for attempt in 0..=attempts {
            let query = if attempt < attempts { embedding.clone() } else { None };
            let outcome = self.coordinator.resolve_or_generate(request, query).await;

            match outcome {
                Ok(GenerationOutcome::Reused { entry, score }) => {
                    if let Some(result) = self.record_reuse(&entry, score) {
                        return Ok(result);
                    }
                }
                Ok(GenerationOutcome::Generated { entry }) => {
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    return Ok(ImageResult::generated(&entry));
                }
                Ok(GenerationOutcome::Uncached { file_reference }) => {
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    return Ok(ImageResult::uncached(file_reference));
                }
                Err(e) => {
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, prompt = %request.prompt, "Image generation failed");
                    return Err(e);
                }
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        Err(CacheError::Generation(format!(
            "reused entries kept disappearing for prompt: {}",
            request.prompt
        )))
    }

    /// Record a hit on an entry the coordinator reused. `None` when the
    /// entry is gone or its usage could not be written.
    fn record_reuse(&self, entry: &CacheEntry, score: f32) -> Option<ImageResult> {
        match self.stores.metadata.update_usage(&entry.id, now_ms()) {
            Ok(Some(updated)) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(ImageResult::hit(&updated, score))
            }
            Ok(None) => {
                debug!(entry_id = %entry.id, "Reused entry was removed concurrently");
                None
            }
            Err(e) => {
                warn!(entry_id = %entry.id, error = %e, "Failed to record usage of reused entry");
                None
            }
        }
    }

    /// Decide hit or miss for `request` without recording usage or
    /// generating anything.
    pub async fn lookup(&self, request: &ImageRequest) -> Result<LookupOutcome> {
        let embedding = match self.embed_query(&request.prompt).await? {
            QueryEmbedding::Ready(embedding) => embedding,
            QueryEmbedding::Unavailable(reason) => {
                return Ok(LookupOutcome::ProviderUnavailable(reason));
            }
        };

        Ok(match self.decision.decide(&embedding, &request.tags)? {
            Decision::Hit { entry, score } => LookupOutcome::Hit { entry, score },
            Decision::Miss => LookupOutcome::Miss,
        })
    }

    /// Register an image produced outside the cache. Returns the entry id.
    pub async fn add_image(
        &self,
        request: &ImageRequest,
        file_reference: FileReference,
    ) -> Result<String> {
        let embedding = self.embed(&request.prompt).await?;
        let entry = CacheEntry::new(request.prompt.clone(), embedding, file_reference)
            .with_tags(request.tags.iter().cloned())
            .with_style(request.style.clone());
        self.insert_entry(entry).await
    }

    /// Commit a fully formed entry. Its file must exist.
    pub async fn insert_entry(&self, entry: CacheEntry) -> Result<String> {
        if entry.embedding.len() != self.config.dimension {
            return Err(CacheError::DimensionMismatch {
                expected: self.config.dimension,
                actual: entry.embedding.len(),
            });
        }
        if !self.file_store.exists(&entry.file_reference).await? {
            return Err(CacheError::NotFound(format!(
                "file {} does not exist",
                entry.file_reference
            )));
        }

        self.stores.commit(&entry).await?;
        self.stores.snapshots.after_write();
        info!(entry_id = %entry.id, file = %entry.file_reference, "Added image to cache");
        Ok(entry.id)
    }

    /// Remove one entry and request deletion of its file.
    ///
    /// Returns `false` when no such entry exists.
    pub async fn invalidate(&self, id: &str) -> Result<bool> {
        let Some(entry) = self.stores.remove(id).await? else {
            return Ok(false);
        };
        self.delete_file(&entry.file_reference).await;
        self.stores.snapshots.after_write();
        info!(entry_id = %id, "Invalidated cache entry");
        Ok(true)
    }

    pub fn get_entry(&self, id: &str) -> Result<Option<CacheEntry>> {
        Ok(self.stores.metadata.get(id)?)
    }

    /// All entries, most recently created first.
    pub fn list_entries(&self) -> Result<Vec<CacheEntry>> {
        Ok(self.stores.metadata.list()?)
    }

    /// Remove entries with `usage_count <= min_usage` that are at least
    /// `days_old` days old.
    pub async fn cleanup(&self, min_usage: u64, days_old: u32) -> Result<CleanupReport> {
        self.cleanup_at(min_usage, days_old, now_ms()).await
    }

    /// `cleanup` against an explicit clock.
    ///
    /// Matching ids are collected first; each is then removed only if it
    /// still matches, so an entry reused in between survives. File deletion
    /// failures are logged and counted but do not stop the cleanup.
    pub async fn cleanup_at(
        &self,
        min_usage: u64,
        days_old: u32,
        now_ms: i64,
    ) -> Result<CleanupReport> {
        let predicate = UsageAgePredicate::new(min_usage, days_old, now_ms);
        let candidates = self
            .stores
            .metadata
            .find(|entry| predicate.matches(entry))?;

        let mut report = CleanupReport::default();
        for candidate in candidates {
            match self.stores.remove_if(&candidate.id, &predicate).await? {
                Some(entry) => {
                    report.removed_count += 1;
                    if !self.delete_file(&entry.file_reference).await {
                        report.file_delete_failures += 1;
                    }
                    debug!(entry_id = %entry.id, usage = entry.usage_count, "Removed cache entry");
                }
                None => {
                    debug!(entry_id = %candidate.id, "Entry no longer matches cleanup predicate");
                }
            }
        }

        if report.removed_count > 0 {
            self.stores.snapshots.after_write();
        }
        info!(
            removed = report.removed_count,
            file_delete_failures = report.file_delete_failures,
            min_usage,
            days_old,
            "Cache cleanup finished"
        );
        Ok(report)
    }

    /// Cleanup with the configured defaults.
    pub async fn cleanup_default(&self) -> Result<CleanupReport> {
        self.cleanup(self.config.cleanup_min_usage, self.config.cleanup_days_old)
            .await
    }

    /// Remove every entry and its file and reset the index manifest.
    pub async fn purge(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in self.stores.metadata.list()? {
            if let Some(entry) = self.stores.remove(&entry.id).await? {
                self.delete_file(&entry.file_reference).await;
                removed += 1;
            }
        }
        for id in self.stores.index.ids() {
            self.stores.remove(&id).await?;
        }

        self.stores.snapshots.flush().await;
        self.stores.snapshots.clear()?;
        self.storage.manifest.set(&IndexManifest::new(
            self.config.dimension,
            self.embedding.model_name(),
        ))?;
        info!(removed, "Purged image cache");
        Ok(removed)
    }

    /// Persist the vector index snapshot now. Returns the number of vectors
    /// written.
    pub fn save_snapshot(&self) -> Result<usize> {
        self.stores.snapshots.save()
    }

    /// Wait for snapshot saves queued by earlier writes to reach storage.
    pub async fn flush_snapshots(&self) {
        self.stores.snapshots.flush().await;
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        Ok(CacheStats {
            total_entries: self.stores.metadata.count()?,
            total_usage: self.stores.metadata.total_usage()?,
            hits,
            misses,
            generations: self.coordinator.generation_count(),
            provider_failures: self.counters.provider_failures.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            index_size: self.stores.index.len(),
        })
    }

    /// Accept the best hit, invalidating stale entries (file gone) and
    /// retrying up to `top_k` times.
    async fn try_hit(
        &self,
        embedding: &[f32],
        tags: &BTreeSet<String>,
    ) -> Result<Option<ImageResult>> {
        for _ in 0..self.decision.top_k() {
            let (entry, score) = match self.decision.decide(embedding, tags)? {
                Decision::Hit { entry, score } => (entry, score),
                Decision::Miss => return Ok(None),
            };

            match self.file_store.exists(&entry.file_reference).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(
                        entry_id = %entry.id,
                        file = %entry.file_reference,
                        "Cached image file is missing, invalidating entry"
                    );
                    self.stores.remove(&entry.id).await?;
                    self.stores.snapshots.after_write();
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, file = %entry.file_reference, "Could not check cached image file");
                    return Ok(None);
                }
            }

            return match self.stores.metadata.update_usage(&entry.id, now_ms())? {
                Some(updated) => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(entry_id = %updated.id, score, usage = updated.usage_count, "Cache hit");
                    Ok(Some(ImageResult::hit(&updated, score)))
                }
                None => {
                    debug!(entry_id = %entry.id, "Hit entry was removed concurrently");
                    Ok(None)
                }
            };
        }
        Ok(None)
    }

    /// Embed a prompt, checking dimension and finiteness.
    async fn embed(&self, prompt: &str) -> Result<Vec<f32>> {
        let embedding = self.embedding.embed(prompt).await?;
        if embedding.len() != self.config.dimension {
            return Err(CacheError::DimensionMismatch {
                expected: self.config.dimension,
                actual: embedding.len(),
            });
        }
        if embedding.iter().any(|value| !value.is_finite()) {
            return Err(CacheError::InvalidEmbedding(
                "provider returned NaN or infinite values".to_string(),
            ));
        }
        Ok(embedding)
    }

    /// Embed a query prompt. Anything but a dimension mismatch counts as the
    /// provider being unavailable.
    async fn embed_query(&self, prompt: &str) -> Result<QueryEmbedding> {
        match self.embed(prompt).await {
            Ok(embedding) => Ok(QueryEmbedding::Ready(embedding)),
            Err(e @ CacheError::DimensionMismatch { .. }) => Err(e),
            Err(e) => {
                self.counters
                    .provider_failures
                    .fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Embedding provider unavailable, bypassing cache");
                Ok(QueryEmbedding::Unavailable(e.to_string()))
            }
        }
    }

    /// Best-effort file deletion. Returns false (and logs) on failure.
    async fn delete_file(&self, reference: &FileReference) -> bool {
        match self.file_store.delete(reference).await {
            Ok(_) => true,
            Err(e) => {
                warn!(file = %reference, error = %e, "Failed to delete cached image file");
                false
            }
        }
    }
}

/// Restore the snapshot and make index and metadata agree.
fn reconcile(stores: &CacheStores, storage: &Storage) -> Result<OpenReport> {
    let (restored, snapshot_status) = match storage.snapshots.load() {
        Ok(Some(bytes)) => match stores.index.restore(&bytes) {
            Ok(count) => (count, SnapshotStatus::Restored),
            Err(e) => {
                warn!(error = %e, "Discarding index snapshot, starting with an empty index");
                (0, SnapshotStatus::Discarded { reason: e.to_string() })
            }
        },
        Ok(None) => (0, SnapshotStatus::Missing),
        Err(e) => {
            warn!(error = %e, "Could not read index snapshot, starting with an empty index");
            (0, SnapshotStatus::Discarded { reason: e.to_string() })
        }
    };

    let mut records = stores.metadata.list()?;
    records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    let known: HashSet<&str> = records.iter().map(|record| record.id.as_str()).collect();

    let mut orphans_removed = 0;
    for id in stores.index.ids() {
        if !known.contains(id.as_str()) {
            stores.index.remove(&id);
            orphans_removed += 1;
        }
    }

    let mut repopulated = 0;
    for record in &records {
        if stores.index.contains(&record.id) {
            continue;
        }
        match stores.index.insert(&record.id, record.embedding.clone()) {
            Ok(()) => repopulated += 1,
            Err(e) => {
                warn!(entry_id = %record.id, error = %e, "Dropping record with unusable embedding");
                stores.metadata.delete(&record.id)?;
                orphans_removed += 1;
            }
        }
    }

    if repopulated > 0 || orphans_removed > 0 {
        stores.snapshots.after_write();
    }

    Ok(OpenReport {
        restored,
        repopulated,
        orphans_removed,
        snapshot_status,
    })
}

/// Delete every entry, its file, the index snapshot and the manifest
/// without opening the cache.
///
/// This is the way out of a `DimensionMismatch`: the next open creates a
/// manifest for the configured dimension.
pub async fn purge_storage(storage: &Storage, file_store: &dyn FileStore) -> Result<usize> {
    let entries = storage.metadata.list()?;
    for entry in &entries {
        if let Err(e) = file_store.delete(&entry.file_reference).await {
            warn!(file = %entry.file_reference, error = %e, "Failed to delete cached image file");
        }
    }
    let removed = storage.metadata.clear()?;
    storage.snapshots.clear()?;
    storage.manifest.clear()?;
    info!(removed, "Purged image cache storage");
    Ok(removed)
}
