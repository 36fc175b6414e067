//! End-to-end properties of `CacheManager` with scripted collaborators.

use std::sync::Arc;

use async_trait::async_trait;
use imagecache_core::testkit::{
    CountingGenerator, MemoryFileStore, ScriptedEmbedding, TEST_DIMENSION, axis,
    create_test_cache, test_config, vector_with_similarity,
};
use imagecache_core::{
    CacheEntry, CacheError, CacheManager, FileReference, FileStore, ImageRequest, ImageSource,
    LookupOutcome, SnapshotStatus, Storage, purge_storage,
};
use imagecache_storage::MetadataStore;
use imagecache_storage::time_utils::DAY_MS;
use parking_lot::Mutex;

const D: usize = TEST_DIMENSION;

#[tokio::test]
async fn similar_prompt_with_shared_tag_hits() {
    let cache = create_test_cache(test_config(), 0);
    cache.embedding.script("first prompt", axis(D));
    cache
        .embedding
        .script("second prompt", vector_with_similarity(D, 0.86));

    let first = cache
        .manager
        .resolve(&ImageRequest::new("first prompt").with_tags(["horror", "night"]))
        .await
        .unwrap();
    let second = cache
        .manager
        .resolve(&ImageRequest::new("second prompt").with_tags(["night"]))
        .await
        .unwrap();

    assert_eq!(second.source, ImageSource::Hit);
    assert_eq!(second.entry_id, first.entry_id);
    assert_eq!(cache.generator.call_count(), 1);
}

#[tokio::test]
async fn dissimilar_prompt_misses_despite_shared_tags() {
    let cache = create_test_cache(test_config(), 0);
    cache.embedding.script("first prompt", axis(D));
    cache
        .embedding
        .script("second prompt", vector_with_similarity(D, 0.84));

    let first = cache
        .manager
        .resolve(&ImageRequest::new("first prompt").with_tags(["horror"]))
        .await
        .unwrap();
    let second = cache
        .manager
        .resolve(&ImageRequest::new("second prompt").with_tags(["horror"]))
        .await
        .unwrap();

    assert_eq!(second.source, ImageSource::Generated);
    assert_ne!(second.entry_id, first.entry_id);
    assert_eq!(cache.generator.call_count(), 2);
}

#[tokio::test]
async fn similarity_exactly_at_threshold_hits() {
    let cache = create_test_cache(test_config(), 0);
    cache.embedding.script("first prompt", axis(D));
    // Norm 20 with a first component of 17: cosine with the axis is 0.85.
    let mut boundary = vec![0.0; D];
    boundary[..5].copy_from_slice(&[17.0, 10.0, 3.0, 1.0, 1.0]);
    cache.embedding.script("second prompt", boundary);

    let first = cache
        .manager
        .resolve(&ImageRequest::new("first prompt"))
        .await
        .unwrap();
    let second = cache
        .manager
        .resolve(&ImageRequest::new("second prompt"))
        .await
        .unwrap();

    assert_eq!(cache.manager.config().similarity_threshold, 0.85);
    assert_eq!(second.source, ImageSource::Hit);
    assert_eq!(second.entry_id, first.entry_id);
    assert_eq!(second.score, Some(0.85));
    assert_eq!(cache.generator.call_count(), 1);
}

#[tokio::test]
async fn usage_count_tracks_hits_on_one_entry_only() {
    let cache = create_test_cache(test_config(), 0);
    cache.embedding.script("target", axis(D));
    cache
        .embedding
        .script("bystander", vector_with_similarity(D, 0.0));

    let target = cache
        .manager
        .resolve(&ImageRequest::new("target"))
        .await
        .unwrap();
    let bystander = cache
        .manager
        .resolve(&ImageRequest::new("bystander"))
        .await
        .unwrap();

    for n in 0..5 {
        let prompt = format!("target variant {n}");
        cache
            .embedding
            .script(&prompt, vector_with_similarity(D, 0.95));
        let result = cache
            .manager
            .resolve(&ImageRequest::new(prompt))
            .await
            .unwrap();
        assert_eq!(result.source, ImageSource::Hit);
    }

    let target = cache
        .manager
        .get_entry(target.entry_id.as_deref().unwrap())
        .unwrap()
        .unwrap();
    let bystander = cache
        .manager
        .get_entry(bystander.entry_id.as_deref().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(target.usage_count, 5);
    assert!(target.last_used_at.is_some());
    assert_eq!(bystander.usage_count, 0);
    assert_eq!(bystander.last_used_at, None);
}

#[tokio::test]
async fn cleanup_removes_exactly_matching_entries_and_is_idempotent() {
    let cache = create_test_cache(test_config(), 0);
    let now = 100 * DAY_MS;

    // (label, usage, age in ms, expected removal)
    let cases = [
        ("unused-old", 0, 31 * DAY_MS, true),
        ("once-boundary", 1, 30 * DAY_MS, true),
        ("popular-old", 2, 40 * DAY_MS, false),
        ("unused-young", 0, 29 * DAY_MS, false),
        ("once-almost", 1, 30 * DAY_MS - 1, false),
    ];

    let mut ids = Vec::new();
    for (label, usage, age, _) in cases {
        let reference = cache.files.insert(format!("{label}.jpg"), vec![0xFF]);
        let entry = CacheEntry::new(label.to_string(), axis(D), reference)
            .with_usage_count(usage)
            .with_created_at(now - age);
        ids.push(cache.manager.insert_entry(entry).await.unwrap());
    }

    let report = cache.manager.cleanup_at(1, 30, now).await.unwrap();
    assert_eq!(report.removed_count, 2);
    assert_eq!(report.file_delete_failures, 0);

    for ((label, _, _, removed), id) in cases.iter().zip(&ids) {
        let present = cache.manager.get_entry(id).unwrap().is_some();
        assert_eq!(present, !removed, "{label}");
        assert_eq!(
            cache.files.contains(&format!("{label}.jpg").into()),
            !removed,
            "{label}"
        );
    }
    assert_eq!(cache.manager.stats().unwrap().index_size, 3);

    let again = cache.manager.cleanup_at(1, 30, now).await.unwrap();
    assert_eq!(again.removed_count, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_identical_requests_generate_once() {
    let cache = create_test_cache(test_config(), 100);
    let request = ImageRequest::new("A dark haunted house").with_tags(["horror"]);

    let mut handles = Vec::new();
    for _ in 0..10 {
        let manager = cache.manager.clone();
        let request = request.clone();
        handles.push(tokio::spawn(
            async move { manager.resolve(&request).await },
        ));
    }

    let mut entry_ids = Vec::new();
    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        entry_ids.push(result.entry_id.unwrap());
    }

    assert_eq!(cache.generator.call_count(), 1);
    assert!(entry_ids.iter().all(|id| id == &entry_ids[0]));
    assert_eq!(cache.manager.stats().unwrap().total_entries, 1);
    assert_eq!(cache.files.file_count(), 1);
}

#[tokio::test]
async fn deleted_entries_are_never_returned() {
    let cache = create_test_cache(test_config(), 0);
    cache.embedding.script("invalidated", axis(D));
    cache
        .embedding
        .script("expired", vector_with_similarity(D, 0.0));

    let invalidated = cache
        .manager
        .resolve(&ImageRequest::new("invalidated"))
        .await
        .unwrap();
    let expired = cache
        .manager
        .resolve(&ImageRequest::new("expired"))
        .await
        .unwrap();

    assert!(
        cache
            .manager
            .invalidate(invalidated.entry_id.as_deref().unwrap())
            .await
            .unwrap()
    );
    let far_future = imagecache_storage::time_utils::now_ms() + 365 * DAY_MS;
    let report = cache.manager.cleanup_at(0, 30, far_future).await.unwrap();
    assert_eq!(report.removed_count, 1);

    for prompt in ["invalidated", "expired"] {
        let outcome = cache
            .manager
            .lookup(&ImageRequest::new(prompt))
            .await
            .unwrap();
        assert_eq!(outcome, LookupOutcome::Miss, "{prompt}");
    }
    assert!(!cache.files.contains(&expired.file_reference));
    assert_eq!(cache.manager.stats().unwrap().index_size, 0);
}

#[tokio::test]
async fn haunted_house_scenario() {
    let cache = create_test_cache(test_config(), 0);
    cache
        .embedding
        .script("A dark haunted house with eerie shadows", axis(D));
    cache.embedding.script(
        "A spooky old house at night",
        vector_with_similarity(D, 0.89),
    );
    cache
        .embedding
        .script("A sunny beach picnic", vector_with_similarity(D, 0.12));

    let e1 = cache
        .manager
        .resolve(
            &ImageRequest::new("A dark haunted house with eerie shadows")
                .with_tags(["horror", "dark", "house"]),
        )
        .await
        .unwrap();
    let e1_id = e1.entry_id.clone().unwrap();

    let q1 = cache
        .manager
        .resolve(&ImageRequest::new("A spooky old house at night").with_tags(["horror", "house"]))
        .await
        .unwrap();
    assert_eq!(q1.source, ImageSource::Hit);
    assert_eq!(q1.entry_id.as_deref(), Some(e1_id.as_str()));
    let score = q1.score.unwrap();
    assert!((score - 0.89).abs() < 1e-4, "score {score}");
    assert_eq!(cache.manager.get_entry(&e1_id).unwrap().unwrap().usage_count, 1);

    let q2 = cache
        .manager
        .lookup(&ImageRequest::new("A sunny beach picnic").with_tags(["summer", "beach"]))
        .await
        .unwrap();
    assert_eq!(q2, LookupOutcome::Miss);
}

#[tokio::test]
async fn provider_outage_still_produces_an_uncached_image() {
    let cache = create_test_cache(test_config(), 0);
    cache.embedding.set_failing(true);

    let result = cache
        .manager
        .resolve(&ImageRequest::new("A dark forest"))
        .await
        .unwrap();

    assert_eq!(result.source, ImageSource::Generated);
    assert_eq!(result.entry_id, None);
    assert!(cache.files.contains(&result.file_reference));
    assert_eq!(cache.generator.call_count(), 1);

    let stats = cache.manager.stats().unwrap();
    assert_eq!(stats.provider_failures, 1);
    assert_eq!(stats.total_entries, 0);
    assert_eq!(stats.index_size, 0);
}

#[tokio::test]
async fn generation_failure_is_surfaced_without_partial_commit() {
    let cache = create_test_cache(test_config(), 0);
    cache.generator.set_failing(true);

    let err = cache
        .manager
        .resolve(&ImageRequest::new("A dark forest"))
        .await
        .unwrap_err();

    assert!(matches!(err, CacheError::Generation(_)));
    let stats = cache.manager.stats().unwrap();
    assert_eq!(stats.total_entries, 0);
    assert_eq!(stats.index_size, 0);
    assert_eq!(cache.files.file_count(), 0);

    cache.generator.set_failing(false);
    let retry = cache
        .manager
        .resolve(&ImageRequest::new("A dark forest"))
        .await
        .unwrap();
    assert_eq!(retry.source, ImageSource::Generated);
}

#[tokio::test]
async fn stale_file_is_invalidated_and_regenerated() {
    let cache = create_test_cache(test_config(), 0);
    cache.embedding.script("A dark forest", axis(D));

    let original = cache
        .manager
        .resolve(&ImageRequest::new("A dark forest"))
        .await
        .unwrap();
    assert!(cache.files.remove_externally(&original.file_reference));

    let replacement = cache
        .manager
        .resolve(&ImageRequest::new("A dark forest"))
        .await
        .unwrap();

    assert_eq!(replacement.source, ImageSource::Generated);
    assert_ne!(replacement.entry_id, original.entry_id);
    assert!(
        cache
            .manager
            .get_entry(original.entry_id.as_deref().unwrap())
            .unwrap()
            .is_none()
    );
    assert_eq!(cache.generator.call_count(), 2);
    assert_eq!(cache.manager.stats().unwrap().total_entries, 1);
}

#[tokio::test]
async fn restart_restores_snapshot() {
    let cache = create_test_cache(test_config(), 0);
    cache.embedding.script("A dark forest", axis(D));
    cache
        .manager
        .resolve(&ImageRequest::new("A dark forest"))
        .await
        .unwrap();
    cache.manager.flush_snapshots().await;

    let reopened = cache.reopen().unwrap();
    let report = reopened.open_report();
    assert_eq!(report.snapshot_status, SnapshotStatus::Restored);
    assert_eq!(report.restored, 1);
    assert_eq!(report.repopulated, 0);

    let outcome = reopened
        .lookup(&ImageRequest::new("A dark forest"))
        .await
        .unwrap();
    assert!(outcome.is_hit());
}

#[tokio::test]
async fn corrupt_snapshot_is_discarded_and_index_repopulated() {
    let cache = create_test_cache(test_config(), 0);
    for prompt in ["one", "two", "three"] {
        cache
            .manager
            .resolve(&ImageRequest::new(prompt))
            .await
            .unwrap();
    }
    cache.manager.flush_snapshots().await;
    cache.storage.snapshots.save(b"not a snapshot").unwrap();

    let reopened = cache.reopen().unwrap();
    let report = reopened.open_report();
    assert!(matches!(
        report.snapshot_status,
        SnapshotStatus::Discarded { .. }
    ));
    assert_eq!(report.restored, 0);
    assert_eq!(report.repopulated, 3);
    assert_eq!(reopened.stats().unwrap().index_size, 3);

    let outcome = reopened.lookup(&ImageRequest::new("two")).await.unwrap();
    assert!(outcome.is_hit());
}

#[tokio::test]
async fn vectors_without_records_are_dropped_on_open() {
    let cache = create_test_cache(test_config(), 0);
    cache.embedding.script("A dark forest", axis(D));
    let result = cache
        .manager
        .resolve(&ImageRequest::new("A dark forest"))
        .await
        .unwrap();
    cache.manager.flush_snapshots().await;
    cache
        .storage
        .metadata
        .delete(result.entry_id.as_deref().unwrap())
        .unwrap();

    let reopened = cache.reopen().unwrap();
    assert_eq!(reopened.open_report().orphans_removed, 1);
    assert_eq!(reopened.stats().unwrap().index_size, 0);
    assert_eq!(
        reopened
            .lookup(&ImageRequest::new("A dark forest"))
            .await
            .unwrap(),
        LookupOutcome::Miss
    );
}

#[tokio::test]
async fn dimension_change_requires_purge() {
    let cache = create_test_cache(test_config(), 0);
    cache
        .manager
        .resolve(&ImageRequest::new("A dark forest"))
        .await
        .unwrap();

    let mut config = test_config();
    config.dimension = D * 2;
    let wider = Arc::new(ScriptedEmbedding::new(D * 2));

    let err = CacheManager::open(
        config.clone(),
        cache.storage.clone(),
        wider.clone(),
        cache.generator.clone(),
        cache.files.clone(),
    )
    .err()
    .unwrap();
    assert_eq!(
        err,
        CacheError::DimensionMismatch {
            expected: D,
            actual: D * 2
        }
    );

    assert_eq!(
        purge_storage(&cache.storage, cache.files.as_ref())
            .await
            .unwrap(),
        1
    );
    assert_eq!(cache.files.file_count(), 0);

    let reopened = CacheManager::open(
        config,
        cache.storage.clone(),
        wider,
        cache.generator.clone(),
        cache.files.clone(),
    )
    .unwrap();
    assert_eq!(reopened.stats().unwrap().total_entries, 0);
}

/// Entry to delete behind the cache's back, and how many `exists` calls
/// have been seen since arming.
struct PendingRemoval {
    metadata: MetadataStore,
    entry: CacheEntry,
    calls: u32,
}

/// File store whose first `exists` call fails and whose second removes an
/// entry (record and file) before reporting the file present.
#[derive(Default)]
struct RemovingFileStore {
    inner: MemoryFileStore,
    pending: Mutex<Option<PendingRemoval>>,
}

impl RemovingFileStore {
    fn arm(&self, metadata: MetadataStore, entry: CacheEntry) {
        *self.pending.lock() = Some(PendingRemoval {
            metadata,
            entry,
            calls: 0,
        });
    }
}

#[async_trait]
impl FileStore for RemovingFileStore {
    async fn save(&self, bytes: &[u8]) -> imagecache_core::Result<FileReference> {
        self.inner.save(bytes).await
    }

    async fn delete(&self, reference: &FileReference) -> imagecache_core::Result<bool> {
        self.inner.delete(reference).await
    }

    async fn exists(&self, reference: &FileReference) -> imagecache_core::Result<bool> {
        let removal = {
            let mut pending = self.pending.lock();
            let first_call = match pending.as_mut() {
                Some(state) => {
                    state.calls += 1;
                    state.calls == 1
                }
                None => false,
            };
            if first_call {
                return Err(CacheError::FileStore("stat timed out".to_string()));
            }
            pending.take()
        };

        if let Some(removal) = removal {
            removal
                .metadata
                .delete(&removal.entry.id)
                .map_err(CacheError::from)?;
            self.inner.remove_externally(&removal.entry.file_reference);
            return Ok(true);
        }
        self.inner.exists(reference).await
    }
}

#[tokio::test]
async fn reused_entry_removed_before_usage_is_recorded_is_not_a_hit() {
    let temp_dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(Storage::new(temp_dir.path().join("race.db")).unwrap());
    let embedding = Arc::new(ScriptedEmbedding::new(D));
    let generator = Arc::new(CountingGenerator::new(0));
    let files = Arc::new(RemovingFileStore::default());
    let manager = CacheManager::open(
        test_config(),
        storage.clone(),
        embedding.clone(),
        generator.clone(),
        files.clone(),
    )
    .unwrap();

    embedding.script("first prompt", axis(D));
    embedding.script("second prompt", vector_with_similarity(D, 0.95));
    let first = manager
        .resolve(&ImageRequest::new("first prompt"))
        .await
        .unwrap();
    let first_entry = manager
        .get_entry(first.entry_id.as_deref().unwrap())
        .unwrap()
        .unwrap();

    // The cache's own hit check cannot stat the file; the coordinator's check
    // then sees the entry just before it is removed.
    files.arm(storage.metadata.clone(), first_entry.clone());
    let second = manager
        .resolve(&ImageRequest::new("second prompt"))
        .await
        .unwrap();

    assert_ne!(second.source, ImageSource::Hit);
    assert_ne!(second.entry_id, first.entry_id);
    assert!(manager.get_entry(&first_entry.id).unwrap().is_none());
    assert!(files.inner.contains(&second.file_reference));
    if let Some(id) = second.entry_id.as_deref() {
        assert!(manager.get_entry(id).unwrap().is_some());
    }
    assert_eq!(generator.call_count(), 2);
}
