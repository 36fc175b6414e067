//! Deterministic in-process collaborators for cache tests.

use async_trait::async_trait;
use imagecache_storage::Storage;
use imagecache_traits::{
    CacheError, EmbeddingProvider, FileReference, FileStore, GeneratedImage, ImageGenerator,
    Result,
};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::time::{Duration, sleep};

use crate::config::CacheConfig;
use crate::manager::CacheManager;

pub const TEST_DIMENSION: usize = 16;
pub const TEST_MODEL: &str = "scripted-embedding";

/// JPEG start-of-image marker prepended to generated bytes.
const JPEG_MAGIC: [u8; 3] = [0xFF, 0xD8, 0xFF];

/// Embedding provider with per-prompt scripted vectors.
///
/// Unscripted prompts get a deterministic pseudo-random vector derived from
/// the prompt text.
pub struct ScriptedEmbedding {
    dimension: usize,
    vectors: RwLock<HashMap<String, Vec<f32>>>,
    call_count: AtomicU32,
    failing: AtomicBool,
}

impl ScriptedEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: RwLock::new(HashMap::new()),
            call_count: AtomicU32::new(0),
            failing: AtomicBool::new(false),
        }
    }

    /// Return `vector` for `prompt` from now on.
    pub fn script(&self, prompt: &str, vector: Vec<f32>) {
        self.vectors
            .write()
            .insert(self.normalize_text(prompt), vector);
    }

    /// Make every call fail with `CacheError::Provider`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    fn hashed_vector(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        let mut seed_bytes = [0u8; 8];
        seed_bytes.copy_from_slice(&digest[..8]);
        let mut state = u64::from_le_bytes(seed_bytes);
        (0..self.dimension)
            .map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                ((state >> 40) as f32 / (1u64 << 24) as f32) * 2.0 - 1.0
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for ScriptedEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::Provider("scripted outage".to_string()));
        }
        let normalized = self.normalize_text(text);
        if let Some(vector) = self.vectors.read().get(&normalized) {
            return Ok(vector.clone());
        }
        Ok(self.hashed_vector(&normalized))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        TEST_MODEL
    }
}

/// Image generator that counts calls, can be slowed down and can fail.
pub struct CountingGenerator {
    call_count: AtomicU32,
    delay_ms: u64,
    failing: AtomicBool,
}

impl CountingGenerator {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            call_count: AtomicU32::new(0),
            delay_ms,
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageGenerator for CountingGenerator {
    async fn generate(&self, prompt: &str, style: Option<&str>) -> Result<GeneratedImage> {
        let call_index = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;

        if self.delay_ms > 0 {
            sleep(Duration::from_millis(self.delay_ms)).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::Generation(format!(
                "scripted generation failure at call {call_index}"
            )));
        }

        let mut bytes = JPEG_MAGIC.to_vec();
        bytes.extend_from_slice(prompt.as_bytes());
        if let Some(style) = style {
            bytes.extend_from_slice(style.as_bytes());
        }
        Ok(GeneratedImage::Bytes(bytes))
    }
}

/// In-memory `FileStore`.
#[derive(Default)]
pub struct MemoryFileStore {
    files: RwLock<HashMap<FileReference, Vec<u8>>>,
    failing_deletes: AtomicBool,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a file created outside the cache.
    pub fn insert(&self, reference: impl Into<FileReference>, bytes: Vec<u8>) -> FileReference {
        let reference = reference.into();
        self.files.write().insert(reference.clone(), bytes);
        reference
    }

    /// Delete a file behind the cache's back.
    pub fn remove_externally(&self, reference: &FileReference) -> bool {
        self.files.write().remove(reference).is_some()
    }

    pub fn contains(&self, reference: &FileReference) -> bool {
        self.files.read().contains_key(reference)
    }

    pub fn file_count(&self) -> usize {
        self.files.read().len()
    }

    /// Make `delete` fail with `CacheError::FileStore`.
    pub fn set_failing_deletes(&self, failing: bool) {
        self.failing_deletes.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn save(&self, bytes: &[u8]) -> Result<FileReference> {
        let reference = FileReference::new(format!("{}.jpg", uuid::Uuid::new_v4()));
        self.files.write().insert(reference.clone(), bytes.to_vec());
        Ok(reference)
    }

    async fn delete(&self, reference: &FileReference) -> Result<bool> {
        if self.failing_deletes.load(Ordering::SeqCst) {
            return Err(CacheError::FileStore(format!(
                "scripted delete failure for {reference}"
            )));
        }
        Ok(self.files.write().remove(reference).is_some())
    }

    async fn exists(&self, reference: &FileReference) -> Result<bool> {
        Ok(self.contains(reference))
    }
}

/// Configuration sized for the scripted collaborators.
pub fn test_config() -> CacheConfig {
    CacheConfig {
        dimension: TEST_DIMENSION,
        ..CacheConfig::default()
    }
}

/// Unit vector in `dimension` dimensions whose cosine similarity with
/// `axis(dimension)` is `cos`.
pub fn vector_with_similarity(dimension: usize, cos: f32) -> Vec<f32> {
    let mut vector = vec![0.0; dimension];
    vector[0] = cos;
    if dimension > 1 {
        vector[1] = (1.0 - cos * cos).max(0.0).sqrt();
    }
    vector
}

/// Unit vector along the first axis.
pub fn axis(dimension: usize) -> Vec<f32> {
    vector_with_similarity(dimension, 1.0)
}

/// A cache over a temporary database with scripted collaborators.
pub struct TestCache {
    pub manager: Arc<CacheManager>,
    pub storage: Arc<Storage>,
    pub embedding: Arc<ScriptedEmbedding>,
    pub generator: Arc<CountingGenerator>,
    pub files: Arc<MemoryFileStore>,
    pub temp_dir: tempfile::TempDir,
}

impl TestCache {
    /// Reopen the same database with fresh in-memory state, as after a
    /// restart.
    pub fn reopen(&self) -> Result<Arc<CacheManager>> {
        Ok(Arc::new(CacheManager::open(
            self.manager.config().clone(),
            self.storage.clone(),
            self.embedding.clone(),
            self.generator.clone(),
            self.files.clone(),
        )?))
    }
}

/// Creates a cache backed by a temporary database.
pub fn create_test_cache(config: CacheConfig, generator_delay_ms: u64) -> TestCache {
    let temp_dir = tempfile::tempdir().expect("failed to create temp dir");
    let storage = Arc::new(
        Storage::new(temp_dir.path().join("imagecache-test.db"))
            .expect("failed to create test storage"),
    );
    let embedding = Arc::new(ScriptedEmbedding::new(config.dimension));
    let generator = Arc::new(CountingGenerator::new(generator_delay_ms));
    let files = Arc::new(MemoryFileStore::new());
    let manager = Arc::new(
        CacheManager::open(
            config,
            storage.clone(),
            embedding.clone(),
            generator.clone(),
            files.clone(),
        )
        .expect("failed to open test cache"),
    );
    TestCache {
        manager,
        storage,
        embedding,
        generator,
        files,
        temp_dir,
    }
}
