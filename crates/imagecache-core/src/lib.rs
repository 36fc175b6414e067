//! imagecache Core - semantic reuse of generated images
//!
//! Given a prompt, [`CacheManager::resolve`] returns a previously generated
//! image whose prompt embedding is close enough (cosine similarity at or
//! above the configured threshold, with overlapping tags), or generates a
//! new one and caches it.
//!
//! Concurrent requests for the same normalized prompt share a single
//! generation. Embedding provider outages never block image production: the
//! cache is bypassed and the image is generated uncached.

pub mod config;
pub mod coordinator;
pub mod decision;
pub mod embedding;
pub mod file_store;
pub mod generator;
pub mod locks;
pub mod manager;
pub mod models;
pub mod paths;
pub mod snapshot;
pub mod stores;
pub mod tags;
#[cfg(any(test, feature = "test-utils"))]
pub mod testkit;

pub use config::{AuthHeader, CacheConfig, EmbeddingSettings, ImageSettings};
pub use coordinator::{GenerationCoordinator, GenerationOutcome};
pub use decision::{CacheDecisionEngine, Decision};
pub use embedding::OpenAiEmbedding;
pub use file_store::LocalFileStore;
pub use generator::OpenAiImageGenerator;
pub use manager::{CacheManager, purge_storage};
pub use models::{
    CacheStats, CleanupReport, ImageRequest, ImageResult, ImageSource, LookupOutcome,
    OpenReport, SnapshotStatus,
};
pub use paths::CachePaths;
pub use tags::{extract_tags, normalize_tags};

pub use imagecache_storage::{CacheEntry, Storage};
pub use imagecache_traits::{
    CacheError, EmbeddingProvider, FileReference, FileStore, GeneratedImage, ImageGenerator,
    Result,
};
