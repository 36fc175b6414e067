//! Request, result and report types exposed by the cache.

use imagecache_storage::CacheEntry;
use imagecache_traits::FileReference;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

use crate::tags::{BACKGROUND_TAG, extract_tags, normalize_tag, normalize_tags};

/// A prompt to resolve, with the tags that refine matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRequest {
    pub prompt: String,
    /// Normalized tags
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Style forwarded to the image generator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

impl ImageRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            tags: BTreeSet::new(),
            style: None,
        }
    }

    /// Replace the tags (normalized).
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags = normalize_tags(tags);
        self
    }

    /// Add the tags `extract_tags` derives from the prompt.
    pub fn with_extracted_tags(mut self) -> Self {
        self.tags.extend(extract_tags(&self.prompt));
        self
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        let style = style.into();
        let style = style.trim();
        self.style = (!style.is_empty()).then(|| style.to_string());
        self
    }

    /// Request for a story background image: extracted tags plus the story
    /// type and `background`.
    pub fn background(prompt: impl Into<String>, story_type: &str) -> Self {
        let mut request = Self::new(prompt).with_extracted_tags();
        request.tags.extend(normalize_tag(story_type));
        request.tags.insert(BACKGROUND_TAG.to_string());
        request
    }

    /// Key identifying "obviously identical" requests for generation
    /// deduplication.
    ///
    /// SHA-256 over the lowercased, whitespace-collapsed prompt, the sorted
    /// tags and the style.
    pub fn normalization_key(&self) -> String {
        let prompt = self
            .prompt
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" ");
        let tags = self.tags.iter().cloned().collect::<Vec<_>>().join(",");

        let mut hasher = Sha256::new();
        hasher.update(prompt.as_bytes());
        hasher.update(b"\n");
        hasher.update(tags.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.style.as_deref().unwrap_or_default().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Where a resolved image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSource {
    Hit,
    Generated,
}

/// Result of `CacheManager::resolve`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageResult {
    pub source: ImageSource,
    pub file_reference: FileReference,
    /// Cache entry backing the image; `None` when it was generated without
    /// being cached (embedding provider unavailable).
    pub entry_id: Option<String>,
    /// Similarity of the matched entry (hits only)
    pub score: Option<f32>,
}

impl ImageResult {
    pub fn hit(entry: &CacheEntry, score: f32) -> Self {
        Self {
            source: ImageSource::Hit,
            file_reference: entry.file_reference.clone(),
            entry_id: Some(entry.id.clone()),
            score: Some(score),
        }
    }

    pub fn generated(entry: &CacheEntry) -> Self {
        Self {
            source: ImageSource::Generated,
            file_reference: entry.file_reference.clone(),
            entry_id: Some(entry.id.clone()),
            score: None,
        }
    }

    pub fn uncached(file_reference: FileReference) -> Self {
        Self {
            source: ImageSource::Generated,
            file_reference,
            entry_id: None,
            score: None,
        }
    }
}

/// Read-only lookup result.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    Hit { entry: CacheEntry, score: f32 },
    Miss,
    /// The embedding provider failed; callers treat this as a miss.
    ProviderUnavailable(String),
}

impl LookupOutcome {
    pub fn is_hit(&self) -> bool {
        matches!(self, LookupOutcome::Hit { .. })
    }
}

/// Cache statistics, computed on demand.
///
/// `hits`, `misses`, `generations` and `provider_failures` are
/// process-lifetime counters; they are not persisted and reset on restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_usage: u64,
    pub hits: u64,
    pub misses: u64,
    pub generations: u64,
    pub provider_failures: u64,
    pub hit_rate: f64,
    pub index_size: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub removed_count: usize,
    /// Removed entries whose file could not be deleted
    pub file_delete_failures: usize,
}

/// What happened to the persisted index snapshot at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SnapshotStatus {
    Restored,
    Missing,
    Discarded { reason: String },
}

/// Outcome of opening a cache and reconciling index with metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenReport {
    /// Vectors loaded from the snapshot
    pub restored: usize,
    /// Vectors re-inserted from metadata records
    pub repopulated: usize,
    /// Vectors or records dropped because their counterpart was missing or invalid
    pub orphans_removed: usize,
    pub snapshot_status: SnapshotStatus,
}
