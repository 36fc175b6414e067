//! Cache entry model.
//!
//! ```text
//! CacheEntry
//! ├── id: "5f0c..."               (stable, immutable)
//! ├── embedding: [f32; D]
//! ├── prompt: "A dark haunted house with eerie shadows"
//! ├── tags: {"dark", "horror", "house"}
//! ├── file_reference: "a1b2c3.jpg"
//! ├── created_at / last_used_at   (unix ms)
//! └── usage_count: 3              (recorded hits)
//! ```

use imagecache_traits::FileReference;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::time_utils::now_ms;

/// A cached generated image and the embedding it is matched by.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    /// Unique identifier for this entry
    pub id: String,

    /// Prompt embedding; its length equals the index dimensionality
    pub embedding: Vec<f32>,

    /// Prompt used to generate the image (diagnostics only)
    pub prompt: String,

    /// Normalized tags
    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// Style the image was generated with
    #[serde(default)]
    pub style: Option<String>,

    /// Where the image bytes live
    pub file_reference: FileReference,

    /// Unix timestamp in milliseconds when this entry was committed
    pub created_at: i64,

    /// Unix timestamp in milliseconds of the last recorded hit
    #[serde(default)]
    pub last_used_at: Option<i64>,

    /// Number of recorded hits
    #[serde(default)]
    pub usage_count: u64,
}

impl CacheEntry {
    /// Create a new entry with a fresh ID, created now, never used.
    pub fn new(prompt: String, embedding: Vec<f32>, file_reference: FileReference) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            embedding,
            prompt,
            tags: BTreeSet::new(),
            style: None,
            file_reference,
            created_at: now_ms(),
            last_used_at: None,
            usage_count: 0,
        }
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags = tags.into_iter().collect();
        self
    }

    pub fn with_style(mut self, style: Option<String>) -> Self {
        self.style = style;
        self
    }

    pub fn with_created_at(mut self, created_at: i64) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_usage_count(mut self, usage_count: u64) -> Self {
        self.usage_count = usage_count;
        self
    }

    /// Age in milliseconds relative to `now_ms` (never negative).
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        (now_ms - self.created_at).max(0)
    }

    /// Record one hit.
    pub fn touch(&mut self, now_ms: i64) {
        self.usage_count = self.usage_count.saturating_add(1);
        self.last_used_at = Some(now_ms);
    }
}
