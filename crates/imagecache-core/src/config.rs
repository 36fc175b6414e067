//! Cache configuration.
//!
//! Loaded from `<cache dir>/config.toml`; every field has a default so a
//! missing file or a partial file both work.

use imagecache_traits::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

// Default configuration constants
const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.85;
const DEFAULT_TOP_K: usize = 5;
const DEFAULT_DIMENSION: usize = 3072; // text-embedding-3-large
const DEFAULT_CLEANUP_MIN_USAGE: u64 = 1;
const DEFAULT_CLEANUP_DAYS_OLD: u32 = 30;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_IMAGE_TIMEOUT_SECS: u64 = 180;
const MIN_TOP_K: usize = 1;
const MIN_DIMENSION: usize = 1;
const MIN_TIMEOUT_SECS: u64 = 1;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-large";
pub const DEFAULT_IMAGE_MODEL: &str = "gpt-image-1";
pub const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Minimum cosine similarity for a candidate to count as a hit
    pub similarity_threshold: f32,
    /// Number of nearest neighbours examined per decision
    pub top_k: usize,
    /// Embedding dimensionality, fixed for the lifetime of an index
    pub dimension: usize,
    /// Default `min_usage` for cleanup
    pub cleanup_min_usage: u64,
    /// Default `days_old` for cleanup
    pub cleanup_days_old: u32,
    /// Persist the index snapshot after every commit and cleanup batch
    pub snapshot_on_write: bool,
    pub embedding: EmbeddingSettings,
    pub image: ImageSettings,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            top_k: DEFAULT_TOP_K,
            dimension: DEFAULT_DIMENSION,
            cleanup_min_usage: DEFAULT_CLEANUP_MIN_USAGE,
            cleanup_days_old: DEFAULT_CLEANUP_DAYS_OLD,
            snapshot_on_write: true,
            embedding: EmbeddingSettings::default(),
            image: ImageSettings::default(),
        }
    }
}

/// OpenAI-compatible embeddings endpoint settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// How the image API expects its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthHeader {
    /// `Authorization: Bearer <key>`
    #[default]
    Bearer,
    /// `api-key: <key>` (Azure)
    ApiKey,
}

/// OpenAI-compatible image generation endpoint settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSettings {
    pub base_url: String,
    pub model: String,
    pub size: String,
    pub quality: String,
    pub output_format: String,
    pub api_key_env: String,
    pub auth_header: AuthHeader,
    pub timeout_secs: u64,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            model: DEFAULT_IMAGE_MODEL.to_string(),
            size: "1024x1024".to_string(),
            quality: "medium".to_string(),
            output_format: "jpeg".to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            auth_header: AuthHeader::Bearer,
            timeout_secs: DEFAULT_IMAGE_TIMEOUT_SECS,
        }
    }
}

impl CacheConfig {
    /// Load configuration from a TOML file.
    ///
    /// A missing file yields the defaults; an unreadable or invalid file is
    /// a `CacheError::Config`.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            CacheError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            CacheError::Config(format!("failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !self.similarity_threshold.is_finite()
            || !(-1.0..=1.0).contains(&self.similarity_threshold)
        {
            return Err(CacheError::Config(format!(
                "similarity_threshold must lie in [-1, 1], got {}",
                self.similarity_threshold
            )));
        }
        if self.top_k < MIN_TOP_K {
            return Err(CacheError::Config(format!(
                "top_k must be at least {}",
                MIN_TOP_K
            )));
        }
        if self.dimension < MIN_DIMENSION {
            return Err(CacheError::Config(format!(
                "dimension must be at least {}",
                MIN_DIMENSION
            )));
        }
        if self.embedding.timeout_secs < MIN_TIMEOUT_SECS
            || self.image.timeout_secs < MIN_TIMEOUT_SECS
        {
            return Err(CacheError::Config(format!(
                "timeouts must be at least {} second",
                MIN_TIMEOUT_SECS
            )));
        }
        Ok(())
    }
}
