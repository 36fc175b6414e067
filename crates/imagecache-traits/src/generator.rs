//! Image generator abstraction.

use async_trait::async_trait;

use crate::error::Result;
use crate::file_store::FileReference;

/// Output of an image synthesis call.
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratedImage {
    /// Raw image bytes that still need to be saved to a `FileStore`
    Bytes(Vec<u8>),
    /// The generator already persisted the image
    Stored(FileReference),
}

/// Performs the costly image synthesis on a cache miss.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Generate an image for `prompt`, optionally in a named style.
    ///
    /// Failures must surface as `CacheError::Generation`.
    async fn generate(&self, prompt: &str, style: Option<&str>) -> Result<GeneratedImage>;
}
