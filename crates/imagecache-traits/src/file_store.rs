//! Image file storage abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

/// Opaque pointer to stored image bytes.
///
/// The cache references files; their lifetime is owned by the `FileStore`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileReference(String);

impl FileReference {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for FileReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for FileReference {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for FileReference {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Persistence for generated image bytes.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Store bytes and return a reference to them.
    async fn save(&self, bytes: &[u8]) -> Result<FileReference>;

    /// Delete a stored file. Returns `false` when it did not exist.
    async fn delete(&self, reference: &FileReference) -> Result<bool>;

    /// Whether the referenced file currently exists.
    async fn exists(&self, reference: &FileReference) -> Result<bool>;
}
