//! Directory-backed image file store.

use async_trait::async_trait;
use imagecache_traits::{CacheError, FileReference, FileStore, Result};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Stores each image as `<uuid>.<ext>` directly under a root directory.
///
/// References are file names relative to the root; anything that would
/// resolve outside it is rejected.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a stored file.
    pub fn path_of(&self, reference: &FileReference) -> Result<PathBuf> {
        let relative = Path::new(reference.as_str());
        let mut components = relative.components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.root.join(relative)),
            _ => Err(CacheError::FileStore(format!(
                "invalid file reference {reference}"
            ))),
        }
    }
}

/// File extension for image bytes, from their magic number.
pub fn sniff_extension(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "jpg"
    } else if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        "png"
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "webp"
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        "gif"
    } else {
        "bin"
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn save(&self, bytes: &[u8]) -> Result<FileReference> {
        let id = uuid::Uuid::new_v4();
        let name = format!("{}.{}", id, sniff_extension(bytes));
        let temp_path = self.root.join(format!(".{id}.tmp"));
        let final_path = self.root.join(&name);

        tokio::fs::write(&temp_path, bytes).await?;
        if let Err(e) = tokio::fs::rename(&temp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        debug!(file = %name, bytes = bytes.len(), "Saved image file");
        Ok(FileReference::new(name))
    }

    async fn delete(&self, reference: &FileReference) -> Result<bool> {
        let path = self.path_of(reference)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, reference: &FileReference) -> Result<bool> {
        let path = self.path_of(reference)?;
        match tokio::fs::metadata(&path).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
