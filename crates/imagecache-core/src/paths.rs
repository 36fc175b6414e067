use anyhow::Result;
use std::path::PathBuf;

const IMAGECACHE_DIR: &str = ".imagecache";
const DB_FILE: &str = "imagecache.db";
const CONFIG_FILE: &str = "config.toml";
const IMAGES_DIR: &str = "images";
const LOGS_DIR: &str = "logs";

/// Environment variable to override the cache directory.
pub const IMAGECACHE_DIR_ENV: &str = "IMAGECACHE_DIR";

/// Resolve the cache directory.
/// Priority: IMAGECACHE_DIR env var > ~/.imagecache/
pub fn resolve_cache_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(IMAGECACHE_DIR_ENV)
        && !dir.trim().is_empty()
    {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|h| h.join(IMAGECACHE_DIR))
        .ok_or_else(|| anyhow::anyhow!("Failed to determine home directory"))
}

/// Filesystem layout of one cache directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePaths {
    root: PathBuf,
}

impl CachePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Layout rooted at `resolve_cache_dir()`.
    pub fn resolve() -> Result<Self> {
        Ok(Self::new(resolve_cache_dir()?))
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Database path: <root>/imagecache.db
    pub fn database(&self) -> PathBuf {
        self.root.join(DB_FILE)
    }

    /// Config file path: <root>/config.toml
    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// Stored images: <root>/images/
    pub fn images_dir(&self) -> PathBuf {
        self.root.join(IMAGES_DIR)
    }

    /// Log files: <root>/logs/
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(LOGS_DIR)
    }

    /// Create the root, image and log directories.
    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.images_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
