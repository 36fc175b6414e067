use anyhow::{Context, Result};
use imagecache_core::{
    CacheConfig, CacheManager, CachePaths, LocalFileStore, OpenAiEmbedding, OpenAiImageGenerator,
    Storage,
};
use std::sync::Arc;
use tracing::debug;

use crate::cli::Cli;

/// Whether a command talks to the embedding or image APIs.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Credentials {
    Required,
    NotNeeded,
}

/// Resolved directory layout and configuration for one invocation.
pub struct CacheContext {
    pub paths: CachePaths,
    pub config: CacheConfig,
}

impl CacheContext {
    pub fn load(cli: &Cli) -> Result<Self> {
        let paths = match &cli.dir {
            Some(dir) => CachePaths::new(dir),
            None => CachePaths::resolve()?,
        };
        paths
            .ensure()
            .with_context(|| format!("Failed to create {}", paths.root().display()))?;

        let config_path = cli.config.clone().unwrap_or_else(|| paths.config_file());
        let config = CacheConfig::load_from_path(&config_path)?;
        debug!(dir = %paths.root().display(), config = %config_path.display(), "Loaded cache context");

        Ok(Self { paths, config })
    }

    pub fn storage(&self) -> Result<Arc<Storage>> {
        let db_path = self.paths.database();
        let storage = Storage::new(&db_path)
            .with_context(|| format!("Failed to open database {}", db_path.display()))?;
        Ok(Arc::new(storage))
    }

    pub fn file_store(&self) -> Result<Arc<LocalFileStore>> {
        Ok(Arc::new(LocalFileStore::new(self.paths.images_dir())?))
    }

    /// Open the cache with the OpenAI-compatible collaborators.
    ///
    /// Commands that never embed or generate get clients without a key; they
    /// only need the provider's model and dimension.
    pub fn open(&self, credentials: Credentials) -> Result<(Arc<CacheManager>, Arc<LocalFileStore>)> {
        let embedding = match credentials {
            Credentials::Required => {
                OpenAiEmbedding::from_env(&self.config.embedding, self.config.dimension)?
            }
            Credentials::NotNeeded => OpenAiEmbedding::new(
                std::env::var(&self.config.embedding.api_key_env).unwrap_or_default(),
                &self.config.embedding,
                self.config.dimension,
            ),
        };
        let generator = match credentials {
            Credentials::Required => OpenAiImageGenerator::from_env(&self.config.image)?,
            Credentials::NotNeeded => OpenAiImageGenerator::new(
                std::env::var(&self.config.image.api_key_env).unwrap_or_default(),
                &self.config.image,
            ),
        };

        let file_store = self.file_store()?;
        let manager = CacheManager::open(
            self.config.clone(),
            self.storage()?,
            Arc::new(embedding),
            Arc::new(generator),
            file_store.clone(),
        )?;
        Ok((Arc::new(manager), file_store))
    }
}
