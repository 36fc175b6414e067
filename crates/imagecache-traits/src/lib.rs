//! imagecache Traits - Shared error taxonomy and collaborator abstractions.
//!
//! This crate provides the interfaces the cache depends on without owning:
//! - `CacheError` and the crate-wide `Result` alias
//! - `EmbeddingProvider` (prompt -> fixed-dimension vector)
//! - `ImageGenerator` (prompt -> image bytes or stored file)
//! - `FileStore` (image byte persistence addressed by `FileReference`)
//!
//! Implementations live in `imagecache-core` (HTTP clients, local disk store)
//! and in test doubles.

pub mod embedding;
pub mod error;
pub mod file_store;
pub mod generator;

pub use embedding::EmbeddingProvider;
pub use error::{CacheError, Result};
pub use file_store::{FileReference, FileStore};
pub use generator::{GeneratedImage, ImageGenerator};
