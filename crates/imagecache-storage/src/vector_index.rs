//! In-memory vector index with exact cosine search and checksummed snapshots.
//!
//! Search is a linear scan over every stored vector, so results are exact
//! (recall epsilon is 0). Candidates are ordered by descending cosine
//! similarity; equal scores are ordered by insertion sequence, earliest
//! first, which keeps query results deterministic.
//!
//! # Snapshot format
//!
//! `bincode` (standard config) encoding of
//! `{ format_version, dimension, records: [(id, embedding, checksum)] }`
//! with records in insertion order. `checksum` is the hex SHA-256 of the id
//! followed by the little-endian embedding bytes. Any decoding or checksum
//! failure rejects the whole snapshot.

use imagecache_traits::{CacheError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

const SNAPSHOT_FORMAT_VERSION: u32 = 1;
/// Upper bound on decoded snapshot size; guards against corrupt length prefixes.
const SNAPSHOT_DECODE_LIMIT: usize = 1 << 30;

/// A query result: entry ID and cosine similarity in [-1, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredId {
    pub id: String,
    pub score: f32,
}

#[derive(Debug, Clone)]
struct IndexedVector {
    seq: u64,
    values: Vec<f32>,
    norm: f32,
}

#[derive(Debug, Default)]
struct IndexState {
    vectors: HashMap<String, IndexedVector>,
    next_seq: u64,
}

impl IndexState {
    fn push(&mut self, id: String, values: Vec<f32>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let norm = l2_norm(&values);
        self.vectors.insert(id, IndexedVector { seq, values, norm });
    }
}

#[derive(Serialize, Deserialize)]
struct IndexSnapshot {
    format_version: u32,
    dimension: usize,
    records: Vec<SnapshotRecord>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotRecord {
    id: String,
    embedding: Vec<f32>,
    checksum: String,
}

/// Nearest-neighbour index over fixed-dimension embeddings.
pub struct VectorIndex {
    dimension: usize,
    state: RwLock<IndexState>,
}

impl VectorIndex {
    /// Create an empty index for vectors of length `dimension`.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            state: RwLock::new(IndexState::default()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Add a vector. Re-inserting an existing ID replaces its vector and
    /// moves it to the end of the insertion order.
    pub fn insert(&self, id: &str, embedding: Vec<f32>) -> Result<()> {
        self.validate(&embedding)?;
        self.state.write().push(id.to_string(), embedding);
        Ok(())
    }

    /// Up to `k` candidates ordered by descending cosine similarity.
    pub fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<ScoredId>> {
        self.validate(embedding)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_norm = l2_norm(embedding);
        let state = self.state.read();
        let mut scored: Vec<(u64, &str, f32)> = state
            .vectors
            .iter()
            .map(|(id, vector)| {
                let score = cosine_with_norms(embedding, query_norm, &vector.values, vector.norm);
                (vector.seq, id.as_str(), score)
            })
            .collect();

        scored.sort_by(|a, b| b.2.total_cmp(&a.2).then(a.0.cmp(&b.0)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(_, id, score)| ScoredId {
                id: id.to_string(),
                score,
            })
            .collect())
    }

    /// Delete a vector. Returns true if it existed.
    pub fn remove(&self, id: &str) -> bool {
        self.state.write().vectors.remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.read().vectors.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.state.read().vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().vectors.is_empty()
    }

    /// All stored IDs in insertion order.
    pub fn ids(&self) -> Vec<String> {
        let state = self.state.read();
        let mut ids: Vec<(u64, &String)> = state
            .vectors
            .iter()
            .map(|(id, vector)| (vector.seq, id))
            .collect();
        ids.sort_by_key(|(seq, _)| *seq);
        ids.into_iter().map(|(_, id)| id.clone()).collect()
    }

    pub fn clear(&self) {
        *self.state.write() = IndexState::default();
    }

    /// Serialize the full vector set.
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        let state = self.state.read();
        let mut ordered: Vec<(&String, &IndexedVector)> = state.vectors.iter().collect();
        ordered.sort_by_key(|(_, vector)| vector.seq);

        let snapshot = IndexSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            dimension: self.dimension,
            records: ordered
                .into_iter()
                .map(|(id, vector)| SnapshotRecord {
                    id: id.clone(),
                    checksum: record_checksum(id, &vector.values),
                    embedding: vector.values.clone(),
                })
                .collect(),
        };
        drop(state);

        bincode::serde::encode_to_vec(&snapshot, snapshot_config())
            .map_err(|err| CacheError::Storage(format!("encode index snapshot: {err}")))
    }

    /// Replace the index contents with a snapshot.
    ///
    /// On any failure the index is left empty, never partially loaded.
    pub fn restore(&self, bytes: &[u8]) -> Result<usize> {
        match self.decode_snapshot(bytes) {
            Ok(state) => {
                let count = state.vectors.len();
                *self.state.write() = state;
                tracing::info!("Restored vector index with {} vectors", count);
                Ok(count)
            }
            Err(err) => {
                self.clear();
                Err(err)
            }
        }
    }

    fn decode_snapshot(&self, bytes: &[u8]) -> Result<IndexState> {
        let (snapshot, consumed): (IndexSnapshot, usize) =
            bincode::serde::decode_from_slice(bytes, snapshot_config())
                .map_err(|err| CacheError::IndexCorruption(format!("decode failed: {err}")))?;

        if consumed != bytes.len() {
            return Err(CacheError::IndexCorruption(format!(
                "{} trailing bytes after snapshot",
                bytes.len() - consumed
            )));
        }
        if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(CacheError::IndexCorruption(format!(
                "unsupported snapshot format version {}",
                snapshot.format_version
            )));
        }
        if snapshot.dimension != self.dimension {
            return Err(CacheError::DimensionMismatch {
                expected: self.dimension,
                actual: snapshot.dimension,
            });
        }

        let mut state = IndexState::default();
        let mut seen = HashSet::new();
        for record in snapshot.records {
            if record.embedding.len() != self.dimension {
                return Err(CacheError::IndexCorruption(format!(
                    "record {} has {} values, expected {}",
                    record.id,
                    record.embedding.len(),
                    self.dimension
                )));
            }
            if record_checksum(&record.id, &record.embedding) != record.checksum {
                return Err(CacheError::IndexCorruption(format!(
                    "checksum mismatch for record {}",
                    record.id
                )));
            }
            if !seen.insert(record.id.clone()) {
                return Err(CacheError::IndexCorruption(format!(
                    "duplicate record {}",
                    record.id
                )));
            }
            state.push(record.id, record.embedding);
        }

        Ok(state)
    }

    fn validate(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimension {
            return Err(CacheError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        if embedding.iter().any(|value| !value.is_finite()) {
            return Err(CacheError::InvalidEmbedding(
                "embedding contains NaN or infinite values".to_string(),
            ));
        }
        Ok(())
    }
}

/// Cosine similarity of two equal-length vectors, clamped to [-1, 1].
///
/// Zero vectors have similarity 0 with everything.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    cosine_with_norms(a, l2_norm(a), b, l2_norm(b))
}

fn cosine_with_norms(a: &[f32], norm_a: f32, b: &[f32], norm_b: f32) -> f32 {
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn record_checksum(id: &str, embedding: &[f32]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    hasher.update([0u8]);
    for value in embedding {
        hasher.update(value.to_le_bytes());
    }
    hex::encode(hasher.finalize())
}

fn snapshot_config() -> impl bincode::config::Config {
    bincode::config::standard().with_limit::<SNAPSHOT_DECODE_LIMIT>()
}
