//! Hit/miss decisions over the vector index and metadata store.

use imagecache_storage::{CacheEntry, MetadataStore, VectorIndex};
use imagecache_traits::Result;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Hit { entry: CacheEntry, score: f32 },
    Miss,
}

/// Applies the similarity threshold, tag overlap and tie-break rules.
///
/// Deciding has no side effects; usage is recorded by the caller once a hit
/// is accepted.
#[derive(Clone)]
pub struct CacheDecisionEngine {
    index: Arc<VectorIndex>,
    metadata: MetadataStore,
    threshold: f32,
    top_k: usize,
}

struct Candidate {
    rank: usize,
    entry: CacheEntry,
    score: f32,
}

impl CacheDecisionEngine {
    pub fn new(
        index: Arc<VectorIndex>,
        metadata: MetadataStore,
        threshold: f32,
        top_k: usize,
    ) -> Self {
        Self {
            index,
            metadata,
            threshold,
            top_k: top_k.max(1),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn decide(&self, embedding: &[f32], tags: &BTreeSet<String>) -> Result<Decision> {
        let neighbours = self.index.query(embedding, self.top_k)?;

        let mut candidates = Vec::new();
        for (rank, scored) in neighbours.into_iter().enumerate() {
            if scored.score < self.threshold {
                continue;
            }
            // Removed concurrently; never report a hit without a record.
            let Some(entry) = self.metadata.get(&scored.id)? else {
                debug!(entry_id = %scored.id, "Skipping candidate without metadata");
                continue;
            };
            if !tags_overlap(tags, &entry.tags) {
                continue;
            }
            candidates.push(Candidate {
                rank,
                entry,
                score: scored.score,
            });
        }

        let best = candidates.into_iter().min_by(prefer);
        Ok(match best {
            Some(candidate) => {
                debug!(
                    entry_id = %candidate.entry.id,
                    score = candidate.score,
                    "Cache decision: hit"
                );
                Decision::Hit {
                    entry: candidate.entry,
                    score: candidate.score,
                }
            }
            None => {
                debug!(threshold = self.threshold, "Cache decision: miss");
                Decision::Miss
            }
        })
    }
}

/// An empty query or an untagged entry matches anything.
fn tags_overlap(query: &BTreeSet<String>, entry: &BTreeSet<String>) -> bool {
    query.is_empty() || entry.is_empty() || !query.is_disjoint(entry)
}

/// Highest score, then lowest usage, then earliest creation, then index order.
fn prefer(a: &Candidate, b: &Candidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then(a.entry.usage_count.cmp(&b.entry.usage_count))
        .then(a.entry.created_at.cmp(&b.entry.created_at))
        .then(a.rank.cmp(&b.rank))
}
