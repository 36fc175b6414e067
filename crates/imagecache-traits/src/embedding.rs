//! Embedding provider abstraction.

use async_trait::async_trait;

use crate::error::Result;

/// Turns prompt text into a fixed-dimension vector.
///
/// Failures must surface as `CacheError::Provider`; the cache treats them as
/// a forced miss rather than a pipeline failure.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embedding for a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for a batch of texts.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }

    /// Get embedding dimension.
    fn dimension(&self) -> usize;

    /// Get model name.
    fn model_name(&self) -> &str;

    /// Normalize text before embedding (optional).
    fn normalize_text(&self, text: &str) -> String {
        text.trim()
            .chars()
            .filter(|c| !c.is_control())
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    #[async_trait]
    impl EmbeddingProvider for Fixed {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(vec![text.len() as f32, 1.0])
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    #[test]
    fn test_normalize_text_collapses_whitespace() {
        let normalized = Fixed.normalize_text("  a dark\t\tforest \n at night ");
        assert_eq!(normalized, "a dark forest at night");
    }

    #[tokio::test]
    async fn test_default_embed_batch_preserves_order() {
        let texts = vec!["a".to_string(), "abc".to_string()];
        let embeddings = Fixed.embed_batch(&texts).await.unwrap();
        assert_eq!(embeddings, vec![vec![1.0, 1.0], vec![3.0, 1.0]]);
    }
}
