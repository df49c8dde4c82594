//! Embedding provider trait for generating vector embeddings from text.

use std::time::Duration;

use async_trait::async_trait;
use tracing::error;

use crate::error::{RagError, Result};

/// A provider that generates vector embeddings from text input.
///
/// Implementations wrap specific embedding backends (Ollama, the local
/// hashing model, etc.) behind a unified async interface. The default
/// [`embed_batch`](EmbeddingProvider::embed_batch) implementation calls
/// [`embed`](EmbeddingProvider::embed) sequentially; backends that support
/// native batching should override it.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::EmbeddingProvider;
///
/// let provider = HashingEmbeddingProvider::new(256);
/// let embedding = provider.embed("hello world").await?;
/// assert_eq!(embedding.len(), provider.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for a single text input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embedding vectors for a batch of text inputs, in input order.
    ///
    /// The default implementation calls [`embed`](EmbeddingProvider::embed)
    /// sequentially for each input.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// Identifier of the embedding model, recorded in the index so vectors
    /// from different models are never mixed.
    fn model_id(&self) -> &str;
}

/// Embed `texts` with `provider`, bounded by `timeout`, and check that one
/// vector of the provider's dimensionality came back per input.
pub(crate) async fn embed_with_deadline(
    provider: &dyn EmbeddingProvider,
    texts: &[&str],
    timeout: Duration,
) -> Result<Vec<Vec<f32>>> {
    let vectors = tokio::time::timeout(timeout, provider.embed_batch(texts))
        .await
        .map_err(|_| {
            error!(provider = provider.model_id(), ?timeout, "embedding timed out");
            RagError::EmbeddingTimeout { provider: provider.model_id().to_string(), timeout }
        })??;

    if vectors.len() != texts.len() {
        return Err(RagError::EmbeddingService {
            provider: provider.model_id().to_string(),
            message: format!("expected {} embeddings, got {}", texts.len(), vectors.len()),
        });
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != provider.dimensions()) {
        return Err(RagError::Configuration(format!(
            "embedding model '{}' returned {} dimensions, expected {}",
            provider.model_id(),
            bad.len(),
            provider.dimensions()
        )));
    }
    Ok(vectors)
}

/// An offline bag-of-words embedding based on feature hashing.
///
/// Each lowercase alphanumeric word is hashed (FNV-1a) into one of
/// `dimensions` buckets and the resulting count vector is L2-normalised, so
/// similarities are never negative. Texts sharing words land close together under cosine
/// similarity, which is enough for tests and for running without an
/// embedding server.
#[derive(Debug, Clone)]
pub struct HashingEmbeddingProvider {
    dimensions: usize,
    model_id: String,
}

impl HashingEmbeddingProvider {
    /// Create a provider producing vectors of `dimensions` components.
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self { dimensions, model_id: format!("hashing-bow-{dimensions}") }
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let lowered = text.to_lowercase();
        for word in lowered.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            let hash = fnv1a(word.as_bytes());
            let bucket = (hash % self.dimensions as u64) as usize;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vector(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn vectors_are_normalised_and_deterministic() {
        let provider = HashingEmbeddingProvider::new(64);
        let a = provider.embed("The capital of France is Paris").await.unwrap();
        let b = provider.embed("the CAPITAL of france, is paris!").await.unwrap();
        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn shared_words_score_higher_than_unrelated_text() {
        let provider = HashingEmbeddingProvider::new(256);
        let query = provider.embed("capital of France").await.unwrap();
        let related = provider.embed("Paris is the capital of France.").await.unwrap();
        let unrelated = provider.embed("Rust borrow checker lifetimes").await.unwrap();
        assert!(cosine(&query, &related) > cosine(&query, &unrelated));
    }

    struct Stalled;

    #[async_trait]
    impl EmbeddingProvider for Stalled {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            std::future::pending().await
        }

        fn dimensions(&self) -> usize {
            4
        }

        fn model_id(&self) -> &str {
            "stalled"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_provider_hits_the_deadline() {
        let err = embed_with_deadline(&Stalled, &["x"], Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, RagError::EmbeddingTimeout { timeout, .. } if timeout == Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn empty_text_embeds_to_zero_vector_and_batches_keep_order() {
        let provider = HashingEmbeddingProvider::new(8);
        assert!(provider.embed("").await.unwrap().iter().all(|v| *v == 0.0));
        let batch = provider.embed_batch(&["alpha", "beta"]).await.unwrap();
        assert_eq!(batch[0], provider.embed("alpha").await.unwrap());
        assert_eq!(batch[1], provider.embed("beta").await.unwrap());
        assert_eq!(provider.model_id(), "hashing-bow-8");
    }
}
