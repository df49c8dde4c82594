//! Query embedding and top-K retrieval.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::config::RagConfig;
use crate::document::RetrievalResult;
use crate::embedding::{EmbeddingProvider, embed_with_deadline};
use crate::error::{RagError, Result};
use crate::index::VectorIndex;

/// Finds the chunks most relevant to a question.
///
/// Queries are embedded with the same provider that ingestion used; the
/// index refuses vectors from any other model.
#[derive(Clone)]
pub struct Retriever {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    similarity_threshold: f32,
    embedding_timeout: Duration,
}

impl Retriever {
    /// Create a retriever over `index`.
    pub fn new(index: Arc<VectorIndex>, embedder: Arc<dyn EmbeddingProvider>, config: &RagConfig) -> Self {
        Self {
            index,
            embedder,
            similarity_threshold: config.similarity_threshold,
            embedding_timeout: config.embedding_timeout,
        }
    }

    /// The index this retriever reads.
    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    /// Check a query before any work is done.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidQuery`] for a blank query or `k == 0`.
    pub fn validate(query: &str, k: usize) -> Result<()> {
        if query.trim().is_empty() {
            return Err(RagError::InvalidQuery("query must not be empty".into()));
        }
        if k == 0 {
            return Err(RagError::InvalidQuery("k must be at least 1".into()));
        }
        Ok(())
    }

    /// Embed `query` within the embedding deadline.
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let mut vectors =
            embed_with_deadline(self.embedder.as_ref(), &[query], self.embedding_timeout).await?;
        vectors.pop().ok_or_else(|| RagError::EmbeddingService {
            provider: self.embedder.model_id().to_string(),
            message: "empty response".into(),
        })
    }

    /// Search the index with an already-embedded query and apply the
    /// similarity threshold.
    pub async fn search(&self, vector: &[f32], k: usize) -> Result<RetrievalResult> {
        if k == 0 {
            return Err(RagError::InvalidQuery("k must be at least 1".into()));
        }
        let mut results = self.index.search(self.embedder.model_id(), vector, k).await?;
        results.retain(|r| r.score >= self.similarity_threshold);
        Ok(results)
    }

    /// Embed `query` and return up to `k` chunks in descending score order.
    ///
    /// An empty index yields an empty result, not an error.
    ///
    /// # Errors
    ///
    /// - [`RagError::InvalidQuery`] for a blank query or `k == 0`
    /// - [`RagError::EmbeddingService`] / [`RagError::EmbeddingTimeout`] if
    ///   the query cannot be embedded
    /// - [`RagError::Configuration`] if the provider does not match the index
    #[instrument(skip(self, query), fields(query_len = query.len()))]
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<RetrievalResult> {
        Self::validate(query, k)?;
        let vector = self.embed_query(query).await?;
        let results = self.search(&vector, k).await?;
        debug!(results = results.len(), "retrieval complete");
        Ok(results)
    }
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("embedding_model", &self.embedder.model_id())
            .field("similarity_threshold", &self.similarity_threshold)
            .finish()
    }
}
