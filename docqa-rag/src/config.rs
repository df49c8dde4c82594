//! Configuration for ingestion, retrieval and generation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chunking::{Chunker, FixedSizeChunker, MarkdownChunker, RecursiveChunker};
use crate::error::{RagError, Result};

/// Which [`Chunker`] ingestion uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingStrategy {
    /// Fixed character windows.
    Fixed,
    /// Paragraph, then sentence, then word boundaries.
    #[default]
    Recursive,
    /// Markdown header sections, split further when too long.
    Markdown,
}

impl ChunkingStrategy {
    /// Build the chunker for this strategy.
    pub fn build(self, chunk_size: usize, chunk_overlap: usize) -> Arc<dyn Chunker> {
        match self {
            Self::Fixed => Arc::new(FixedSizeChunker::new(chunk_size, chunk_overlap)),
            Self::Recursive => Arc::new(RecursiveChunker::new(chunk_size, chunk_overlap)),
            Self::Markdown => Arc::new(MarkdownChunker::new(chunk_size, chunk_overlap)),
        }
    }
}

impl std::str::FromStr for ChunkingStrategy {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "recursive" => Ok(Self::Recursive),
            "markdown" => Ok(Self::Markdown),
            other => Err(RagError::Configuration(format!("unknown chunking strategy '{other}'"))),
        }
    }
}

/// Configuration parameters for the document QA pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagConfig {
    /// Maximum chunk size in bytes of text.
    pub chunk_size: usize,
    /// Number of overlapping bytes between consecutive chunks.
    pub chunk_overlap: usize,
    /// How documents are split.
    pub chunking: ChunkingStrategy,
    /// Number of chunks retrieved per question.
    pub top_k: usize,
    /// Minimum similarity score for results (results below this are filtered out).
    pub similarity_threshold: f32,
    /// Maximum characters in a prompt, system prompt and question included.
    pub context_budget: usize,
    /// Chunks embedded per provider call during ingestion.
    pub embedding_batch_size: usize,
    /// Deadline for each embedding call.
    pub embedding_timeout: Duration,
    /// Deadline for a whole answer generation.
    pub generation_timeout: Duration,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
            chunking: ChunkingStrategy::default(),
            top_k: 4,
            similarity_threshold: 0.0,
            context_budget: 6000,
            embedding_batch_size: 32,
            embedding_timeout: Duration::from_secs(30),
            generation_timeout: Duration::from_secs(120),
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Check that the parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] if:
    /// - `chunk_size == 0` or `chunk_overlap >= chunk_size`
    /// - `top_k == 0`
    /// - `context_budget == 0` or `embedding_batch_size == 0`
    /// - either timeout is zero
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::Configuration("chunk_size must be greater than zero".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::Configuration(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(RagError::Configuration("top_k must be greater than zero".into()));
        }
        if self.context_budget == 0 {
            return Err(RagError::Configuration("context_budget must be greater than zero".into()));
        }
        if self.embedding_batch_size == 0 {
            return Err(RagError::Configuration(
                "embedding_batch_size must be greater than zero".into(),
            ));
        }
        if self.embedding_timeout.is_zero() || self.generation_timeout.is_zero() {
            return Err(RagError::Configuration("timeouts must be non-zero".into()));
        }
        Ok(())
    }

    /// The chunker described by this configuration.
    pub fn chunker(&self) -> Arc<dyn Chunker> {
        self.chunking.build(self.chunk_size, self.chunk_overlap)
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the maximum chunk size.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the chunking strategy.
    pub fn chunking(mut self, strategy: ChunkingStrategy) -> Self {
        self.config.chunking = strategy;
        self
    }

    /// Set the number of chunks retrieved per question.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the minimum similarity threshold for filtering results.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = threshold;
        self
    }

    /// Set the prompt context budget in characters.
    pub fn context_budget(mut self, budget: usize) -> Self {
        self.config.context_budget = budget;
        self
    }

    /// Set how many chunks are embedded per provider call.
    pub fn embedding_batch_size(mut self, size: usize) -> Self {
        self.config.embedding_batch_size = size;
        self
    }

    /// Set the deadline for each embedding call.
    pub fn embedding_timeout(mut self, timeout: Duration) -> Self {
        self.config.embedding_timeout = timeout;
        self
    }

    /// Set the deadline for answer generation.
    pub fn generation_timeout(mut self, timeout: Duration) -> Self {
        self.config.generation_timeout = timeout;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// See [`RagConfig::validate`].
    pub fn build(self) -> Result<RagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Process-level settings, read from the environment.
///
/// | Variable | Default |
/// |----------|---------|
/// | `MODEL` | `mistral` |
/// | `EMBEDDINGS_MODEL_NAME` | `all-minilm` |
/// | `EMBEDDINGS_DIMENSIONS` | `384` |
/// | `PERSIST_DIRECTORY` | `db` |
/// | `SOURCE_DIRECTORY` | `source_documents` |
/// | `TARGET_SOURCE_CHUNKS` | `4` |
/// | `CHUNK_SIZE` / `CHUNK_OVERLAP` | `500` / `50` |
/// | `OLLAMA_HOST` | `http://localhost:11434` |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Language model tag.
    pub model: String,
    /// Embedding model tag; recorded in the index.
    pub embeddings_model: String,
    /// Dimensionality of the embedding model.
    pub embedding_dimensions: usize,
    /// Directory holding the persisted index.
    pub persist_directory: PathBuf,
    /// Directory holding uploaded source documents.
    pub source_directory: PathBuf,
    /// Base URL of the Ollama server.
    pub ollama_host: String,
    /// Pipeline parameters.
    pub rag: RagConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: "mistral".to_string(),
            embeddings_model: "all-minilm".to_string(),
            embedding_dimensions: 384,
            persist_directory: PathBuf::from("db"),
            source_directory: PathBuf::from("source_documents"),
            ollama_host: "http://localhost:11434".to_string(),
            rag: RagConfig::default(),
        }
    }
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`, falling back to defaults for unset keys.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] when a numeric variable does not
    /// parse or the resulting [`RagConfig`] is inconsistent.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();
        let text = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(model) = text("MODEL") {
            settings.model = model;
        }
        if let Some(model) = text("EMBEDDINGS_MODEL_NAME") {
            settings.embeddings_model = model;
        }
        if let Some(dir) = text("PERSIST_DIRECTORY") {
            settings.persist_directory = PathBuf::from(dir);
        }
        if let Some(dir) = text("SOURCE_DIRECTORY") {
            settings.source_directory = PathBuf::from(dir);
        }
        if let Some(host) = text("OLLAMA_HOST") {
            settings.ollama_host = host;
        }

        let number = |key: &str| -> Result<Option<usize>> {
            text(key)
                .map(|value| {
                    value.parse::<usize>().map_err(|e| {
                        RagError::Configuration(format!("{key} must be a whole number, got '{value}': {e}"))
                    })
                })
                .transpose()
        };
        if let Some(dimensions) = number("EMBEDDINGS_DIMENSIONS")? {
            settings.embedding_dimensions = dimensions;
        }
        if let Some(k) = number("TARGET_SOURCE_CHUNKS")? {
            settings.rag.top_k = k;
        }
        if let Some(size) = number("CHUNK_SIZE")? {
            settings.rag.chunk_size = size;
        }
        if let Some(overlap) = number("CHUNK_OVERLAP")? {
            settings.rag.chunk_overlap = overlap;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Check the settings and the embedded [`RagConfig`].
    pub fn validate(&self) -> Result<()> {
        if self.embedding_dimensions == 0 {
            return Err(RagError::Configuration(
                "embedding dimensions must be greater than zero".into(),
            ));
        }
        if self.embeddings_model.trim().is_empty() {
            return Err(RagError::Configuration("embedding model must not be empty".into()));
        }
        self.rag.validate()
    }
}
