//! Ollama embedding provider on `ollama-rs`'s `generate_embeddings`.
//!
//! This module is only available when the `ollama` feature is enabled.

use async_trait::async_trait;
use docqa_model::ollama::DEFAULT_OLLAMA_HOST;
use ollama_rs::Ollama;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};
use tracing::{debug, error};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

const PROVIDER: &str = "Ollama";

/// An [`EmbeddingProvider`] backed by a local Ollama server.
///
/// Ollama does not report a model's dimensionality up front, so it is
/// configured explicitly and every returned vector is checked against it.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::OllamaEmbeddingProvider;
///
/// let provider = OllamaEmbeddingProvider::new("all-minilm", 384)?
///     .with_host("http://localhost:11434")?;
/// let embedding = provider.embed("hello world").await?;
/// ```
#[derive(Clone)]
pub struct OllamaEmbeddingProvider {
    client: Ollama,
    host: String,
    model: String,
    dimensions: usize,
}

fn connect(host: &str) -> Result<Ollama> {
    Ollama::try_new(host)
        .map_err(|e| RagError::Configuration(format!("invalid Ollama host '{host}': {e}")))
}

impl OllamaEmbeddingProvider {
    /// Create a provider for `model` on the default host.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] if the model name is empty or
    /// `dimensions` is zero.
    pub fn new(model: impl Into<String>, dimensions: usize) -> Result<Self> {
        let model = model.into();
        if model.trim().is_empty() {
            return Err(RagError::Configuration("embedding model must not be empty".into()));
        }
        if dimensions == 0 {
            return Err(RagError::Configuration("embedding dimensions must be non-zero".into()));
        }
        let client = connect(DEFAULT_OLLAMA_HOST)?;
        Ok(Self { client, host: DEFAULT_OLLAMA_HOST.to_string(), model, dimensions })
    }

    /// Set the Ollama base URL.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] if `host` is not an http(s) URL.
    pub fn with_host(mut self, host: impl Into<String>) -> Result<Self> {
        let host = host.into();
        if !(host.starts_with("http://") || host.starts_with("https://")) {
            return Err(RagError::Configuration(format!(
                "Ollama host must be an http(s) URL, got '{host}'"
            )));
        }
        self.host = host.trim_end_matches('/').to_string();
        self.client = connect(&self.host)?;
        Ok(self)
    }

    /// The configured base URL.
    pub fn host(&self) -> &str {
        &self.host
    }

    fn service_error(&self, message: String) -> RagError {
        RagError::EmbeddingService { provider: format!("{PROVIDER}/{}", self.model), message }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!(provider = PROVIDER, text_len = text.len(), "embedding single text");

        let results = self.embed_batch(&[text]).await?;
        results.into_iter().next().ok_or_else(|| self.service_error("empty response".into()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(provider = PROVIDER, batch_size = texts.len(), model = %self.model, "embedding batch");

        let input = EmbeddingsInput::Multiple(texts.iter().map(|t| (*t).to_string()).collect());
        let response = self
            .client
            .generate_embeddings(GenerateEmbeddingsRequest::new(self.model.clone(), input))
            .await
            .map_err(|e| {
                error!(provider = PROVIDER, error = ?e, "embedding request failed");
                self.service_error(format!("request to {} failed: {e:?}", self.host))
            })?;

        if response.embeddings.len() != texts.len() {
            return Err(self.service_error(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                response.embeddings.len()
            )));
        }
        if let Some(bad) = response.embeddings.iter().find(|v| v.len() != self.dimensions) {
            return Err(RagError::Configuration(format!(
                "model '{}' returned {}-dimensional vectors but {} were configured",
                self.model,
                bad.len(),
                self.dimensions
            )));
        }

        Ok(response.embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

impl std::fmt::Debug for OllamaEmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaEmbeddingProvider")
            .field("host", &self.host)
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}
