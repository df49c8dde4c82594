//! OllamaModel - streaming generation through `ollama-rs`.

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use ollama_rs::Ollama;
use ollama_rs::generation::completion::GenerationResponse;
use ollama_rs::generation::completion::request::GenerationRequest as OllamaRequest;
use ollama_rs::models::ModelOptions;
use tracing::{debug, error, instrument};

use super::config::OllamaConfig;
use crate::error::{ModelError, Result};
use crate::llm::{GenerationRequest, Llm};
use crate::stream::TokenStream;

const PROVIDER: &str = "Ollama";

/// An [`Llm`] served by a local or remote Ollama instance.
pub struct OllamaModel {
    client: Ollama,
    config: OllamaConfig,
}

impl OllamaModel {
    /// Create a client. No request is made until [`generate`](Llm::generate).
    pub fn new(config: OllamaConfig) -> Result<Self> {
        config.validate()?;
        let client = Ollama::try_new(config.host.trim_end_matches('/'))
            .map_err(|e| ModelError::InvalidConfig(format!("invalid Ollama host '{}': {e}", config.host)))?;
        Ok(Self { client, config })
    }

    /// Get the model configuration
    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    /// Check that the server answers at all.
    pub async fn health_check(&self) -> Result<()> {
        self.client.list_local_models().await.map(|_| ()).map_err(|e| ModelError::Unavailable {
            provider: PROVIDER.into(),
            message: format!("{e:?}"),
        })
    }

    fn request(&self, request: GenerationRequest) -> OllamaRequest {
        let mut options = ModelOptions::default();
        if let Some(temperature) = request.temperature.or(self.config.temperature) {
            options = options.temperature(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            options = options.num_predict(i32::try_from(max_tokens).unwrap_or(i32::MAX));
        }
        if let Some(num_ctx) = self.config.num_ctx {
            options = options.num_ctx(u64::from(num_ctx));
        }

        let mut ollama_request = OllamaRequest::new(self.config.model.clone(), request.prompt).options(options);
        if let Some(system) = request.system {
            ollama_request = ollama_request.system(system);
        }
        ollama_request
    }
}

/// Tokens carried by one streamed batch, and whether the model is done.
fn batch_tokens(batch: Vec<GenerationResponse>) -> (Vec<String>, bool) {
    let done = batch.iter().any(|response| response.done);
    let tokens = batch.into_iter().map(|response| response.response).filter(|token| !token.is_empty()).collect();
    (tokens, done)
}

#[async_trait]
impl Llm for OllamaModel {
    fn name(&self) -> &str {
        &self.config.model
    }

    #[instrument(skip(self, request), fields(model = %self.config.model))]
    async fn generate(&self, request: GenerationRequest) -> Result<TokenStream> {
        debug!(prompt_len = request.prompt.len(), "starting generation");

        let mut responses = self.client.generate_stream(self.request(request)).await.map_err(|e| {
            error!(error = ?e, "generate request failed");
            ModelError::Unavailable { provider: PROVIDER.into(), message: format!("{e:?}") }
        })?;

        let stream = try_stream! {
            while let Some(batch) = responses.next().await {
                let batch = batch.map_err(|e| ModelError::Response {
                    provider: PROVIDER.into(),
                    message: format!("stream interrupted: {e:?}"),
                })?;
                let (tokens, done) = batch_tokens(batch);
                for token in tokens {
                    yield token;
                }
                if done {
                    break;
                }
            }
        };

        Ok(TokenStream::new(stream))
    }
}

impl std::fmt::Debug for OllamaModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaModel").field("config", &self.config).finish()
    }
}
