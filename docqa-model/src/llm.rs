//! The provider-neutral generation contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::stream::TokenStream;

/// A single prompt sent to a language model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The user prompt, including any grounding context.
    pub prompt: String,
    /// Optional system instruction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Sampling temperature override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Upper bound on generated tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    /// Create a request with only a prompt set.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self { prompt: prompt.into(), ..Self::default() }
    }

    /// Set the system instruction.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the maximum number of generated tokens.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// A language model that produces its answer as a stream of tokens.
///
/// Implementations must start delivering tokens as soon as the backend
/// produces them; callers rely on incremental delivery for display. An error
/// returned from [`generate`](Llm::generate) means the request never started
/// (for example the service is unreachable); errors after that point are
/// yielded as items of the stream.
#[async_trait]
pub trait Llm: Send + Sync {
    /// Identifier of the underlying model, e.g. `mistral`.
    fn name(&self) -> &str;

    /// Start a generation and return its token stream.
    async fn generate(&self, request: GenerationRequest) -> Result<TokenStream>;
}
