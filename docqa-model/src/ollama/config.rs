use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Where Ollama listens unless told otherwise.
pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

/// Connection and sampling settings for [`OllamaModel`](super::OllamaModel).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL of the Ollama server.
    pub host: String,
    /// Model tag, e.g. `mistral` or `llama3.1:8b`.
    pub model: String,
    /// Default sampling temperature.
    pub temperature: Option<f32>,
    /// Context window passed as `num_ctx`.
    pub num_ctx: Option<u32>,
}

impl OllamaConfig {
    /// Config for `model` on the default host.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            host: DEFAULT_OLLAMA_HOST.to_string(),
            model: model.into(),
            temperature: None,
            num_ctx: None,
        }
    }

    /// Set the server base URL.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the default sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the context window size.
    pub fn with_num_ctx(mut self, num_ctx: u32) -> Self {
        self.num_ctx = Some(num_ctx);
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(ModelError::InvalidConfig("model must not be empty".to_string()));
        }
        if !(self.host.starts_with("http://") || self.host.starts_with("https://")) {
            return Err(ModelError::InvalidConfig(format!(
                "host must be an http(s) URL, got '{}'",
                self.host
            )));
        }
        Ok(())
    }
}
