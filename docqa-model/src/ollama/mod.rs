//! Ollama provider for locally served models.
//!
//! Generation goes through [`ollama_rs`]'s streaming completion API; each
//! streamed response batch is flattened into the [`TokenStream`](crate::TokenStream).
//!
//! # Example
//!
//! ```rust,ignore
//! use docqa_model::ollama::{OllamaConfig, OllamaModel};
//!
//! let model = OllamaModel::new(OllamaConfig::new("mistral"))?;
//! let tokens = model.generate(GenerationRequest::new("Hello")).await?;
//! ```

mod client;
mod config;

pub use client::OllamaModel;
pub use config::{DEFAULT_OLLAMA_HOST, OllamaConfig};
