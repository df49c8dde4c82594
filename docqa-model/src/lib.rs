//! # docqa-model
//!
//! Language-model providers for docqa.
//!
//! ## Overview
//!
//! Every provider implements [`Llm`], whose only contract is "turn a
//! [`GenerationRequest`] into a [`TokenStream`]". The stream is lazy, finite,
//! not restartable, and carries a [`CancelHandle`] so a caller can stop a
//! generation mid-flight and release the underlying request.
//!
//! - [`MockLlm`] - scripted model for tests and offline use
//! - [`OllamaModel`] - local models served by Ollama (feature `ollama`)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use docqa_model::{GenerationRequest, Llm, MockLlm};
//! use futures::StreamExt;
//!
//! let model = MockLlm::fixed("Paris is the capital of France.");
//! let mut tokens = model.generate(GenerationRequest::new("What is the capital?")).await?;
//! while let Some(token) = tokens.next().await {
//!     print!("{}", token?);
//! }
//! ```

mod error;
mod llm;
pub mod mock;
#[cfg(feature = "ollama")]
pub mod ollama;
mod stream;

pub use error::{ModelError, Result};
pub use llm::{GenerationRequest, Llm};
pub use mock::{MockBehavior, MockLlm};
#[cfg(feature = "ollama")]
pub use ollama::{OllamaConfig, OllamaModel};
pub use stream::{CancelHandle, TokenStream};
