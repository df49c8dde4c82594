//! Error types for docqa-model.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while talking to a language model.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    /// The model service could not be reached.
    #[error("Model service unavailable ({provider}): {message}")]
    Unavailable { provider: String, message: String },

    /// The request was rejected or failed in transit.
    #[error("Model request failed ({provider}): {message}")]
    Request { provider: String, message: String },

    /// The response could not be decoded.
    #[error("Malformed model response ({provider}): {message}")]
    Response { provider: String, message: String },

    /// The generation did not finish before its deadline.
    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),

    /// The caller cancelled the generation.
    #[error("Generation cancelled")]
    Cancelled,

    /// Invalid configuration
    #[error("Invalid model configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for ModelError
pub type Result<T> = std::result::Result<T, ModelError>;
