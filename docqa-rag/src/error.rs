//! Error types for the `docqa-rag` crate.

use std::path::PathBuf;
use std::time::Duration;

use docqa_model::ModelError;
use thiserror::Error;

use crate::document::RetrievalResult;
use crate::query::QueryState;

/// Errors that can occur in document QA operations.
///
/// Variants are scoped by how far their damage reaches: [`Parse`](RagError::Parse)
/// affects one document and never aborts an ingestion run, embedding and
/// generation failures abort the current operation only, and
/// [`IndexCorruption`](RagError::IndexCorruption) requires a rebuild.
#[derive(Debug, Error)]
pub enum RagError {
    /// A document could not be turned into text.
    #[error("Parse error ({path}): {message}")]
    Parse {
        /// Source path of the document.
        path: String,
        /// A description of the failure.
        message: String,
    },

    /// The embedding provider failed.
    #[error("Embedding error ({provider}): {message}")]
    EmbeddingService {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The embedding provider did not answer before the deadline.
    #[error("Embedding timed out ({provider}) after {timeout:?}")]
    EmbeddingTimeout {
        /// The embedding provider that timed out.
        provider: String,
        /// The deadline that expired.
        timeout: Duration,
    },

    /// The persisted index cannot be trusted and must be rebuilt.
    #[error("Index corrupted ({path}): {message}")]
    IndexCorruption {
        /// The index file.
        path: PathBuf,
        /// A description of the failure.
        message: String,
    },

    /// The language model did not finish before the deadline.
    #[error("Generation timed out after {0:?}")]
    GenerationTimeout(Duration),

    /// The language model failed or could not be reached.
    #[error("Generation error: {0}")]
    GenerationService(String),

    /// Invalid or inconsistent configuration, including embedding model or
    /// dimension mismatches between an index and its provider.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// The query cannot be answered as asked.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// An uploaded document was rejected.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// The named document does not exist in the library.
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    /// A query lifecycle transition that the state machine forbids.
    #[error("Invalid query transition from {from} to {to}")]
    InvalidTransition {
        /// Current state.
        from: QueryState,
        /// Requested state.
        to: QueryState,
    },

    /// Filesystem failure.
    #[error("I/O error ({path}): {source}")]
    Io {
        /// The path being accessed.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl RagError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    /// Whether this error leaves the index unusable until it is rebuilt.
    pub fn is_fatal_to_process(&self) -> bool {
        matches!(self, Self::IndexCorruption { .. })
    }

    /// A short message suitable for showing to an end user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Parse { path, message } => format!("Could not read '{path}': {message}"),
            Self::EmbeddingService { provider, .. } | Self::EmbeddingTimeout { provider, .. } => {
                format!("The embedding service ({provider}) is unavailable: {self}")
            }
            Self::IndexCorruption { .. } => {
                format!("The document index is damaged and must be rebuilt: {self}")
            }
            Self::GenerationTimeout(_) => "The language model took too long to answer.".to_string(),
            Self::GenerationService(message) => {
                format!("The language model failed to answer: {message}")
            }
            Self::Cancelled => "The request was cancelled.".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<ModelError> for RagError {
    fn from(error: ModelError) -> Self {
        match error {
            ModelError::Timeout(timeout) => Self::GenerationTimeout(timeout),
            ModelError::Cancelled => Self::Cancelled,
            ModelError::InvalidConfig(message) => Self::Configuration(message),
            other => Self::GenerationService(other.to_string()),
        }
    }
}

/// A failed query, carrying whatever retrieval had completed so the caller
/// can still show the sources that were found.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct QueryFailure {
    /// What went wrong.
    #[source]
    pub error: RagError,
    /// The retrieval result, if retrieval finished before the failure.
    pub retrieval: Option<RetrievalResult>,
}

impl QueryFailure {
    pub(crate) fn new(error: RagError, retrieval: Option<RetrievalResult>) -> Self {
        Self { error, retrieval }
    }
}

impl From<RagError> for QueryFailure {
    fn from(error: RagError) -> Self {
        Self { error, retrieval: None }
    }
}

/// A convenience result type for docqa operations.
pub type Result<T> = std::result::Result<T, RagError>;
