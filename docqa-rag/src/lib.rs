//! # docqa-rag
//!
//! Question answering over a private document collection.
//!
//! ## Overview
//!
//! Documents are uploaded into a [`DocumentLibrary`], parsed to text,
//! split into overlapping chunks, embedded, and committed to a persistent
//! [`VectorIndex`] by an [`Ingestor`]. A question is embedded with the same
//! [`EmbeddingProvider`], the [`Retriever`] finds the closest chunks, and the
//! [`AnswerGenerator`] streams an answer grounded on them from an
//! [`Llm`](docqa_model::Llm). [`DocQa`] wraps the whole flow and runs each
//! question through the [`QueryState`] machine.
//!
//! ## Features
//!
//! - `ollama` - [`OllamaEmbeddingProvider`] and the Ollama language model
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use docqa_model::MockLlm;
//! use docqa_rag::{DocQa, HashingEmbeddingProvider, IngestMode, Settings};
//!
//! let qa = DocQa::open(
//!     &Settings::default(),
//!     Arc::new(HashingEmbeddingProvider::new(384)),
//!     Arc::new(MockLlm::echo()),
//! )
//! .await?;
//! qa.upload("france.txt", b"The capital of France is Paris.").await?;
//! let report = qa.ingest(IngestMode::Incremental).await?;
//! println!("{}", report.summary());
//!
//! let answer = qa.ask("What is the capital of France?").await?.finish().await?;
//! println!("{} (sources: {:?})", answer.text, answer.sources());
//! ```

pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod generator;
pub mod index;
pub mod ingest;
pub mod library;
#[cfg(feature = "ollama")]
pub mod ollama;
pub mod parser;
pub mod query;
pub mod retriever;
pub mod session;

pub use chunking::{Chunker, FixedSizeChunker, MarkdownChunker, RecursiveChunker, chunk_id};
pub use config::{ChunkingStrategy, RagConfig, RagConfigBuilder, Settings};
pub use document::{
    Answer, Chunk, Document, DocumentFormat, RetrievalResult, SearchResult, SourceDocument,
    content_hash,
};
pub use embedding::{EmbeddingProvider, HashingEmbeddingProvider};
pub use error::{QueryFailure, RagError, Result};
pub use generator::{AnswerGenerator, AnswerStream, NO_CONTEXT_ANSWER};
pub use index::{INDEX_FILE, IndexSnapshot, IndexTransaction, VectorIndex};
pub use ingest::{IngestMode, IngestReport, Ingestor, SkippedDocument};
pub use library::{DocumentInfo, DocumentLibrary};
#[cfg(feature = "ollama")]
pub use ollama::OllamaEmbeddingProvider;
pub use parser::{DefaultParser, DocumentParser};
pub use query::{QueryLifecycle, QueryState};
pub use retriever::Retriever;
pub use session::{DocQa, DocQaBuilder, QueryHandle};
