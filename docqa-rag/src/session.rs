//! The document QA session facade.
//!
//! [`DocQa`] ties the library, index, retriever, generator and ingestor
//! together behind one handle. Instances are independent: several may be
//! open in one process, each with its own index.
//!
//! # Example
//!
//! ```rust,ignore
//! use docqa_rag::{DocQa, HashingEmbeddingProvider, IngestMode, Settings};
//! use docqa_model::MockLlm;
//!
//! let settings = Settings::from_env()?;
//! let qa = DocQa::open(&settings, Arc::new(HashingEmbeddingProvider::new(384)), Arc::new(MockLlm::echo())).await?;
//! qa.upload("france.txt", b"The capital of France is Paris.").await?;
//! qa.ingest(IngestMode::Incremental).await?;
//!
//! let mut query = qa.ask("What is the capital of France?").await?;
//! while let Some(token) = query.next_token().await {
//!     print!("{token}");
//! }
//! let answer = query.finish().await?;
//! ```

use std::sync::Arc;

use docqa_model::{CancelHandle, Llm};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::chunking::Chunker;
use crate::config::{RagConfig, Settings};
use crate::document::{Answer, RetrievalResult, SearchResult};
use crate::embedding::EmbeddingProvider;
use crate::error::{QueryFailure, RagError, Result};
use crate::generator::{AnswerGenerator, AnswerStream};
use crate::index::VectorIndex;
use crate::ingest::{IngestMode, IngestReport, Ingestor};
use crate::library::{DocumentInfo, DocumentLibrary};
use crate::parser::{DefaultParser, DocumentParser};
use crate::query::{QueryLifecycle, QueryState};
use crate::retriever::Retriever;

/// A document question-answering session.
///
/// Construct one via [`DocQa::builder()`] or [`DocQa::open`].
pub struct DocQa {
    config: RagConfig,
    library: DocumentLibrary,
    index: Arc<VectorIndex>,
    llm: Arc<dyn Llm>,
    retriever: Retriever,
    generator: AnswerGenerator,
    ingestor: Ingestor,
}

impl DocQa {
    /// Create a new [`DocQaBuilder`].
    pub fn builder() -> DocQaBuilder {
        DocQaBuilder::default()
    }

    /// Open the index and library named by `settings`.
    ///
    /// # Errors
    ///
    /// Fails like [`VectorIndex::open`], notably with
    /// [`RagError::Configuration`] when the stored index was built with a
    /// different embedding model.
    pub async fn open(
        settings: &Settings,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn Llm>,
    ) -> Result<Self> {
        let index = VectorIndex::open(
            &settings.persist_directory,
            embedder.model_id(),
            embedder.dimensions(),
        )
        .await?;
        Self::from_settings(settings, index, embedder, llm)
    }

    /// Like [`open`](DocQa::open), but start from an empty index when the
    /// stored one is corrupt or was built with another embedding model.
    pub async fn open_or_reset(
        settings: &Settings,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn Llm>,
    ) -> Result<Self> {
        let index = VectorIndex::open_or_reset(
            &settings.persist_directory,
            embedder.model_id(),
            embedder.dimensions(),
        )
        .await?;
        Self::from_settings(settings, index, embedder, llm)
    }

    fn from_settings(
        settings: &Settings,
        index: VectorIndex,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn Llm>,
    ) -> Result<Self> {
        Self::builder()
            .config(settings.rag.clone())
            .library(DocumentLibrary::new(&settings.source_directory))
            .index(Arc::new(index))
            .embedding_provider(embedder)
            .llm(llm)
            .build()
    }

    /// The pipeline configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// The document library.
    pub fn library(&self) -> &DocumentLibrary {
        &self.library
    }

    /// The vector index.
    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    /// The language model answering questions.
    pub fn llm(&self) -> &Arc<dyn Llm> {
        &self.llm
    }

    /// Add a document to the library. It is searchable after the next
    /// [`ingest`](DocQa::ingest).
    pub async fn upload(&self, name: &str, content: &[u8]) -> Result<DocumentInfo> {
        self.library.upload(name, content).await
    }

    /// Remove a document from the library. Its chunks leave the index on the
    /// next [`ingest`](DocQa::ingest).
    pub async fn delete(&self, name: &str) -> Result<()> {
        self.library.delete(name).await
    }

    /// Documents currently in the library.
    pub fn list_documents(&self) -> Result<Vec<DocumentInfo>> {
        self.library.list()
    }

    /// Bring the index in line with the library.
    pub async fn ingest(&self, mode: IngestMode) -> Result<IngestReport> {
        self.ingestor.run(mode).await
    }

    /// The top `k` chunks for `query`, without generating an answer.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<RetrievalResult> {
        self.retriever.retrieve(query, k).await
    }

    /// Ask a question using the configured `top_k`.
    pub async fn ask(&self, question: &str) -> std::result::Result<QueryHandle, QueryFailure> {
        self.ask_with_k(question, self.config.top_k).await
    }

    /// Ask a question, grounding the answer on the top `k` chunks.
    ///
    /// Runs the query through embedding and retrieval and starts generation.
    /// The returned handle streams the answer.
    ///
    /// # Errors
    ///
    /// Returns a [`QueryFailure`] if the query is invalid, embedding or
    /// retrieval fails, or the model cannot start. Failures after retrieval
    /// carry the retrieval result.
    #[instrument(skip(self, question), fields(question_len = question.len()))]
    pub async fn ask_with_k(
        &self,
        question: &str,
        k: usize,
    ) -> std::result::Result<QueryHandle, QueryFailure> {
        let mut lifecycle = QueryLifecycle::new();
        let query_id = lifecycle.id();
        let fail = |lifecycle: &mut QueryLifecycle, error: RagError, retrieval: Option<RetrievalResult>| {
            warn!(%query_id, state = %lifecycle.state(), error = %error, "query failed");
            lifecycle.fail();
            QueryFailure::new(error, retrieval)
        };

        let checked = Retriever::validate(question, k)
            .and_then(|()| self.generator.check_question(question));
        if let Err(e) = checked {
            return Err(fail(&mut lifecycle, e, None));
        }

        lifecycle.advance(QueryState::Embedding)?;
        let vector = match self.retriever.embed_query(question).await {
            Ok(vector) => vector,
            Err(e) => return Err(fail(&mut lifecycle, e, None)),
        };

        lifecycle.advance(QueryState::Retrieving)?;
        let retrieval = match self.retriever.search(&vector, k).await {
            Ok(retrieval) => retrieval,
            Err(e) => return Err(fail(&mut lifecycle, e, None)),
        };
        info!(%query_id, retrieved = retrieval.len(), "context retrieved");

        lifecycle.advance(QueryState::Generating)?;
        match self.generator.generate(question, retrieval).await {
            Ok(stream) => Ok(QueryHandle { lifecycle, stream }),
            Err(failure) => Err(fail(&mut lifecycle, failure.error, failure.retrieval)),
        }
    }

    /// Persist the index and release the session.
    pub async fn close(self) -> Result<()> {
        let Self { index, retriever, generator, ingestor, .. } = self;
        drop((retriever, generator, ingestor));
        match Arc::try_unwrap(index) {
            Ok(index) => index.close().await,
            // Someone else still holds the index; persist and let them close it.
            Err(shared) => shared.persist().await,
        }
    }
}

impl std::fmt::Debug for DocQa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocQa")
            .field("library", &self.library)
            .field("index", &self.index.path())
            .field("model", &self.llm.name())
            .finish()
    }
}

/// A question being answered.
///
/// Dropping the handle abandons the generation.
#[derive(Debug)]
pub struct QueryHandle {
    lifecycle: QueryLifecycle,
    stream: AnswerStream,
}

impl QueryHandle {
    /// Identifier that appears in this query's log lines.
    pub fn id(&self) -> Uuid {
        self.lifecycle.id()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> QueryState {
        self.lifecycle.state()
    }

    /// The chunks retrieved for this question.
    pub fn retrieval(&self) -> &RetrievalResult {
        self.stream.retrieval()
    }

    /// The chunks that made it into the prompt.
    pub fn prompt_chunks(&self) -> &[SearchResult] {
        self.stream.prompt_chunks()
    }

    /// The next answer token, or `None` when the answer has ended.
    pub async fn next_token(&mut self) -> Option<String> {
        let token = self.stream.next_token().await;
        if token.is_none() && self.stream.has_failed() {
            self.lifecycle.fail();
        }
        token
    }

    /// A handle that cancels the generation from any task.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.stream.cancel_handle()
    }

    /// Drain the answer and complete the query.
    pub async fn finish(mut self) -> std::result::Result<Answer, QueryFailure> {
        match self.stream.finish().await {
            Ok(answer) => {
                if let Err(e) = self.lifecycle.advance(QueryState::Completed) {
                    return Err(QueryFailure::new(e, Some(answer.retrieval)));
                }
                info!(query_id = %self.lifecycle.id(), answer_len = answer.text.len(), "query completed");
                Ok(answer)
            }
            Err(failure) => {
                self.lifecycle.fail();
                warn!(query_id = %self.lifecycle.id(), error = %failure.error, "query failed");
                Err(failure)
            }
        }
    }
}

/// Builder for constructing a [`DocQa`].
///
/// `library`, `index`, `embedding_provider` and `llm` are required. The
/// configuration defaults to [`RagConfig::default`], the chunker to the one
/// it describes, and the parser to [`DefaultParser`].
#[derive(Default)]
pub struct DocQaBuilder {
    config: Option<RagConfig>,
    library: Option<DocumentLibrary>,
    index: Option<Arc<VectorIndex>>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    chunker: Option<Arc<dyn Chunker>>,
    parser: Option<Arc<dyn DocumentParser>>,
    llm: Option<Arc<dyn Llm>>,
}

impl DocQaBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the document library.
    pub fn library(mut self, library: DocumentLibrary) -> Self {
        self.library = Some(library);
        self
    }

    /// Set the vector index.
    pub fn index(mut self, index: Arc<VectorIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// Set the embedding provider; it must match the index's model.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Override the chunker implied by the configuration.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Override the document parser.
    pub fn parser(mut self, parser: Arc<dyn DocumentParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Set the language model.
    pub fn llm(mut self, llm: Arc<dyn Llm>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Build the [`DocQa`], validating that all required fields are set.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] if a required field is missing,
    /// the configuration is invalid, or the embedding provider does not
    /// match the index.
    pub fn build(self) -> Result<DocQa> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let library =
            self.library.ok_or_else(|| RagError::Configuration("library is required".into()))?;
        let index = self.index.ok_or_else(|| RagError::Configuration("index is required".into()))?;
        let embedder = self
            .embedding_provider
            .ok_or_else(|| RagError::Configuration("embedding_provider is required".into()))?;
        let llm = self.llm.ok_or_else(|| RagError::Configuration("llm is required".into()))?;
        let chunker = self.chunker.unwrap_or_else(|| config.chunker());
        let parser = self.parser.unwrap_or_else(|| Arc::new(DefaultParser));

        let ingestor = Ingestor::new(
            library.clone(),
            Arc::clone(&index),
            Arc::clone(&embedder),
            chunker,
            parser,
            &config,
        )?;
        let retriever = Retriever::new(Arc::clone(&index), embedder, &config);
        let generator = AnswerGenerator::new(Arc::clone(&llm), &config);

        Ok(DocQa { config, library, index, llm, retriever, generator, ingestor })
    }
}
