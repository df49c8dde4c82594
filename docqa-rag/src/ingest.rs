//! Ingestion: library files to indexed, embedded chunks.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::chunking::Chunker;
use crate::config::RagConfig;
use crate::document::{Chunk, content_hash};
use crate::embedding::{EmbeddingProvider, embed_with_deadline};
use crate::error::{RagError, Result};
use crate::index::VectorIndex;
use crate::library::DocumentLibrary;
use crate::parser::DocumentParser;

/// How an ingestion run treats the existing index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestMode {
    /// Re-index only documents whose content hash changed; drop documents
    /// that disappeared from the library.
    #[default]
    Incremental,
    /// Clear the index and index every document again.
    Rebuild,
}

impl std::fmt::Display for IngestMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Incremental => f.write_str("incremental"),
            Self::Rebuild => f.write_str("rebuild"),
        }
    }
}

/// A document that was left out of the index, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedDocument {
    /// Library-relative path.
    pub path: String,
    /// Human-readable reason.
    pub reason: String,
}

/// What an ingestion run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub mode: IngestMode,
    pub documents_seen: usize,
    pub documents_indexed: usize,
    pub documents_unchanged: usize,
    pub documents_removed: usize,
    pub chunks_added: usize,
    pub chunks_removed: usize,
    pub skipped: Vec<SkippedDocument>,
}

impl IngestReport {
    /// One-line summary for display.
    pub fn summary(&self) -> String {
        format!(
            "{} ingestion: {} documents seen, {} indexed ({} chunks added), {} unchanged, \
             {} removed ({} chunks removed), {} skipped",
            self.mode,
            self.documents_seen,
            self.documents_indexed,
            self.chunks_added,
            self.documents_unchanged,
            self.documents_removed,
            self.chunks_removed,
            self.skipped.len()
        )
    }
}

/// A parsed and chunked document waiting to be embedded.
struct Pending {
    document_id: String,
    hash: String,
    chunks: Vec<Chunk>,
}

/// Runs ingestion of a [`DocumentLibrary`] into a [`VectorIndex`].
///
/// A run holds the index's writer lock from start to commit, so concurrent
/// runs serialise and queries keep seeing the previous snapshot until the
/// run commits. Unreadable and unparseable documents are skipped and
/// reported; any embedding failure aborts the run with nothing committed.
#[derive(Clone)]
pub struct Ingestor {
    library: DocumentLibrary,
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: Arc<dyn Chunker>,
    parser: Arc<dyn DocumentParser>,
    batch_size: usize,
    embedding_timeout: Duration,
}

impl Ingestor {
    /// Create an ingestor.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] if the embedding provider's model
    /// or dimensionality differs from the index's.
    pub fn new(
        library: DocumentLibrary,
        index: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        chunker: Arc<dyn Chunker>,
        parser: Arc<dyn DocumentParser>,
        config: &RagConfig,
    ) -> Result<Self> {
        if embedder.model_id() != index.embedding_model() || embedder.dimensions() != index.dimensions() {
            return Err(RagError::Configuration(format!(
                "embedding provider '{}' ({} dimensions) does not match index model '{}' ({} dimensions)",
                embedder.model_id(),
                embedder.dimensions(),
                index.embedding_model(),
                index.dimensions()
            )));
        }
        Ok(Self {
            library,
            index,
            embedder,
            chunker,
            parser,
            batch_size: config.embedding_batch_size.max(1),
            embedding_timeout: config.embedding_timeout,
        })
    }

    /// Ingest the library.
    ///
    /// # Errors
    ///
    /// - [`RagError::EmbeddingService`] / [`RagError::EmbeddingTimeout`]
    ///   if any embedding call fails; the index is left untouched
    /// - [`RagError::Io`] if the library or index cannot be read or written
    #[instrument(skip(self), fields(root = %self.library.root().display()))]
    pub async fn run(&self, mode: IngestMode) -> Result<IngestReport> {
        let mut tx = self.index.begin().await;
        let previous = tx.staged().document_hashes().clone();
        let mut report = IngestReport { mode, ..IngestReport::default() };

        if mode == IngestMode::Rebuild {
            report.chunks_removed = tx.staged().len();
            tx.clear();
        }

        let scan = self.library.scan()?;
        let mut present: BTreeSet<&str> = scan.documents.iter().map(|d| d.name.as_str()).collect();
        let mut pending = Vec::new();

        for entry in &scan.unreadable {
            warn!(document = %entry.name, reason = %entry.reason, "skipping unreadable library entry");
            present.insert(entry.name.as_str());
            report.documents_seen += 1;
            report.chunks_removed += tx.remove_document(&entry.name);
            report.skipped.push(SkippedDocument { path: entry.name.clone(), reason: entry.reason.clone() });
        }

        for info in &scan.documents {
            report.documents_seen += 1;
            let source = match self.library.read_document(info).await {
                Ok(source) => source,
                Err(e) => {
                    warn!(document = %info.name, error = %e, "skipping unreadable document");
                    report.chunks_removed += tx.remove_document(&info.name);
                    report.skipped.push(SkippedDocument { path: info.name.clone(), reason: e.to_string() });
                    continue;
                }
            };
            let hash = content_hash(&source.content);

            if mode == IngestMode::Incremental && previous.get(&info.name) == Some(&hash) {
                report.documents_unchanged += 1;
                continue;
            }

            let parsed = match self.parser.parse(&source) {
                Ok(document) => document,
                Err(RagError::Parse { message, .. }) => {
                    warn!(document = %info.name, reason = %message, "skipping document");
                    report.chunks_removed += tx.remove_document(&info.name);
                    report.skipped.push(SkippedDocument { path: info.name.clone(), reason: message });
                    continue;
                }
                Err(e) => return Err(e),
            };

            let mut chunks = self.chunker.chunk(&parsed);
            let mut ids = BTreeSet::new();
            chunks.retain(|chunk| ids.insert(chunk.id.clone()));
            if chunks.is_empty() {
                report.chunks_removed += tx.remove_document(&info.name);
                report.skipped.push(SkippedDocument {
                    path: info.name.clone(),
                    reason: "no text to index".into(),
                });
                continue;
            }
            debug!(document = %info.name, chunks = chunks.len(), "document chunked");
            pending.push(Pending { document_id: info.name.clone(), hash, chunks });
        }

        for document in &mut pending {
            self.embed_chunks(document).await?;
        }

        for mut document in pending {
            report.chunks_removed += tx.remove_document(&document.document_id);

            // A zero vector has no direction and can never be retrieved.
            let embedded = document.chunks.len();
            document.chunks.retain(|chunk| chunk.embedding.iter().any(|v| *v != 0.0));
            if document.chunks.len() < embedded {
                warn!(
                    document = %document.document_id,
                    dropped = embedded - document.chunks.len(),
                    "chunks without embeddable text left out"
                );
            }
            if document.chunks.is_empty() {
                report.skipped.push(SkippedDocument {
                    path: document.document_id,
                    reason: "no embeddable text".into(),
                });
                continue;
            }

            report.chunks_added += document.chunks.len();
            for chunk in document.chunks {
                tx.upsert(chunk)?;
            }
            tx.set_document_hash(document.document_id, document.hash);
            report.documents_indexed += 1;
        }

        for gone in previous.keys().filter(|id| !present.contains(id.as_str())) {
            let removed = tx.remove_document(gone);
            if mode == IngestMode::Incremental {
                report.chunks_removed += removed;
            }
            report.documents_removed += 1;
            debug!(document = %gone, chunks = removed, "document removed from index");
        }

        tx.commit().await?;
        info!(
            mode = %mode,
            seen = report.documents_seen,
            indexed = report.documents_indexed,
            unchanged = report.documents_unchanged,
            removed = report.documents_removed,
            skipped = report.skipped.len(),
            chunks_added = report.chunks_added,
            chunks_removed = report.chunks_removed,
            "ingestion complete"
        );
        Ok(report)
    }

    async fn embed_chunks(&self, document: &mut Pending) -> Result<()> {
        for batch in document.chunks.chunks_mut(self.batch_size) {
            let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
            let vectors = embed_with_deadline(self.embedder.as_ref(), &texts, self.embedding_timeout)
                .await
                .inspect_err(|e| {
                    error!(document = %document.document_id, error = %e, "embedding failed; aborting ingestion");
                })?;
            for (chunk, vector) in batch.iter_mut().zip(vectors) {
                chunk.embedding = vector;
            }
            debug!(document = %document.document_id, batch = batch.len(), "batch embedded");
        }
        Ok(())
    }
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor")
            .field("library", &self.library)
            .field("embedding_model", &self.embedder.model_id())
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkingStrategy;
    use crate::embedding::HashingEmbeddingProvider;
    use crate::parser::DefaultParser;

    async fn setup() -> (tempfile::TempDir, Ingestor, Arc<VectorIndex>) {
        let temp = tempfile::tempdir().unwrap();
        let library = DocumentLibrary::new(temp.path().join("source"));
        let embedder = Arc::new(HashingEmbeddingProvider::new(64));
        let index = Arc::new(VectorIndex::open(temp.path().join("db"), embedder.model_id(), 64).await.unwrap());
        let config = RagConfig::builder().chunk_size(64).chunk_overlap(8).build().unwrap();
        let ingestor = Ingestor::new(
            library,
            Arc::clone(&index),
            embedder,
            ChunkingStrategy::Recursive.build(64, 8),
            Arc::new(DefaultParser),
            &config,
        )
        .unwrap();
        (temp, ingestor, index)
    }

    #[tokio::test]
    async fn indexes_supported_and_skips_unsupported_documents() {
        let (_temp, ingestor, index) = setup().await;
        ingestor.library.upload("a.txt", b"The capital of France is Paris.").await.unwrap();
        ingestor.library.upload("b.pdf", b"%PDF-1.7 binary").await.unwrap();

        let report = ingestor.run(IngestMode::Incremental).await.unwrap();
        assert_eq!(report.documents_seen, 2);
        assert_eq!(report.documents_indexed, 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].path, "b.pdf");
        assert_eq!(index.len().await, report.chunks_added);
        assert!(index.document_hashes().await.contains_key("a.txt"));
    }

    #[tokio::test]
    async fn incremental_run_skips_unchanged_and_replaces_changed() {
        let (_temp, ingestor, index) = setup().await;
        ingestor.library.upload("a.txt", b"First version of the text.").await.unwrap();
        ingestor.run(IngestMode::Incremental).await.unwrap();

        let again = ingestor.run(IngestMode::Incremental).await.unwrap();
        assert_eq!(again.documents_unchanged, 1);
        assert_eq!(again.documents_indexed, 0);

        ingestor.library.upload("a.txt", b"Second version, rewritten.").await.unwrap();
        let changed = ingestor.run(IngestMode::Incremental).await.unwrap();
        assert_eq!(changed.documents_indexed, 1);
        assert_eq!(changed.chunks_removed, 1);
        let chunks = index.chunks_for_document("a.txt").await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Second version, rewritten.");
    }

    #[tokio::test]
    async fn removed_files_leave_the_index() {
        let (_temp, ingestor, index) = setup().await;
        ingestor.library.upload("a.txt", b"Alpha document.").await.unwrap();
        ingestor.library.upload("b.txt", b"Beta document.").await.unwrap();
        ingestor.run(IngestMode::Incremental).await.unwrap();

        ingestor.library.delete("a.txt").await.unwrap();
        let report = ingestor.run(IngestMode::Incremental).await.unwrap();
        assert_eq!(report.documents_removed, 1);
        assert!(index.chunks_for_document("a.txt").await.is_empty());
        assert_eq!(index.document_hashes().await.len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unreadable_entries_are_skipped_without_aborting() {
        let (temp, ingestor, index) = setup().await;
        ingestor.library.upload("good.txt", b"The capital of France is Paris.").await.unwrap();
        std::os::unix::fs::symlink(temp.path().join("gone.txt"), temp.path().join("source/ghost.txt")).unwrap();

        let report = ingestor.run(IngestMode::Incremental).await.unwrap();
        assert_eq!(report.documents_seen, 2);
        assert_eq!(report.documents_indexed, 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].path, "ghost.txt");
        assert_eq!(index.chunks_for_document("good.txt").await.len(), 1);
    }

    #[tokio::test]
    async fn chunks_without_words_are_not_indexed() {
        let (_temp, ingestor, index) = setup().await;
        let mixed = "The capital of France is Paris, a city.\n\n---- ---- ---- ---- ---- ---- ---- ----";
        ingestor.library.upload("mixed.txt", mixed.as_bytes()).await.unwrap();
        ingestor.library.upload("rule.txt", b"---- ****").await.unwrap();

        let report = ingestor.run(IngestMode::Incremental).await.unwrap();
        assert_eq!(report.documents_indexed, 1);
        assert_eq!(report.chunks_added, 1);
        assert_eq!(report.skipped, vec![SkippedDocument { path: "rule.txt".into(), reason: "no embeddable text".into() }]);
        let chunks = index.chunks_for_document("mixed.txt").await;
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("Paris"));
        assert!(index.document_hashes().await.get("rule.txt").is_none());
    }

    #[tokio::test]
    async fn mismatched_embedder_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let index = Arc::new(VectorIndex::in_memory("other-model", 64));
        let err = Ingestor::new(
            DocumentLibrary::new(temp.path()),
            index,
            Arc::new(HashingEmbeddingProvider::new(64)),
            ChunkingStrategy::Fixed.build(100, 0),
            Arc::new(DefaultParser),
            &RagConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, RagError::Configuration(_)));
    }

    #[test]
    fn summary_mentions_every_count() {
        let report = IngestReport {
            mode: IngestMode::Rebuild,
            documents_seen: 3,
            documents_indexed: 2,
            chunks_added: 7,
            skipped: vec![SkippedDocument { path: "x.pdf".into(), reason: "unsupported".into() }],
            ..IngestReport::default()
        };
        let summary = report.summary();
        assert!(summary.starts_with("rebuild ingestion: 3 documents seen, 2 indexed (7 chunks added)"));
        assert!(summary.ends_with("1 skipped"));
    }
}
