//! Persistent vector index with snapshot reads and a single writer.
//!
//! The index keeps every chunk and its embedding in memory and mirrors the
//! committed state to `index.json` in its directory. Readers take an
//! [`Arc<IndexSnapshot>`] and are never blocked by, or exposed to, an
//! in-progress write. Writers go through an [`IndexTransaction`], which holds
//! the writer lock until it is committed or dropped. Each commit costs a copy
//! of the chunk map and a rewrite of the file, so writes are batched per
//! transaction.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

use crate::document::{Chunk, SearchResult};
use crate::error::{RagError, Result};

/// File name of the persisted index inside its directory.
pub const INDEX_FILE: &str = "index.json";

const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct PersistedIndexRef<'a> {
    version: u32,
    embedding_model: &'a str,
    dimensions: usize,
    updated_at: DateTime<Utc>,
    documents: &'a BTreeMap<String, String>,
    chunks: Vec<&'a Chunk>,
}

#[derive(Deserialize)]
struct PersistedIndex {
    version: u32,
    embedding_model: String,
    dimensions: usize,
    documents: BTreeMap<String, String>,
    chunks: Vec<Chunk>,
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// An immutable view of the index contents.
#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    chunks: BTreeMap<String, Arc<Chunk>>,
    documents: BTreeMap<String, String>,
}

impl IndexSnapshot {
    /// Number of chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether the snapshot holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Look up a chunk by id.
    pub fn get(&self, id: &str) -> Option<&Chunk> {
        self.chunks.get(id).map(|chunk| &**chunk)
    }

    /// All chunks in id order.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values().map(|chunk| &**chunk)
    }

    /// Document id to content hash for every ingested document.
    pub fn document_hashes(&self) -> &BTreeMap<String, String> {
        &self.documents
    }

    /// Chunks of one document, in document order.
    pub fn chunks_for_document(&self, document_id: &str) -> Vec<&Chunk> {
        let mut chunks: Vec<&Chunk> =
            self.chunks().filter(|chunk| chunk.document_id == document_id).collect();
        chunks.sort_by_key(|chunk| (chunk.chunk_index, chunk.offset));
        chunks
    }

    /// Top `k` chunks by cosine similarity, highest first, ties by chunk id.
    fn rank(&self, vector: &[f32], k: usize) -> Vec<SearchResult> {
        let mut scored: Vec<(f32, &Arc<Chunk>)> = self
            .chunks
            .values()
            .map(|chunk| (cosine_similarity(&chunk.embedding, vector), chunk))
            .collect();

        // BTreeMap iteration is already in id order, so a stable sort keeps
        // equal scores ordered by id.
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(k.min(self.chunks.len()));
        scored
            .into_iter()
            .map(|(score, chunk)| SearchResult { chunk: Chunk::clone(chunk), score })
            .collect()
    }
}

/// Outcome of reading an index file.
enum Loaded {
    Missing,
    Found(IndexSnapshot),
    Mismatch { embedding_model: String, dimensions: usize },
}

/// A chunk store answering top-K similarity queries.
///
/// Construct one explicitly with [`open`](VectorIndex::open) or
/// [`in_memory`](VectorIndex::in_memory); there is no global index. Several
/// indexes may coexist in one process.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::VectorIndex;
///
/// let index = VectorIndex::open("db", "all-minilm", 384).await?;
/// let results = index.search("all-minilm", &query_vector, 4).await?;
/// index.close().await?;
/// ```
#[derive(Debug)]
pub struct VectorIndex {
    path: Option<PathBuf>,
    embedding_model: String,
    dimensions: usize,
    current: RwLock<Arc<IndexSnapshot>>,
    writer: Mutex<()>,
}

impl VectorIndex {
    fn with_snapshot(
        path: Option<PathBuf>,
        embedding_model: String,
        dimensions: usize,
        snapshot: IndexSnapshot,
    ) -> Self {
        Self {
            path,
            embedding_model,
            dimensions,
            current: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
        }
    }

    /// An index that is never written to disk.
    pub fn in_memory(embedding_model: impl Into<String>, dimensions: usize) -> Self {
        Self::with_snapshot(None, embedding_model.into(), dimensions, IndexSnapshot::default())
    }

    /// Open the index stored in `dir`, or start an empty one if none exists.
    ///
    /// # Errors
    ///
    /// - [`RagError::Configuration`] if the stored embedding model or
    ///   dimensionality differs from the requested one
    /// - [`RagError::IndexCorruption`] if the file cannot be parsed or its
    ///   vectors are inconsistent
    /// - [`RagError::Io`] if the file cannot be read
    pub async fn open(
        dir: impl AsRef<Path>,
        embedding_model: impl Into<String>,
        dimensions: usize,
    ) -> Result<Self> {
        let path = dir.as_ref().join(INDEX_FILE);
        let embedding_model = embedding_model.into();
        validate_identity(&embedding_model, dimensions)?;

        match load(&path, &embedding_model, dimensions).await? {
            Loaded::Missing => {
                debug!(path = %path.display(), "no index on disk; starting empty");
                let snapshot = IndexSnapshot::default();
                Ok(Self::with_snapshot(Some(path), embedding_model, dimensions, snapshot))
            }
            Loaded::Found(snapshot) => {
                info!(path = %path.display(), chunks = snapshot.len(), "index loaded");
                Ok(Self::with_snapshot(Some(path), embedding_model, dimensions, snapshot))
            }
            Loaded::Mismatch { embedding_model: stored, dimensions: stored_dims } => {
                Err(RagError::Configuration(format!(
                    "index at {} was built with embedding model '{stored}' ({stored_dims} dimensions) \
                     but '{embedding_model}' ({dimensions} dimensions) was requested; re-index to switch models",
                    path.display()
                )))
            }
        }
    }

    /// Like [`open`](VectorIndex::open), but discard stored content that was
    /// built with another embedding model or is corrupt, leaving an empty index
    /// ready for re-ingestion.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Io`] if the directory cannot be read or written.
    pub async fn open_or_reset(
        dir: impl AsRef<Path>,
        embedding_model: impl Into<String>,
        dimensions: usize,
    ) -> Result<Self> {
        let path = dir.as_ref().join(INDEX_FILE);
        let embedding_model = embedding_model.into();
        validate_identity(&embedding_model, dimensions)?;

        let discarded = match load(&path, &embedding_model, dimensions).await {
            Ok(Loaded::Found(snapshot)) => {
                return Ok(Self::with_snapshot(Some(path), embedding_model, dimensions, snapshot));
            }
            Ok(Loaded::Missing) => false,
            Ok(Loaded::Mismatch { embedding_model: stored, .. }) => {
                warn!(
                    path = %path.display(),
                    stored_model = %stored,
                    model = %embedding_model,
                    "discarding index built with another embedding model"
                );
                true
            }
            Err(e @ RagError::IndexCorruption { .. }) => {
                warn!(path = %path.display(), error = %e, "discarding corrupt index");
                true
            }
            Err(e) => return Err(e),
        };

        let index =
            Self::with_snapshot(Some(path), embedding_model, dimensions, IndexSnapshot::default());
        if discarded {
            index.persist().await?;
        }
        Ok(index)
    }

    /// The embedding model identifier this index accepts.
    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    /// Length of every stored vector.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// The index file, if the index is backed by disk.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The current committed state.
    pub async fn snapshot(&self) -> Arc<IndexSnapshot> {
        Arc::clone(&*self.current.read().await)
    }

    /// Number of committed chunks.
    pub async fn len(&self) -> usize {
        self.snapshot().await.len()
    }

    /// Whether no chunks are committed.
    pub async fn is_empty(&self) -> bool {
        self.snapshot().await.is_empty()
    }

    /// Document id to content hash for every committed document.
    pub async fn document_hashes(&self) -> BTreeMap<String, String> {
        self.snapshot().await.document_hashes().clone()
    }

    /// Committed chunks of one document, in document order.
    pub async fn chunks_for_document(&self, document_id: &str) -> Vec<Chunk> {
        self.snapshot().await.chunks_for_document(document_id).into_iter().cloned().collect()
    }

    /// Start a write transaction, waiting for any other writer to finish.
    pub async fn begin(&self) -> IndexTransaction<'_> {
        let guard = self.writer.lock().await;
        let staged = IndexSnapshot::clone(&*self.snapshot().await);
        IndexTransaction { index: self, _writer: guard, staged }
    }

    /// Insert or replace one chunk and commit.
    ///
    /// Every commit copies the chunk map and rewrites the index file, so
    /// loading many chunks one call at a time is quadratic. Bulk writes go
    /// through [`upsert_batch`](Self::upsert_batch) or a transaction from
    /// [`begin`](Self::begin).
    pub async fn upsert(&self, chunk: Chunk) -> Result<()> {
        self.upsert_batch([chunk]).await
    }

    /// Insert or replace `chunks` in a single commit. If any chunk is
    /// rejected, none are committed.
    pub async fn upsert_batch(&self, chunks: impl IntoIterator<Item = Chunk>) -> Result<()> {
        let mut tx = self.begin().await;
        for chunk in chunks {
            tx.upsert(chunk)?;
        }
        tx.commit().await
    }

    /// Remove chunks by id and commit. Unknown ids are ignored.
    pub async fn delete(&self, ids: &[&str]) -> Result<usize> {
        let mut tx = self.begin().await;
        let removed = tx.delete(ids);
        tx.commit().await?;
        Ok(removed)
    }

    /// Remove everything and commit.
    pub async fn clear(&self) -> Result<()> {
        let mut tx = self.begin().await;
        tx.clear();
        tx.commit().await
    }

    /// Top `k` chunks most similar to `vector`, highest score first.
    ///
    /// `k` is clamped to the number of chunks; an empty index yields an
    /// empty result.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] if `embedding_model` is not the
    /// index's model or `vector` has the wrong length.
    pub async fn search(
        &self,
        embedding_model: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<SearchResult>> {
        if embedding_model != self.embedding_model {
            return Err(RagError::Configuration(format!(
                "query embedded with '{embedding_model}' but the index holds '{}' vectors",
                self.embedding_model
            )));
        }
        if vector.len() != self.dimensions {
            return Err(RagError::Configuration(format!(
                "query vector has {} dimensions, index expects {}",
                vector.len(),
                self.dimensions
            )));
        }

        let snapshot = self.snapshot().await;
        let results = snapshot.rank(vector, k);
        debug!(k, chunks = snapshot.len(), results = results.len(), "index search");
        Ok(results)
    }

    /// Write the committed state to disk. A no-op for in-memory indexes.
    pub async fn persist(&self) -> Result<()> {
        let _writer = self.writer.lock().await;
        let snapshot = self.snapshot().await;
        self.write_snapshot(&snapshot).await
    }

    /// Persist and release the index.
    pub async fn close(self) -> Result<()> {
        self.persist().await?;
        debug!(model = %self.embedding_model, "index closed");
        Ok(())
    }

    /// Serialize to `index.json.tmp`, then rename over `index.json`.
    async fn write_snapshot(&self, snapshot: &IndexSnapshot) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| RagError::io(dir, e))?;
        }

        let persisted = PersistedIndexRef {
            version: FORMAT_VERSION,
            embedding_model: &self.embedding_model,
            dimensions: self.dimensions,
            updated_at: Utc::now(),
            documents: &snapshot.documents,
            chunks: snapshot.chunks().collect(),
        };
        let bytes = serde_json::to_vec(&persisted).map_err(|e| RagError::IndexCorruption {
            path: path.clone(),
            message: format!("failed to serialize index: {e}"),
        })?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await.map_err(|e| RagError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, path).await.map_err(|e| RagError::io(path, e))?;
        debug!(path = %path.display(), bytes = bytes.len(), "index persisted");
        Ok(())
    }
}

fn validate_identity(embedding_model: &str, dimensions: usize) -> Result<()> {
    if embedding_model.trim().is_empty() {
        return Err(RagError::Configuration("embedding model must not be empty".into()));
    }
    if dimensions == 0 {
        return Err(RagError::Configuration("index dimensions must be non-zero".into()));
    }
    Ok(())
}

async fn load(path: &Path, embedding_model: &str, dimensions: usize) -> Result<Loaded> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Loaded::Missing),
        Err(e) => return Err(RagError::io(path, e)),
    };
    let corrupt = |message: String| RagError::IndexCorruption { path: path.to_path_buf(), message };

    let persisted: PersistedIndex =
        serde_json::from_slice(&bytes).map_err(|e| corrupt(format!("unreadable index: {e}")))?;
    if persisted.version != FORMAT_VERSION {
        return Err(corrupt(format!("unsupported index format version {}", persisted.version)));
    }
    if persisted.embedding_model != embedding_model || persisted.dimensions != dimensions {
        return Ok(Loaded::Mismatch {
            embedding_model: persisted.embedding_model,
            dimensions: persisted.dimensions,
        });
    }

    let mut chunks = BTreeMap::new();
    for chunk in persisted.chunks {
        if chunk.embedding.len() != persisted.dimensions {
            return Err(corrupt(format!(
                "chunk {} has {} dimensions, index records {}",
                chunk.id,
                chunk.embedding.len(),
                persisted.dimensions
            )));
        }
        if chunks.insert(chunk.id.clone(), Arc::new(chunk)).is_some() {
            return Err(corrupt("duplicate chunk id".into()));
        }
    }

    Ok(Loaded::Found(IndexSnapshot { chunks, documents: persisted.documents }))
}

/// Staged changes to a [`VectorIndex`].
///
/// Holds the index's writer lock; other writers wait until this transaction
/// is committed or dropped. Readers keep seeing the previous snapshot until
/// [`commit`](IndexTransaction::commit) publishes the new one. Dropping the
/// transaction discards its changes.
pub struct IndexTransaction<'a> {
    index: &'a VectorIndex,
    _writer: MutexGuard<'a, ()>,
    staged: IndexSnapshot,
}

impl IndexTransaction<'_> {
    /// Stage an insert or replacement.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] if the chunk's embedding length
    /// does not match the index.
    pub fn upsert(&mut self, chunk: Chunk) -> Result<()> {
        if chunk.embedding.len() != self.index.dimensions {
            return Err(RagError::Configuration(format!(
                "chunk {} has {} dimensions, index expects {}",
                chunk.id,
                chunk.embedding.len(),
                self.index.dimensions
            )));
        }
        self.staged.chunks.insert(chunk.id.clone(), Arc::new(chunk));
        Ok(())
    }

    /// Stage removal of chunks by id; returns how many existed.
    pub fn delete(&mut self, ids: &[&str]) -> usize {
        ids.iter().filter(|id| self.staged.chunks.remove(**id).is_some()).count()
    }

    /// Stage removal of everything.
    pub fn clear(&mut self) {
        self.staged = IndexSnapshot::default();
    }

    /// Stage removal of a document's chunks and content hash; returns the
    /// number of chunks removed.
    pub fn remove_document(&mut self, document_id: &str) -> usize {
        let before = self.staged.chunks.len();
        self.staged.chunks.retain(|_, chunk| chunk.document_id != document_id);
        self.staged.documents.remove(document_id);
        before - self.staged.chunks.len()
    }

    /// Record the content hash a document was ingested from.
    pub fn set_document_hash(&mut self, document_id: impl Into<String>, hash: impl Into<String>) {
        self.staged.documents.insert(document_id.into(), hash.into());
    }

    /// The staged state, including uncommitted changes.
    pub fn staged(&self) -> &IndexSnapshot {
        &self.staged
    }

    /// Persist the staged state, then publish it to readers.
    ///
    /// If persisting fails nothing is published and the index keeps its
    /// previous state.
    pub async fn commit(self) -> Result<()> {
        let snapshot = Arc::new(self.staged);
        self.index.write_snapshot(&snapshot).await?;

        let chunks = snapshot.len();
        let documents = snapshot.documents.len();
        *self.index.current.write().await = snapshot;
        info!(chunks, documents, "index committed");
        Ok(())
    }
}

impl std::fmt::Debug for IndexTransaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexTransaction").field("staged_chunks", &self.staged.len()).finish()
    }
}
