//! Data types for documents, chunks, retrieval results and answers.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex SHA-256 of raw bytes; used to detect changed documents.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// File formats the library accepts for upload.
///
/// Only some of them can be parsed; see [`DocumentFormat::is_supported`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Text,
    Markdown,
    Html,
    Csv,
    Email,
    Evernote,
    Pdf,
    Word,
    LegacyWord,
    Epub,
    OpenDocument,
    PowerPoint,
    LegacyPowerPoint,
}

impl DocumentFormat {
    /// Every accepted format, in display order.
    pub const ALL: [DocumentFormat; 13] = [
        Self::Csv,
        Self::LegacyWord,
        Self::Word,
        Self::Evernote,
        Self::Email,
        Self::Epub,
        Self::Html,
        Self::Markdown,
        Self::OpenDocument,
        Self::Pdf,
        Self::LegacyPowerPoint,
        Self::PowerPoint,
        Self::Text,
    ];

    /// Detect the format from a file extension (case-insensitive, no dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "txt" | "text" => Some(Self::Text),
            "md" | "markdown" => Some(Self::Markdown),
            "html" | "htm" => Some(Self::Html),
            "csv" => Some(Self::Csv),
            "eml" => Some(Self::Email),
            "enex" => Some(Self::Evernote),
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Word),
            "doc" => Some(Self::LegacyWord),
            "epub" => Some(Self::Epub),
            "odt" => Some(Self::OpenDocument),
            "pptx" => Some(Self::PowerPoint),
            "ppt" => Some(Self::LegacyPowerPoint),
            _ => None,
        }
    }

    /// Detect the format from a path's extension.
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        path.as_ref().extension().and_then(|ext| ext.to_str()).and_then(Self::from_extension)
    }

    /// Canonical file extensions for this format.
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::Text => &["txt"],
            Self::Markdown => &["md", "markdown"],
            Self::Html => &["html", "htm"],
            Self::Csv => &["csv"],
            Self::Email => &["eml"],
            Self::Evernote => &["enex"],
            Self::Pdf => &["pdf"],
            Self::Word => &["docx"],
            Self::LegacyWord => &["doc"],
            Self::Epub => &["epub"],
            Self::OpenDocument => &["odt"],
            Self::PowerPoint => &["pptx"],
            Self::LegacyPowerPoint => &["ppt"],
        }
    }

    /// Whether the built-in parser can extract text from this format.
    pub fn is_supported(self) -> bool {
        matches!(
            self,
            Self::Text | Self::Markdown | Self::Html | Self::Csv | Self::Email | Self::Evernote
        )
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extensions()[0])
    }
}

/// A raw file as uploaded, before parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    /// Path relative to the source directory, `/`-separated.
    pub name: String,
    /// Raw file bytes.
    pub content: Vec<u8>,
    /// Detected format, if the extension is recognised.
    pub format: Option<DocumentFormat>,
}

impl SourceDocument {
    /// Create a source document, detecting the format from `name`.
    pub fn new(name: impl Into<String>, content: Vec<u8>) -> Self {
        let name = name.into();
        let format = DocumentFormat::from_path(&name);
        Self { name, content, format }
    }
}

/// A parsed document: plain text plus provenance metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Unique identifier for the document (its relative source path).
    pub id: String,
    /// The text content of the document.
    pub text: String,
    /// Key-value metadata carried onto every chunk.
    pub metadata: HashMap<String, String>,
}

impl Document {
    /// Create a document with empty metadata.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { id: id.into(), text: text.into(), metadata: HashMap::new() }
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A segment of a [`Document`] with its vector embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Content-derived identifier; identical input yields an identical id.
    pub id: String,
    /// The text content of the chunk.
    pub text: String,
    /// The vector embedding for this chunk's text. Empty until embedded.
    pub embedding: Vec<f32>,
    /// Metadata inherited from the parent document plus chunk-specific fields.
    pub metadata: HashMap<String, String>,
    /// The ID of the parent [`Document`].
    pub document_id: String,
    /// Byte offset of the chunk's first character in the parent text.
    pub offset: usize,
    /// Position of the chunk within its document.
    pub chunk_index: usize,
}

/// A retrieved [`Chunk`] paired with a relevance score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    /// The retrieved chunk.
    pub chunk: Chunk,
    /// The similarity score (higher is more relevant).
    pub score: f32,
}

/// Retrieved chunks ordered by descending score.
pub type RetrievalResult = Vec<SearchResult>;

/// A generated answer and the retrieval it was grounded on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    /// The concatenated generated text.
    pub text: String,
    /// The retrieval used to build the prompt, unchanged.
    pub retrieval: RetrievalResult,
    /// False when no chunk was retrieved and the model was not consulted.
    pub grounded: bool,
}

impl Answer {
    /// Distinct source document ids in retrieval order.
    pub fn sources(&self) -> Vec<&str> {
        let mut sources: Vec<&str> = Vec::new();
        for result in &self.retrieval {
            let id = result.chunk.document_id.as_str();
            if !sources.contains(&id) {
                sources.push(id);
            }
        }
        sources
    }
}
