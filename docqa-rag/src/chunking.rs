//! Document chunking strategies.
//!
//! This module provides the [`Chunker`] trait and three implementations:
//!
//! - [`FixedSizeChunker`] splits into byte windows with overlap
//! - [`RecursiveChunker`] splits hierarchically by paragraphs, sentences, then words
//! - [`MarkdownChunker`] splits by markdown headers, preserving header context
//!
//! Every chunker works on byte ranges of the document text, never splits a
//! UTF-8 character, and records the byte offset of each chunk. Chunk ids are
//! derived from content (see [`chunk_id`]), so chunking the same document
//! twice yields the same ids.

use std::collections::VecDeque;
use std::ops::Range;

use sha2::{Digest, Sha256};

use crate::document::{Chunk, Document};

const SEPARATORS: [&str; 5] = ["\n\n", ". ", "! ", "? ", " "];

/// A strategy for splitting documents into chunks.
///
/// Implementations produce [`Chunk`]s with text and metadata but no embeddings.
/// Embeddings are attached later during ingestion.
pub trait Chunker: Send + Sync {
    /// Split a document into chunks.
    ///
    /// Returns an empty `Vec` if the document has no non-whitespace text.
    /// Each returned chunk has an empty embedding vector.
    fn chunk(&self, document: &Document) -> Vec<Chunk>;
}

/// Stable chunk identifier: the first 32 hex digits of
/// `sha256("{document_id}:{offset}:{text}")`.
pub fn chunk_id(document_id: &str, offset: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(b":");
    hasher.update(offset.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(text.as_bytes());
    let mut id = format!("{:x}", hasher.finalize());
    id.truncate(32);
    id
}

fn floor_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

/// Shrink `range` so it neither starts nor ends with whitespace.
fn trim_range(text: &str, range: Range<usize>) -> Range<usize> {
    let slice = &text[range.clone()];
    let start = range.start + (slice.len() - slice.trim_start().len());
    let end = range.end - (slice.len() - slice.trim_end().len());
    start..end.max(start)
}

/// Build a chunk for `text[range]`, trimming surrounding whitespace.
fn make_chunk(
    document: &Document,
    range: Range<usize>,
    chunk_index: usize,
    prefix: Option<&str>,
) -> Option<Chunk> {
    let range = trim_range(&document.text, range);
    if range.is_empty() {
        return None;
    }
    let body = &document.text[range.clone()];
    let text = match prefix {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}\n{body}"),
        _ => body.to_string(),
    };

    let mut metadata = document.metadata.clone();
    metadata.insert("chunk_index".to_string(), chunk_index.to_string());
    if let Some(prefix) = prefix {
        metadata.insert("header_path".to_string(), prefix.to_string());
    }

    Some(Chunk {
        id: chunk_id(&document.id, range.start, &text),
        text,
        embedding: Vec::new(),
        metadata,
        document_id: document.id.clone(),
        offset: range.start,
        chunk_index,
    })
}

/// Trimmed, non-empty ranges in order, dropping any range that lies inside
/// the one kept before it. Heavy overlap can trim neighbouring windows down
/// to the same text, which would otherwise produce duplicate chunk ids.
fn distinct_ranges(text: &str, ranges: Vec<Range<usize>>) -> Vec<Range<usize>> {
    let mut kept: Vec<Range<usize>> = Vec::with_capacity(ranges.len());
    for range in ranges {
        let range = trim_range(text, range);
        let inside_previous =
            kept.last().is_some_and(|prev| prev.start <= range.start && range.end <= prev.end);
        if !range.is_empty() && !inside_previous {
            kept.push(range);
        }
    }
    kept
}

fn build_chunks(document: &Document, ranges: Vec<Range<usize>>, prefix: Option<&str>) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for range in distinct_ranges(&document.text, ranges) {
        if let Some(chunk) = make_chunk(document, range, chunks.len(), prefix) {
            chunks.push(chunk);
        }
    }
    chunks
}

/// Fixed windows over `text[range]`, each at most `size` bytes, advancing by
/// `size - overlap` and never splitting a character.
fn window_ranges(text: &str, range: Range<usize>, size: usize, overlap: usize) -> Vec<Range<usize>> {
    let mut windows = Vec::new();
    let mut start = range.start;
    while start < range.end {
        let mut end = floor_boundary(text, (start + size).min(range.end));
        if end <= start {
            // A single character wider than the window still has to go somewhere.
            end = ceil_boundary(text, start + 1);
        }
        windows.push(start..end);
        if end >= range.end {
            break;
        }
        let next = floor_boundary(text, end.saturating_sub(overlap));
        start = if next > start { next } else { end };
    }
    windows
}

/// Split text into fixed-size chunks with configurable overlap.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::FixedSizeChunker;
///
/// let chunker = FixedSizeChunker::new(256, 50);
/// let chunks = chunker.chunk(&document);
/// ```
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl FixedSizeChunker {
    /// Create a new `FixedSizeChunker`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size`: maximum number of bytes per chunk
    /// * `chunk_overlap`: number of overlapping bytes between consecutive chunks
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self { chunk_size: chunk_size.max(1), chunk_overlap }
    }
}

impl Chunker for FixedSizeChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let text = &document.text;
        let ranges = window_ranges(text, 0..text.len(), self.chunk_size, self.chunk_overlap);
        build_chunks(document, ranges, None)
    }
}

/// Split `text[range]` at `separator`, keeping the separator attached to the
/// preceding piece.
fn split_keeping_separator(text: &str, range: Range<usize>, separator: &str) -> Vec<Range<usize>> {
    let mut pieces = Vec::new();
    let mut start = range.start;
    while let Some(pos) = text[start..range.end].find(separator) {
        let end = start + pos + separator.len();
        pieces.push(start..end);
        start = end;
    }
    if start < range.end {
        pieces.push(start..range.end);
    }
    pieces
}

/// Break `text[range]` into contiguous pieces no longer than `size`, trying
/// each separator in turn and falling back to hard cuts.
fn split_ranges(text: &str, range: Range<usize>, size: usize, separators: &[&str]) -> Vec<Range<usize>> {
    if range.len() <= size {
        return vec![range];
    }
    let Some((separator, rest)) = separators.split_first() else {
        return window_ranges(text, range, size, 0);
    };

    let mut pieces = Vec::new();
    for piece in split_keeping_separator(text, range, separator) {
        if piece.len() > size {
            pieces.extend(split_ranges(text, piece, size, rest));
        } else {
            pieces.push(piece);
        }
    }
    pieces
}

/// Greedily merge contiguous pieces into windows of at most `size` bytes.
/// Each new window starts with the trailing pieces of the previous one, up
/// to `overlap` bytes.
fn merge_ranges(pieces: Vec<Range<usize>>, size: usize, overlap: usize) -> Vec<Range<usize>> {
    let mut windows = Vec::new();
    let mut current: VecDeque<Range<usize>> = VecDeque::new();
    let span = |current: &VecDeque<Range<usize>>| match (current.front(), current.back()) {
        (Some(front), Some(back)) => back.end - front.start,
        _ => 0,
    };

    for piece in pieces {
        if !current.is_empty() && span(&current) + piece.len() > size {
            if let (Some(front), Some(back)) = (current.front(), current.back()) {
                windows.push(front.start..back.end);
            }
            while !current.is_empty()
                && (span(&current) > overlap || span(&current) + piece.len() > size)
            {
                current.pop_front();
            }
        }
        current.push_back(piece);
    }
    if let (Some(front), Some(back)) = (current.front(), current.back()) {
        windows.push(front.start..back.end);
    }
    windows
}

fn recursive_ranges(text: &str, range: Range<usize>, size: usize, overlap: usize) -> Vec<Range<usize>> {
    // Leave room for the overlap carried into each window.
    let piece_size = size.saturating_sub(overlap).max(1);
    merge_ranges(split_ranges(text, range, piece_size, &SEPARATORS), size, overlap)
}

/// Splits text hierarchically: paragraphs, then sentences, then words.
///
/// Pieces are merged back into chunks of at most `chunk_size` bytes, with up
/// to `chunk_overlap` bytes of trailing context repeated at the start of the
/// next chunk.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::RecursiveChunker;
///
/// let chunker = RecursiveChunker::new(512, 100);
/// let chunks = chunker.chunk(&document);
/// ```
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl RecursiveChunker {
    /// Create a new `RecursiveChunker`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size`: maximum number of bytes per chunk
    /// * `chunk_overlap`: number of overlapping bytes between consecutive chunks
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self { chunk_size: chunk_size.max(1), chunk_overlap }
    }
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let text = &document.text;
        let ranges = recursive_ranges(text, 0..text.len(), self.chunk_size, self.chunk_overlap);
        build_chunks(document, ranges, None)
    }
}

/// Splits text by markdown headers, keeping each section as a chunk.
///
/// Each chunk is prefixed with its header hierarchy (`Intro > Setup`), which
/// is also stored in the `header_path` metadata field. Sections longer than
/// `chunk_size` are split further with the recursive strategy.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::MarkdownChunker;
///
/// let chunker = MarkdownChunker::new(512, 100);
/// let chunks = chunker.chunk(&document);
/// ```
#[derive(Debug, Clone)]
pub struct MarkdownChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl MarkdownChunker {
    /// Create a new `MarkdownChunker`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size`: maximum number of bytes per chunk body
    /// * `chunk_overlap`: number of overlapping bytes between consecutive chunks
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self { chunk_size: chunk_size.max(1), chunk_overlap }
    }
}

/// A markdown section: its header hierarchy and the byte range of its body.
struct MarkdownSection {
    header_path: String,
    body: Range<usize>,
}

/// `Some(level, title)` if `line` is an ATX header.
fn header_line(line: &str) -> Option<(usize, &str)> {
    let trimmed = line.trim_start();
    let level = trimmed.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &trimmed[level..];
    if rest.is_empty() || rest.starts_with(' ') || rest.starts_with('\t') {
        Some((level, rest.trim()))
    } else {
        None
    }
}

fn parse_markdown_sections(text: &str) -> Vec<MarkdownSection> {
    let mut sections = Vec::new();
    let mut headers: Vec<String> = Vec::new();
    let mut header_path = String::new();
    let mut body_start = 0;
    let mut in_fence = false;
    let mut line_start = 0;

    for line in text.split_inclusive('\n') {
        let line_end = line_start + line.len();
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        } else if !in_fence {
            if let Some((level, title)) = header_line(line) {
                sections.push(MarkdownSection {
                    header_path: header_path.clone(),
                    body: body_start..line_start,
                });
                headers.truncate(level - 1);
                headers.push(title.to_string());
                header_path = headers.join(" > ");
                body_start = line_end;
            }
        }
        line_start = line_end;
    }
    sections.push(MarkdownSection { header_path, body: body_start..text.len() });
    sections
}

impl Chunker for MarkdownChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let text = &document.text;
        let mut chunks = Vec::new();

        for section in parse_markdown_sections(text) {
            let ranges = recursive_ranges(text, section.body, self.chunk_size, self.chunk_overlap);
            let prefix = Some(section.header_path.as_str()).filter(|p| !p.is_empty());
            for range in distinct_ranges(text, ranges) {
                if let Some(chunk) = make_chunk(document, range, chunks.len(), prefix) {
                    chunks.push(chunk);
                }
            }
        }

        chunks
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use proptest::prelude::*;

    use super::*;

    fn doc(text: &str) -> Document {
        Document::new("doc.txt", text).with_metadata("source", "doc.txt")
    }

    #[test]
    fn fixed_chunks_overlap_and_cover_the_text() {
        let chunks = FixedSizeChunker::new(10, 3).chunk(&doc("abcdefghijklmnopqrstuvwxyz"));
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["abcdefghij", "hijklmnopq", "opqrstuvwx", "vwxyz"]);
        assert_eq!(chunks[1].offset, 7);
        assert_eq!(chunks[3].chunk_index, 3);
        assert_eq!(chunks[3].metadata.get("chunk_index").map(String::as_str), Some("3"));
        assert_eq!(chunks[0].metadata.get("source").map(String::as_str), Some("doc.txt"));
    }

    #[test]
    fn fixed_chunks_respect_char_boundaries() {
        let text = "héllo wörld ünïcode çhars";
        for chunk in FixedSizeChunker::new(4, 1).chunk(&doc(text)) {
            assert!(chunk.text.len() <= 4 || chunk.text.chars().count() == 1);
            assert_eq!(&text[chunk.offset..chunk.offset + chunk.text.len()], chunk.text);
        }
    }

    #[test]
    fn recursive_prefers_paragraph_boundaries() {
        let text = "First paragraph here.\n\nSecond paragraph here.\n\nThird one.";
        let chunks = RecursiveChunker::new(30, 0).chunk(&doc(text));
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["First paragraph here.", "Second paragraph here.", "Third one."]);
        assert_eq!(chunks[1].offset, text.find("Second").unwrap());
    }

    #[test]
    fn recursive_carries_overlap_between_chunks() {
        let text = "one two three four five six seven eight nine ten";
        let chunks = RecursiveChunker::new(20, 8).chunk(&doc(text));
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let prev_end = pair[0].offset + pair[0].text.len();
            assert!(pair[1].offset < prev_end, "expected overlap between {:?} and {:?}", pair[0].text, pair[1].text);
        }
    }

    #[test]
    fn markdown_prefixes_header_path() {
        let text = "# Guide\n\nIntro text.\n\n## Setup\n\nInstall it.\n\n```\n# not a header\n```\n";
        let chunks = MarkdownChunker::new(200, 0).chunk(&doc(text));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "Guide\nIntro text.");
        assert!(chunks[1].text.starts_with("Guide > Setup\nInstall it."));
        assert!(chunks[1].text.contains("# not a header"));
        assert_eq!(chunks[1].metadata.get("header_path").map(String::as_str), Some("Guide > Setup"));
    }

    #[test]
    fn empty_and_blank_documents_produce_no_chunks() {
        assert!(FixedSizeChunker::new(10, 2).chunk(&doc("")).is_empty());
        assert!(RecursiveChunker::new(10, 2).chunk(&doc("   \n\n  ")).is_empty());
        assert!(MarkdownChunker::new(10, 2).chunk(&doc("")).is_empty());
    }

    #[test]
    fn chunk_ids_depend_on_document_offset_and_text() {
        let a = chunk_id("a.txt", 0, "hello");
        assert_eq!(a.len(), 32);
        assert_eq!(a, chunk_id("a.txt", 0, "hello"));
        assert_ne!(a, chunk_id("b.txt", 0, "hello"));
        assert_ne!(a, chunk_id("a.txt", 1, "hello"));
    }

    #[test]
    fn heavy_overlap_never_repeats_a_chunk() {
        let chunks = RecursiveChunker::new(5, 4).chunk(&doc("aaaa      bbbb cccc"));
        let ids: HashSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids.len(), chunks.len());
        assert_eq!(chunks.iter().filter(|c| c.text == "bbbb").count(), 1);
        for pair in chunks.windows(2) {
            assert!(pair[1].offset + pair[1].text.len() > pair[0].offset + pair[0].text.len());
        }
    }

    proptest! {
        #[test]
        fn recursive_chunks_are_bounded_slices(
            text in "[a-zé \\n.!?]{0,400}",
            size in 8usize..64,
            overlap in 0usize..8,
        ) {
            let document = doc(&text);
            let chunks = RecursiveChunker::new(size, overlap).chunk(&document);
            let again = RecursiveChunker::new(size, overlap).chunk(&document);
            prop_assert_eq!(&chunks, &again);
            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert_eq!(chunk.chunk_index, i);
                prop_assert!(chunk.text.len() <= size);
                prop_assert!(!chunk.text.trim().is_empty());
                prop_assert_eq!(&text[chunk.offset..chunk.offset + chunk.text.len()], chunk.text.as_str());
            }
            let ids: HashSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
            prop_assert_eq!(ids.len(), chunks.len());
        }

        #[test]
        fn fixed_chunks_have_unique_ids(
            text in "[a-z \\n]{0,200}",
            size in 1usize..16,
            overlap in 0usize..16,
        ) {
            let chunks = FixedSizeChunker::new(size, overlap).chunk(&doc(&text));
            let ids: HashSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
            prop_assert_eq!(ids.len(), chunks.len());
        }
    }
}
