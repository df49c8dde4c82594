//! Text shown to the user.

use std::fmt::Write as _;
use std::time::Duration;

use docqa_rag::{DocumentInfo, IngestReport, RagError, SearchResult};

/// The library listing, one document per line.
pub fn documents(documents: &[DocumentInfo]) -> String {
    if documents.is_empty() {
        return "No documents uploaded.".to_string();
    }
    let width = documents.iter().map(|d| d.name.len()).max().unwrap_or_default();
    let mut out = String::new();
    for document in documents {
        let format = document.format.map(|f| f.to_string()).unwrap_or_else(|| "unknown".into());
        let note = if document.supported { "" } else { "  (not indexed: unsupported format)" };
        let _ = writeln!(
            out,
            "{:<width$}  {:>10}  {format}{note}",
            document.name,
            human_size(document.size),
        );
    }
    let _ = write!(out, "{} document(s)", documents.len());
    out
}

/// A byte count with a binary unit.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// The ingestion summary followed by any skipped documents.
pub fn report(report: &IngestReport) -> String {
    let mut out = report.summary();
    for skipped in &report.skipped {
        let _ = write!(out, "\n  skipped {}: {}", skipped.path, skipped.reason);
    }
    out
}

/// The chunks an answer was grounded on.
pub fn sources(retrieval: &[SearchResult]) -> String {
    if retrieval.is_empty() {
        return "Source Documents: none".to_string();
    }
    let mut out = String::from("Source Documents:");
    for result in retrieval {
        let _ = write!(
            out,
            "\n\n> {} (score {:.3}):\n{}",
            result.chunk.document_id,
            result.score,
            result.chunk.text.trim()
        );
    }
    out
}

/// Footer printed after an answer.
pub fn elapsed(duration: Duration) -> String {
    format!("(took {:.2} s)", duration.as_secs_f64())
}

/// An error as shown on stderr.
pub fn error(error: &anyhow::Error) -> String {
    match error.downcast_ref::<RagError>() {
        Some(e @ RagError::IndexCorruption { .. }) => {
            format!("Error: {}\nRun `docqa ingest --rebuild` to rebuild the index.", e.user_message())
        }
        Some(e @ RagError::Configuration(message)) if message.contains("re-index") => {
            format!(
                "Error: {}\nRun `docqa ingest --rebuild` to re-index with the current embedding model.",
                e.user_message()
            )
        }
        Some(e) => format!("Error: {}", e.user_message()),
        None => format!("Error: {error:#}"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use docqa_rag::{Chunk, DocumentFormat, IngestMode, SkippedDocument};

    use super::*;

    fn info(name: &str, size: u64, format: Option<DocumentFormat>, supported: bool) -> DocumentInfo {
        DocumentInfo { name: name.into(), path: std::path::PathBuf::from(name), format, size, supported }
    }

    #[test]
    fn lists_documents_with_sizes() {
        assert_eq!(documents(&[]), "No documents uploaded.");

        let listing = documents(&[
            info("france.txt", 31, Some(DocumentFormat::Text), true),
            info("slides.pdf", 2048, Some(DocumentFormat::Pdf), false),
        ]);
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("france.txt"));
        assert!(lines[0].contains("31 B"));
        assert!(lines[1].contains("2.0 KiB"));
        assert!(lines[1].ends_with("(not indexed: unsupported format)"));
        assert_eq!(lines[2], "2 document(s)");
    }

    #[test]
    fn human_sizes() {
        assert_eq!(human_size(0), "0 B");
        assert_eq!(human_size(1536), "1.5 KiB");
        assert_eq!(human_size(5 * 1024 * 1024), "5.0 MiB");
    }

    #[test]
    fn report_lists_skipped_documents() {
        let report = IngestReport {
            mode: IngestMode::Incremental,
            documents_seen: 2,
            documents_indexed: 1,
            skipped: vec![SkippedDocument { path: "a.pdf".into(), reason: "unsupported".into() }],
            ..IngestReport::default()
        };
        let text = super::report(&report);
        assert!(text.contains("1 skipped"));
        assert!(text.ends_with("skipped a.pdf: unsupported"));
    }

    #[test]
    fn sources_block() {
        assert_eq!(sources(&[]), "Source Documents: none");

        let chunk = Chunk {
            id: "abc".into(),
            text: "The capital of France is Paris.\n".into(),
            embedding: vec![],
            metadata: HashMap::new(),
            document_id: "france.txt".into(),
            offset: 0,
            chunk_index: 0,
        };
        let text = sources(&[SearchResult { chunk, score: 0.8 }]);
        assert_eq!(
            text,
            "Source Documents:\n\n> france.txt (score 0.800):\nThe capital of France is Paris."
        );
    }

    #[test]
    fn errors_use_the_user_message() {
        let corrupt = anyhow::Error::new(RagError::IndexCorruption {
            path: PathBuf::from("db/index.json"),
            message: "unreadable index".into(),
        });
        let text = error(&corrupt);
        assert!(text.starts_with("Error: The document index is damaged"));
        assert!(text.contains("docqa ingest --rebuild"));

        let cancelled = anyhow::Error::new(RagError::Cancelled);
        assert_eq!(error(&cancelled), "Error: The request was cancelled.");

        let other = anyhow::anyhow!("disk full").context("saving upload");
        assert_eq!(error(&other), "Error: saving upload: disk full");
    }
}
