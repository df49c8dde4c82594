//! Text extraction from uploaded files.
//!
//! [`DefaultParser`] handles the text-based formats (plain text, Markdown,
//! HTML, CSV, e-mail and Evernote exports). Binary office formats are
//! recognised so uploads are accepted, but parsing them reports a
//! [`RagError::Parse`], which ingestion treats as skip-and-report.

use pulldown_cmark::{Event, Parser, Tag, TagEnd};
use quick_xml::Reader;
use quick_xml::events::Event as XmlEvent;
use scraper::{ElementRef, Html, Selector};

use crate::document::{Document, DocumentFormat, SourceDocument};
use crate::error::{RagError, Result};

/// Turns a raw [`SourceDocument`] into a text [`Document`].
pub trait DocumentParser: Send + Sync {
    /// Extract the text of `source`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Parse`] for unsupported formats, undecodable bytes,
    /// or documents without any text.
    fn parse(&self, source: &SourceDocument) -> Result<Document>;
}

/// The built-in parser for text-based formats.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultParser;

impl DocumentParser for DefaultParser {
    fn parse(&self, source: &SourceDocument) -> Result<Document> {
        let fail = |message: String| RagError::Parse { path: source.name.clone(), message };

        let format = source.format.ok_or_else(|| fail("unrecognised file extension".into()))?;
        if !format.is_supported() {
            return Err(fail(format!("{format} files are not supported")));
        }

        let raw = std::str::from_utf8(&source.content)
            .map_err(|e| fail(format!("not valid UTF-8 text: {e}")))?;
        let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw).replace("\r\n", "\n");

        let text = match format {
            DocumentFormat::Markdown => markdown_to_text(&raw),
            DocumentFormat::Html => html_to_text(&raw),
            DocumentFormat::Csv => csv_to_text(&raw),
            DocumentFormat::Email => email_to_text(&raw),
            DocumentFormat::Evernote => evernote_to_text(&raw)
                .map_err(|e| fail(format!("invalid Evernote export: {e}")))?,
            _ => normalize_whitespace(&raw),
        };

        if text.trim().is_empty() {
            return Err(fail("no extractable text".into()));
        }

        Ok(Document::new(source.name.clone(), text)
            .with_metadata("source", source.name.clone())
            .with_metadata("format", format.to_string()))
    }
}

/// Collapse runs of blanks inside lines and keep at most one empty line in a row.
fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 || out.is_empty() {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(&line);
        out.push('\n');
    }
    out.trim().to_string()
}

/// Render Markdown to plain text, keeping `#` heading lines so the
/// markdown chunker can still see the section structure.
fn markdown_to_text(source: &str) -> String {
    let mut out = String::new();
    for event in Parser::new(source) {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                out.push_str("\n\n");
                out.push_str(&"#".repeat(level as usize));
                out.push(' ');
            }
            Event::Start(Tag::Item) => out.push_str("\n- "),
            Event::End(TagEnd::Heading(_) | TagEnd::Paragraph | TagEnd::CodeBlock) => {
                out.push_str("\n\n");
            }
            Event::End(TagEnd::Item) => out.push('\n'),
            Event::Text(text) | Event::Code(text) => out.push_str(&text),
            Event::SoftBreak => out.push(' '),
            Event::HardBreak => out.push('\n'),
            _ => {}
        }
    }
    normalize_whitespace(&out)
}

const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "head", "template", "svg"];
const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "section", "article", "header", "footer", "main", "aside", "nav", "h1", "h2",
    "h3", "h4", "h5", "h6", "li", "ul", "ol", "tr", "table", "br", "pre", "blockquote", "dd",
    "dt", "en-note",
];

fn collect_html_text(element: ElementRef<'_>, out: &mut String) {
    let name = element.value().name();
    if SKIPPED_ELEMENTS.contains(&name) {
        return;
    }
    let block = BLOCK_ELEMENTS.contains(&name);
    if block {
        out.push('\n');
    }
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
        } else if let Some(child) = ElementRef::wrap(child) {
            collect_html_text(child, out);
        }
    }
    if block {
        out.push('\n');
    }
}

/// Visible text of an HTML document, prefixed by its `<title>`.
fn html_to_text(source: &str) -> String {
    let html = Html::parse_document(source);
    let mut out = String::new();

    if let Ok(selector) = Selector::parse("title") {
        if let Some(title) = html.select(&selector).next() {
            out.push_str(&title.text().collect::<String>());
            out.push_str("\n\n");
        }
    }
    collect_html_text(html.root_element(), &mut out);
    normalize_whitespace(&out)
}

/// Split one CSV record stream into rows of fields (RFC 4180 quoting).
fn parse_csv(source: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, in_quotes) {
            ('"', true) if chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            ('"', true) => in_quotes = false,
            ('"', false) if field.is_empty() => in_quotes = true,
            (',', false) => row.push(std::mem::take(&mut field)),
            ('\n', false) => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            (c, _) => field.push(c),
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows.retain(|r| r.iter().any(|f| !f.trim().is_empty()));
    rows
}

/// One line per data row: `header: value, header: value`.
fn csv_to_text(source: &str) -> String {
    let mut rows = parse_csv(source).into_iter();
    let Some(headers) = rows.next() else {
        return String::new();
    };
    let mut out = String::new();
    for row in rows {
        let line = row
            .iter()
            .enumerate()
            .filter(|(_, value)| !value.trim().is_empty())
            .map(|(i, value)| match headers.get(i) {
                Some(header) if !header.trim().is_empty() => {
                    format!("{}: {}", header.trim(), value.trim())
                }
                _ => value.trim().to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str(&line);
        out.push('\n');
    }
    if out.is_empty() {
        // A header-only file still carries text.
        return headers.join(", ");
    }
    out.trim_end().to_string()
}

/// Subject, sender and body of an RFC 822 message.
fn email_to_text(source: &str) -> String {
    let (head, body) = source.split_once("\n\n").unwrap_or((source, ""));

    let mut subject = None;
    let mut from = None;
    let mut is_html = false;
    for line in head.lines() {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        match name.trim().to_ascii_lowercase().as_str() {
            "subject" => subject = Some(value.trim().to_string()),
            "from" => from = Some(value.trim().to_string()),
            "content-type" => is_html = value.to_ascii_lowercase().contains("text/html"),
            _ => {}
        }
    }

    let mut out = String::new();
    if let Some(subject) = subject {
        out.push_str(&format!("Subject: {subject}\n"));
    }
    if let Some(from) = from {
        out.push_str(&format!("From: {from}\n"));
    }
    out.push('\n');
    if is_html {
        out.push_str(&html_to_text(body));
    } else {
        out.push_str(body);
    }
    normalize_whitespace(&out)
}

#[derive(Clone, Copy, PartialEq)]
enum NoteField {
    Title,
    Content,
    Other,
}

/// Titles and note bodies of an Evernote `.enex` export.
fn evernote_to_text(source: &str) -> std::result::Result<String, quick_xml::Error> {
    let mut reader = Reader::from_str(source);
    let mut out = String::new();
    let mut in_note = false;
    let mut field = NoteField::Other;
    let mut text = String::new();

    loop {
        match reader.read_event()? {
            XmlEvent::Start(element) => match element.local_name().as_ref() {
                b"note" => in_note = true,
                b"title" if in_note => {
                    field = NoteField::Title;
                    text.clear();
                }
                b"content" if in_note => {
                    field = NoteField::Content;
                    text.clear();
                }
                _ => {}
            },
            XmlEvent::End(element) => match element.local_name().as_ref() {
                b"note" => in_note = false,
                b"title" if field == NoteField::Title => {
                    out.push_str(&format!("# {}\n\n", text.trim()));
                    field = NoteField::Other;
                }
                b"content" if field == NoteField::Content => {
                    // ENML bodies are XHTML, either in CDATA or escaped.
                    out.push_str(&html_to_text(&text));
                    out.push_str("\n\n");
                    field = NoteField::Other;
                }
                _ => {}
            },
            XmlEvent::Text(chunk) if field != NoteField::Other => {
                match chunk.unescape() {
                    Ok(decoded) => text.push_str(&decoded),
                    Err(_) => text.push_str(&String::from_utf8_lossy(&chunk)),
                }
            }
            XmlEvent::CData(chunk) if field != NoteField::Other => {
                text.push_str(&String::from_utf8_lossy(&chunk));
            }
            XmlEvent::Eof => break,
            _ => {}
        }
    }
    Ok(normalize_whitespace(&out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(name: &str, content: &str) -> Result<Document> {
        DefaultParser.parse(&SourceDocument::new(name, content.as_bytes().to_vec()))
    }

    #[test]
    fn plain_text_is_normalized_and_tagged() {
        let doc = parse("notes/a.txt", "Hello   world\r\n\r\n\r\n\r\nSecond   line").unwrap();
        assert_eq!(doc.id, "notes/a.txt");
        assert_eq!(doc.text, "Hello world\n\nSecond line");
        assert_eq!(doc.metadata.get("source").map(String::as_str), Some("notes/a.txt"));
        assert_eq!(doc.metadata.get("format").map(String::as_str), Some("txt"));
    }

    #[test]
    fn markdown_keeps_headings_and_drops_markup() {
        let doc = parse("a.md", "# Title\n\nSome *emphasis* and `code`.\n\n## Sub\n\n- one\n- two\n")
            .unwrap();
        assert!(doc.text.starts_with("# Title"));
        assert!(doc.text.contains("Some emphasis and code."));
        assert!(doc.text.contains("## Sub"));
        assert!(doc.text.contains("- one"));
        assert!(!doc.text.contains('*'));
    }

    #[test]
    fn html_extracts_visible_text_only() {
        let html = "<html><head><title>Capitals</title><style>p{}</style></head>\
                    <body><h1>Europe</h1><p>The capital of France is Paris.</p>\
                    <script>var x = 1;</script></body></html>";
        let doc = parse("page.html", html).unwrap();
        assert!(doc.text.starts_with("Capitals"));
        assert!(doc.text.contains("Europe\n"));
        assert!(doc.text.contains("The capital of France is Paris."));
        assert!(!doc.text.contains("var x"));
        assert!(!doc.text.contains("p{}"));
    }

    #[test]
    fn csv_rows_become_labelled_lines() {
        let doc = parse("c.csv", "country,capital\nFrance,Paris\n\"Korea, South\",Seoul\n").unwrap();
        assert_eq!(doc.text, "country: France, capital: Paris\ncountry: Korea, South, capital: Seoul");
    }

    #[test]
    fn csv_handles_escaped_quotes() {
        let rows = parse_csv("a,b\n\"say \"\"hi\"\"\",2");
        assert_eq!(rows[1], vec!["say \"hi\"", "2"]);
    }

    #[test]
    fn email_keeps_subject_sender_and_body() {
        let eml = "From: Ann <ann@example.com>\nSubject: Trip\nTo: Bob\n\nMeet in Paris.\n";
        let doc = parse("m.eml", eml).unwrap();
        assert_eq!(doc.text, "Subject: Trip\nFrom: Ann <ann@example.com>\n\nMeet in Paris.");
    }

    #[test]
    fn evernote_export_yields_titles_and_content() {
        let enex = "<?xml version=\"1.0\"?><en-export><note><title>Travel</title>\
                    <content><![CDATA[<en-note><div>Paris in May</div></en-note>]]></content>\
                    </note></en-export>";
        let doc = parse("n.enex", enex).unwrap();
        assert!(doc.text.starts_with("# Travel"));
        assert!(doc.text.contains("Paris in May"));
    }

    #[test]
    fn evernote_titles_decode_entities_and_tags_may_carry_attributes() {
        let enex = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
                    <!DOCTYPE en-export SYSTEM \"http://xml.evernote.com/pub/evernote-export3.dtd\">\n\
                    <en-export export-date=\"20240101T000000Z\">\
                    <note id=\"1\"><title lang=\"en\">Salt &amp; Pepper &lt;notes&gt;</title>\
                    <content><![CDATA[<en-note><div>Season to taste.</div></en-note>]]></content></note>\
                    <note><title>Second</title>\
                    <content>&lt;en-note&gt;Escaped body&lt;/en-note&gt;</content></note>\
                    </en-export>";
        let doc = parse("n.enex", enex).unwrap();
        assert!(doc.text.starts_with("# Salt & Pepper <notes>"), "{}", doc.text);
        assert!(doc.text.contains("Season to taste."));
        assert!(doc.text.contains("# Second"));
        assert!(doc.text.contains("Escaped body"));
        assert!(!doc.text.contains("en-note"));
    }

    #[test]
    fn malformed_evernote_export_is_a_parse_error() {
        let err = parse("bad.enex", "<en-export><note><title>x</note></en-export>").unwrap_err();
        assert!(matches!(err, RagError::Parse { message, .. } if message.contains("Evernote")));
    }

    #[test]
    fn unsupported_and_unknown_formats_are_parse_errors() {
        assert!(matches!(parse("a.pdf", "%PDF-1.7"), Err(RagError::Parse { .. })));
        assert!(matches!(parse("a.bin", "data"), Err(RagError::Parse { .. })));
    }

    #[test]
    fn invalid_utf8_and_empty_text_are_parse_errors() {
        let bad = SourceDocument::new("a.txt", vec![0xff, 0xfe, 0x00]);
        assert!(matches!(DefaultParser.parse(&bad), Err(RagError::Parse { .. })));
        assert!(matches!(parse("empty.txt", "  \n\n "), Err(RagError::Parse { message, .. }) if message.contains("no extractable")));
    }
}
