use tracing::{info, info_span, warn};
use tracing_subscriber::prelude::*;

use crate::LogCapture;

fn with_capture(f: impl FnOnce()) -> LogCapture {
    let capture = LogCapture::new();
    let subscriber = tracing_subscriber::registry().with(capture.layer());
    tracing::subscriber::with_default(subscriber, f);
    capture
}

#[test]
fn captures_message_level_and_fields() {
    let capture = with_capture(|| {
        info!(chunks = 3u64, mode = "rebuild", "index committed");
        warn!(document = %"slides.pdf", "skipping document");
    });

    let events = capture.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].level, "INFO");
    assert_eq!(events[0].message.as_deref(), Some("index committed"));
    assert_eq!(events[0].field("chunks"), Some(&serde_json::json!(3)));
    assert_eq!(events[0].field_str("mode").as_deref(), Some("rebuild"));
    assert_eq!(events[1].level, "WARN");
    assert_eq!(events[1].field_str("document").as_deref(), Some("slides.pdf"));
    assert!(capture.contains("skipping document"));
    assert!(!capture.contains("nothing like this"));
}

#[test]
fn events_see_enclosing_span_fields() {
    let capture = with_capture(|| {
        let span = info_span!("ask", query_id = "q-1", answer_len = tracing::field::Empty);
        let _guard = span.enter();
        span.record("answer_len", 42u64);
        info!("query completed");
    });

    let completed = capture.with_message("query completed");
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].field_str("query_id").as_deref(), Some("q-1"));
    assert_eq!(completed[0].field("answer_len"), Some(&serde_json::json!(42)));
    assert!(completed[0].fields.is_empty());
}

#[test]
fn event_fields_shadow_span_fields() {
    let capture = with_capture(|| {
        let span = info_span!("outer", state = "embedding");
        let _guard = span.enter();
        info!(state = "errored", "query failed");
    });

    let event = &capture.events()[0];
    assert_eq!(event.field_str("state").as_deref(), Some("errored"));
    assert_eq!(event.span_fields.get("state"), Some(&serde_json::json!("embedding")));
}

#[test]
fn clear_empties_every_clone() {
    let capture = with_capture(|| info!("one"));
    let clone = capture.clone();
    assert_eq!(clone.events().len(), 1);
    capture.clear();
    assert!(clone.events().is_empty());
}
