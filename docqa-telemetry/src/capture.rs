//! In-memory capture of log events.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Record};
use tracing::{Event, Id, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;

/// One recorded event.
#[derive(Debug, Clone, Serialize)]
pub struct CapturedEvent {
    pub level: String,
    pub target: String,
    /// The event's message, if it had one.
    pub message: Option<String>,
    /// The event's own fields.
    pub fields: HashMap<String, serde_json::Value>,
    /// Fields of the enclosing spans, innermost last. Event fields win.
    pub span_fields: HashMap<String, serde_json::Value>,
}

impl CapturedEvent {
    /// A field from the event or, failing that, from an enclosing span.
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.fields.get(name).or_else(|| self.span_fields.get(name))
    }

    /// A field rendered as a string; numbers and booleans are formatted.
    pub fn field_str(&self, name: &str) -> Option<String> {
        self.field(name).map(|value| match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// Shared store of captured events.
///
/// Clone it freely; every clone and every [`CaptureLayer`] made from it see
/// the same events.
#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    events: Arc<RwLock<Vec<CapturedEvent>>>,
}

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// A layer that records into this capture.
    pub fn layer(&self) -> CaptureLayer {
        CaptureLayer { capture: self.clone() }
    }

    /// All events so far, oldest first.
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.read().map(|events| events.clone()).unwrap_or_default()
    }

    /// Events whose message equals `message`.
    pub fn with_message(&self, message: &str) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.message.as_deref() == Some(message))
            .collect()
    }

    /// Whether any event carried `message`.
    pub fn contains(&self, message: &str) -> bool {
        self.events
            .read()
            .map(|events| events.iter().any(|event| event.message.as_deref() == Some(message)))
            .unwrap_or(false)
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.write() {
            events.clear();
        }
    }

    fn push(&self, event: CapturedEvent) {
        if let Ok(mut events) = self.events.write() {
            events.push(event);
        }
    }
}

/// A `tracing` layer that stores events in a [`LogCapture`].
#[derive(Debug, Clone)]
pub struct CaptureLayer {
    capture: LogCapture,
}

/// Fields recorded on a span, kept in its extensions.
#[derive(Clone, Default)]
struct SpanFields(HashMap<String, serde_json::Value>);

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut visitor = JsonVisitor::default();
        attrs.record(&mut visitor);
        span.extensions_mut().insert(SpanFields(visitor.fields));
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut visitor = JsonVisitor::default();
        values.record(&mut visitor);
        let mut extensions = span.extensions_mut();
        if let Some(fields) = extensions.get_mut::<SpanFields>() {
            fields.0.extend(visitor.fields);
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);

        let mut span_fields = HashMap::new();
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                if let Some(fields) = span.extensions().get::<SpanFields>() {
                    span_fields.extend(fields.0.clone());
                }
            }
        }

        let metadata = event.metadata();
        self.capture.push(CapturedEvent {
            level: metadata.level().to_string(),
            target: metadata.target().to_string(),
            message: visitor.message,
            fields: visitor.fields,
            span_fields,
        });
    }
}

#[derive(Default)]
struct JsonVisitor {
    message: Option<String>,
    fields: HashMap<String, serde_json::Value>,
}

impl JsonVisitor {
    fn insert(&mut self, field: &Field, value: serde_json::Value) {
        if field.name() == "message" {
            self.message = Some(match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            });
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for JsonVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.insert(field, serde_json::Value::String(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, serde_json::Value::String(value.to_string()));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, serde_json::Value::Bool(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, serde_json::json!(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, serde_json::json!(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, serde_json::json!(value));
    }
}
