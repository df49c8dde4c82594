//! # docqa-telemetry
//!
//! Logging for docqa binaries and tests.
//!
//! [`init_logging`] installs the global `tracing` subscriber: a fmt layer
//! writing to stderr, filtered by `RUST_LOG` (default `info`), as
//! human-readable text or one JSON object per line. [`LogCapture`] records
//! events in memory so tests can assert on what was logged.

pub mod capture;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt, prelude::*};

pub use capture::{CaptureLayer, CapturedEvent, LogCapture};

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "info";

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Json => f.write_str("json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}', expected 'text' or 'json'")),
        }
    }
}

/// Install the global subscriber, filtered by `RUST_LOG`.
///
/// Returns `false` if a global subscriber was already installed; the
/// existing one is kept.
pub fn init_logging(format: LogFormat) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    init_with_filter(format, filter)
}

/// Install the global subscriber with explicit filter directives, such as
/// `docqa_rag=debug,info`. Invalid directives fall back to [`DEFAULT_FILTER`].
pub fn init_logging_with_filter(format: LogFormat, directives: &str) -> bool {
    let filter = EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    init_with_filter(format, filter)
}

fn init_with_filter(format: LogFormat, filter: EnvFilter) -> bool {
    let registry = tracing_subscriber::registry().with(filter);
    let result = match format {
        LogFormat::Text => registry
            .with(tracing_fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
    result.is_ok()
}

#[cfg(test)]
mod test_capture;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(" text ".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("xml".parse::<LogFormat>().is_err());
        assert_eq!(LogFormat::Json.to_string(), "json");
    }

    #[test]
    fn second_init_keeps_the_first_subscriber() {
        // Whichever call wins, every later one is refused.
        let _ = init_logging_with_filter(LogFormat::Text, "warn");
        assert!(!init_logging(LogFormat::Json));
        assert!(!init_logging(LogFormat::Text));
    }
}
