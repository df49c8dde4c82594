//! Scripted language model for tests and offline runs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{ModelError, Result};
use crate::llm::{GenerationRequest, Llm};
use crate::stream::TokenStream;

/// What a [`MockLlm`] does when asked to generate.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Stream a fixed answer, word by word.
    Fixed(String),
    /// Stream the prompt back, word by word.
    Echo,
    /// Refuse to start the generation.
    Fail(ModelError),
    /// Stream `after` words of the fixed answer, then yield `error`.
    FailMidStream { answer: String, after: usize, error: ModelError },
}

/// A deterministic [`Llm`] that never leaves the process.
///
/// Requests are recorded for inspection, and the number of streams that are
/// still alive is tracked so tests can check that cancelled generations are
/// released.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_model::MockLlm;
///
/// let model = MockLlm::fixed("Paris").with_token_delay(Duration::from_millis(5));
/// ```
#[derive(Debug)]
pub struct MockLlm {
    name: String,
    behavior: MockBehavior,
    token_delay: Option<Duration>,
    requests: Mutex<Vec<GenerationRequest>>,
    open_streams: Arc<AtomicUsize>,
}

impl MockLlm {
    /// Create a mock with the given behaviour.
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            name: "mock".to_string(),
            behavior,
            token_delay: None,
            requests: Mutex::new(Vec::new()),
            open_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A mock that always answers `answer`.
    pub fn fixed(answer: impl Into<String>) -> Self {
        Self::new(MockBehavior::Fixed(answer.into()))
    }

    /// A mock that streams the prompt back.
    pub fn echo() -> Self {
        Self::new(MockBehavior::Echo)
    }

    /// A mock whose generations fail to start with `error`.
    pub fn failing(error: ModelError) -> Self {
        Self::new(MockBehavior::Fail(error))
    }

    /// Override the model name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sleep for `delay` before each token.
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = Some(delay);
        self
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().map(|requests| requests.clone()).unwrap_or_default()
    }

    /// Number of `generate` calls received so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|requests| requests.len()).unwrap_or_default()
    }

    /// Number of token streams that have not been dropped yet.
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }
}

/// Split text into word tokens, keeping the trailing whitespace on each.
fn tokenize(text: &str) -> Vec<String> {
    text.split_inclusive(' ').map(str::to_string).collect()
}

/// Decrements the open stream counter when the producer is dropped.
struct OpenStreamGuard(Arc<AtomicUsize>);

impl OpenStreamGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for OpenStreamGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Llm for MockLlm {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: GenerationRequest) -> Result<TokenStream> {
        debug!(model = %self.name, prompt_len = request.prompt.len(), "mock generation");
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        let (tokens, trailing_error) = match &self.behavior {
            MockBehavior::Fail(error) => return Err(error.clone()),
            MockBehavior::Fixed(answer) => (tokenize(answer), None),
            MockBehavior::Echo => (tokenize(&request.prompt), None),
            MockBehavior::FailMidStream { answer, after, error } => {
                let mut tokens = tokenize(answer);
                tokens.truncate(*after);
                (tokens, Some(error.clone()))
            }
        };

        let delay = self.token_delay;
        let guard = OpenStreamGuard::new(Arc::clone(&self.open_streams));
        let stream = async_stream::stream! {
            let _guard = guard;
            for token in tokens {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(token);
            }
            if let Some(error) = trailing_error {
                yield Err(error);
            }
        };

        Ok(TokenStream::new(stream))
    }
}
