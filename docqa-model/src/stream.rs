//! Lazy, cancellable token streams.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::stream::{AbortHandle, Abortable, Stream, StreamExt};
use tokio::time::{Instant, Sleep};

use crate::error::{ModelError, Result};

type BoxTokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Handle used to stop a [`TokenStream`] from another task.
///
/// Cancelling is idempotent. The stream yields a single
/// [`ModelError::Cancelled`] and then ends; the producer is dropped, which
/// closes any HTTP response it was reading.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    handle: AbortHandle,
}

impl CancelHandle {
    /// Request cancellation of the associated stream.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.handle.is_aborted()
    }
}

/// A finite stream of generated tokens.
///
/// Tokens are pulled one at a time as the producer emits them. Once the stream
/// returns `None` it stays exhausted; it cannot be restarted. An optional
/// deadline bounds the whole generation: when it expires the stream yields
/// [`ModelError::Timeout`] and ends.
pub struct TokenStream {
    inner: Option<Abortable<BoxTokenStream>>,
    handle: AbortHandle,
    deadline: Option<(Pin<Box<Sleep>>, Duration)>,
}

impl TokenStream {
    /// Wrap a producer stream.
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<String>> + Send + 'static,
    {
        let (handle, registration) = AbortHandle::new_pair();
        let boxed: BoxTokenStream = Box::pin(stream);
        Self { inner: Some(Abortable::new(boxed, registration)), handle, deadline: None }
    }

    /// A stream that yields the given tokens and ends.
    pub fn from_tokens<I, T>(tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let tokens: Vec<Result<String>> = tokens.into_iter().map(|t| Ok(t.into())).collect();
        Self::new(futures::stream::iter(tokens))
    }

    /// Bound the remaining generation by `timeout`, measured from now.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some((Box::pin(tokio::time::sleep(timeout)), timeout));
        self
    }

    /// Bound the remaining generation by an absolute deadline.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        let budget = deadline.saturating_duration_since(Instant::now());
        self.deadline = Some((Box::pin(tokio::time::sleep_until(deadline)), budget));
        self
    }

    /// A handle that can cancel this stream from elsewhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle { handle: self.handle.clone() }
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.handle.is_aborted()
    }

    /// Whether the stream has ended (normally, by error, or by cancellation).
    pub fn is_finished(&self) -> bool {
        self.inner.is_none()
    }

    /// Drain the stream and concatenate all tokens.
    pub async fn collect_text(mut self) -> Result<String> {
        let mut text = String::new();
        while let Some(token) = self.next().await {
            text.push_str(&token?);
        }
        Ok(text)
    }

    fn finish(&mut self) {
        self.inner = None;
        self.deadline = None;
    }
}

impl Stream for TokenStream {
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.inner.is_none() {
            return Poll::Ready(None);
        }

        if let Some((sleep, timeout)) = this.deadline.as_mut() {
            if sleep.as_mut().poll(cx).is_ready() {
                let timeout = *timeout;
                this.finish();
                return Poll::Ready(Some(Err(ModelError::Timeout(timeout))));
            }
        }

        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };
        match inner.poll_next_unpin(cx) {
            Poll::Ready(Some(item)) => Poll::Ready(Some(item)),
            Poll::Ready(None) => {
                let cancelled = this.handle.is_aborted();
                this.finish();
                if cancelled {
                    Poll::Ready(Some(Err(ModelError::Cancelled)))
                } else {
                    Poll::Ready(None)
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl fmt::Debug for TokenStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenStream")
            .field("finished", &self.is_finished())
            .field("cancelled", &self.is_cancelled())
            .field("timeout", &self.deadline.as_ref().map(|(_, timeout)| *timeout))
            .finish()
    }
}
