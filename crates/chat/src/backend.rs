//! Generation backend interface and producer helpers.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use proto::{ConfigurationError, GenerationError, HistoryMessage};
use tokio::sync::mpsc;

/// Incremental text producer returned by a backend.
///
/// Yields text deltas in order. The stream ending is completion; an `Err`
/// item is the (single) error signal and nothing after it is read.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, GenerationError>> + Send>>;

/// Sending half of a [`channel_stream`] producer.
pub type TextSender = mpsc::Sender<Result<String, GenerationError>>;

/// Request to the generation backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// Prior turns with content, in transcript order.
    pub history: Vec<HistoryMessage>,
    /// The new user prompt.
    pub prompt: String,
    /// Model captured at submission time.
    pub model: String,
}

/// Generation backend trait
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Cheap synchronous check that the backend is usable at all.
    ///
    /// Runs before any transcript mutation; a failure here never leaves
    /// partial state behind.
    fn preflight(&self) -> Result<(), ConfigurationError> {
        Ok(())
    }

    /// Starts a generation and returns its incremental text producer.
    async fn generate(&self, request: GenerationRequest) -> Result<TextStream, proto::Error>;
}

/// Builds an mpsc-backed producer.
///
/// Dropping the sender completes the stream.
pub fn channel_stream(capacity: usize) -> (TextSender, TextStream) {
    let (tx, rx) = mpsc::channel(capacity);
    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    (tx, Box::pin(stream))
}

/// Builds a producer that replays a fixed script.
pub fn scripted_stream(items: Vec<Result<String, GenerationError>>) -> TextStream {
    Box::pin(futures_util::stream::iter(items))
}
