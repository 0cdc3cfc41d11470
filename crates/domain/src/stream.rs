use std::pin::Pin;

/// A boxed async stream, used for upstream byte streams.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Lifecycle of a single completion request as it moves through the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionState {
    /// Resolving the provider and building the client.
    Preflight,
    /// Failed before any response bytes were written.
    Rejected,
    /// Non-streaming call failed upstream.
    Failed,
    /// Headers flushed; chunks are being relayed.
    Streaming,
    /// The upstream `[DONE]` sentinel was relayed.
    Completed,
    /// Stream terminated after headers were flushed without a sentinel.
    Aborted,
}

impl CompletionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionState::Preflight => "preflight",
            CompletionState::Rejected => "rejected",
            CompletionState::Failed => "failed",
            CompletionState::Streaming => "streaming",
            CompletionState::Completed => "completed",
            CompletionState::Aborted => "aborted",
        }
    }

    /// Whether structured (JSON) errors can still be emitted in this state.
    pub fn accepts_structured_error(&self) -> bool {
        matches!(self, CompletionState::Preflight)
    }
}
