//! Channel-based token streaming for generation requests.
//!
//! A generation produces an ordered sequence of token events terminated by
//! exactly one [`StreamEvent::Done`]. The terminal event is sent from the
//! generation task's finalization path, which runs on every exit (natural
//! end, cancellation, cap, engine fault), so the exactly-once guarantee rests
//! on channel close semantics rather than caller discipline.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Why a generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// The engine signalled end-of-generation.
    Stop,
    /// Cooperative cancellation via `stop_generation` or eject.
    Cancelled,
    /// The hard token cap was reached.
    MaxTokens,
    /// The request was rejected (session not ready, or already generating).
    Rejected,
    /// A native engine error ended the loop early; content is partial.
    Fault,
}

/// Final result of a generation.
#[derive(Debug, Clone)]
pub struct Completion {
    /// All streamed fragments concatenated. Partial output on cancellation or
    /// fault is a first-class result, not an error.
    pub content: String,
    pub reason: FinishReason,
    pub tokens: usize,
}

/// One event on a completion stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Token(String),
    Done(Completion),
}

/// Consumer handle for one generation request.
///
/// Tokens arrive in strict generation order. After [`StreamEvent::Done`] the
/// stream yields `None`. Dropping the stream does not by itself cancel the
/// generation; use [`CompletionStream::cancel`] or the session's
/// `stop_generation`.
pub struct CompletionStream {
    rx: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
}

impl CompletionStream {
    pub(crate) fn new(rx: mpsc::Receiver<StreamEvent>, cancel: CancellationToken) -> Self {
        Self { rx, cancel }
    }

    /// Next event, or `None` once the terminal event has been consumed and
    /// the channel is closed.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Request cooperative cancellation of this generation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drain the stream to its terminal event and return the completion.
    pub async fn collect(mut self) -> Completion {
        while let Some(event) = self.rx.recv().await {
            if let StreamEvent::Done(completion) = event {
                return completion;
            }
        }
        // The sender finalizes before dropping, so reaching this point means
        // the generation task was torn down without running; report it as a
        // fault with no content.
        Completion {
            content: String::new(),
            reason: FinishReason::Fault,
            tokens: 0,
        }
    }
}
