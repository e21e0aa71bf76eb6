use tracing::debug;

use crate::errors::SessionFailure;
use crate::filter::ContentFilter;
use crate::stream::StreamEvent;

/// Callbacks for a single-stream session.
///
/// `on_complete` and `on_error` are mutually exclusive and fire at most once.
pub trait SingleStreamHandler: Send {
    /// Newly arrived, filtered text. Never the whole buffer.
    fn on_chunk(&mut self, delta: &str);
    fn on_complete(&mut self);
    fn on_error(&mut self, message: &str);
    fn on_web_search_start(&mut self, _query: &str) {}
    fn on_web_search_complete(&mut self) {}
}

/// Running text of one logical response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccumulatorState {
    buffer: String,
    is_streaming: bool,
}

impl AccumulatorState {
    pub fn streaming() -> Self {
        Self {
            buffer: String::new(),
            is_streaming: true,
        }
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn is_streaming(&self) -> bool {
        self.is_streaming
    }

    pub(crate) fn append(&mut self, content: &str) {
        self.buffer.push_str(content);
    }

    pub(crate) fn stop(&mut self) {
        self.is_streaming = false;
    }
}

/// Final state of a single-stream session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SingleOutcome {
    /// The stream completed; `text` is everything delivered to `on_chunk`.
    Completed { text: String },
    /// The session failed; text delivered before the failure is kept.
    Failed {
        failure: SessionFailure,
        partial: String,
    },
    /// The caller aborted the session.
    Cancelled { partial: String },
}

impl SingleOutcome {
    /// Text delivered to the caller, whatever the outcome.
    pub fn text(&self) -> &str {
        match self {
            Self::Completed { text } => text,
            Self::Failed { partial, .. } | Self::Cancelled { partial } => partial,
        }
    }

    pub fn failure(&self) -> Option<&SessionFailure> {
        match self {
            Self::Failed { failure, .. } => Some(failure),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Phase {
    Streaming,
    Completed,
    Failed(SessionFailure),
}

/// Turns stream events into delta callbacks for one response.
#[derive(Debug)]
pub struct SingleStreamReconciler {
    filter: ContentFilter,
    state: AccumulatorState,
    emitted: String,
    phase: Phase,
}

impl SingleStreamReconciler {
    pub fn new(filter: ContentFilter) -> Self {
        Self {
            filter,
            state: AccumulatorState::streaming(),
            emitted: String::new(),
            phase: Phase::Streaming,
        }
    }

    /// Raw accumulated content, before filtering.
    pub fn buffer(&self) -> &str {
        self.state.buffer()
    }

    /// Filtered text delivered so far.
    pub fn text(&self) -> &str {
        &self.emitted
    }

    pub fn is_terminal(&self) -> bool {
        self.phase != Phase::Streaming
    }

    /// Applies one event. Returns `true` once the session is terminal; events
    /// after that are ignored.
    pub fn handle<H>(&mut self, event: StreamEvent, handler: &mut H) -> bool
    where
        H: SingleStreamHandler + ?Sized,
    {
        if self.is_terminal() {
            debug!(kind = ?event.kind(), "ignoring event after terminal state");
            return true;
        }
        match event {
            StreamEvent::Chunk { content, .. } => {
                if content.is_empty() {
                    return false;
                }
                self.state.append(&content);
                let delta = self.filter.apply(&content);
                self.emitted.push_str(&delta);
                handler.on_chunk(&delta);
            }
            StreamEvent::WebSearchStart { query } => handler.on_web_search_start(&query),
            StreamEvent::WebSearchComplete => handler.on_web_search_complete(),
            StreamEvent::Complete { .. } | StreamEvent::Terminator => self.complete(handler),
            StreamEvent::Error { message } => {
                self.fail(SessionFailure::upstream(message), handler);
            }
            StreamEvent::Step { .. } | StreamEvent::StepComplete { .. } => {
                debug!(kind = ?event.kind(), "ignoring dual-stream event in single stream");
            }
        }
        self.is_terminal()
    }

    /// Transport ended without a terminal event.
    pub fn finish<H>(&mut self, handler: &mut H)
    where
        H: SingleStreamHandler + ?Sized,
    {
        if !self.is_terminal() {
            self.complete(handler);
        }
    }

    /// Terminates the session with a failure (no-op once terminal).
    pub fn fail<H>(&mut self, failure: SessionFailure, handler: &mut H)
    where
        H: SingleStreamHandler + ?Sized,
    {
        if self.is_terminal() {
            return;
        }
        self.state.stop();
        handler.on_error(failure.message());
        self.phase = Phase::Failed(failure);
    }

    /// Final outcome; a session that never reached a terminal event counts as
    /// cancelled.
    pub fn into_outcome(self) -> SingleOutcome {
        match self.phase {
            Phase::Completed => SingleOutcome::Completed { text: self.emitted },
            Phase::Failed(failure) => SingleOutcome::Failed {
                failure,
                partial: self.emitted,
            },
            Phase::Streaming => SingleOutcome::Cancelled {
                partial: self.emitted,
            },
        }
    }

    fn complete<H>(&mut self, handler: &mut H)
    where
        H: SingleStreamHandler + ?Sized,
    {
        self.state.stop();
        self.phase = Phase::Completed;
        handler.on_complete();
    }
}
