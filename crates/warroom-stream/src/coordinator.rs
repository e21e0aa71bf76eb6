use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::diagnostics::{DiagnosticSink, NoopDiagnostics};
use crate::errors::SessionFailure;
use crate::filter::ContentFilter;
use crate::message::LegTag;
use crate::reconciler::AccumulatorState;
use crate::stream::StreamEvent;

const EMPTY_DUAL_STREAM: &str = "dual stream ended without a response";

/// Callbacks for a dual-stream session.
///
/// `on_complete` and `on_error` are mutually exclusive and fire at most once.
pub trait DualStreamHandler: Send {
    fn on_start(&mut self) {}
    /// A leg entered a new phase; `message` is progress text for the UI.
    fn on_step(&mut self, _tag: &LegTag, _message: &str) {}
    fn on_step_complete(&mut self, _tag: &LegTag, _duration_ms: u64) {}
    /// The whole filtered text of `tag`'s leg so far, not just the delta.
    fn on_chunk(&mut self, full_text: &str, is_complete: bool, tag: &LegTag);
    fn on_complete(&mut self, final_text: &str, primary_text: &str, secondary_text: &str);
    fn on_error(&mut self, message: &str);
}

/// Protocol state of a dual session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CoordinatorState {
    NotStarted,
    Started,
    Step(LegTag),
    Streaming(LegTag),
    Completed,
    Failed,
}

/// Per-leg accumulators plus the leg named by the latest `Step`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DualSessionState {
    pub legs: BTreeMap<LegTag, AccumulatorState>,
    pub current_tag: Option<LegTag>,
}

impl DualSessionState {
    pub fn leg_text(&self, tag: &LegTag) -> &str {
        self.legs.get(tag).map(AccumulatorState::buffer).unwrap_or_default()
    }
}

/// Resolved texts of a dual session, all filtered.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DualResponse {
    pub final_text: String,
    pub primary_text: String,
    pub secondary_text: String,
}

/// Final state of a dual-stream session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DualOutcome {
    Completed(DualResponse),
    /// The caller is expected to retry on the single-stream path.
    Failed {
        failure: SessionFailure,
        partial: DualResponse,
    },
    Cancelled { partial: DualResponse },
}

impl DualOutcome {
    pub fn response(&self) -> &DualResponse {
        match self {
            Self::Completed(response) => response,
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

/// Drives two response legs multiplexed on one stream.
///
/// Chunks are attributed to their explicit `step` tag, else to the leg named
/// by the most recent `Step` event. A chunk with neither is attributed to the
/// primary leg and reported as an untagged chunk, since the backend gives no
/// way to tell which leg it belongs to.
pub struct DualStreamCoordinator {
    filter: ContentFilter,
    primary: LegTag,
    secondary: LegTag,
    session: DualSessionState,
    state: CoordinatorState,
    diagnostics: Arc<dyn DiagnosticSink>,
    untagged_chunks: u64,
    response: Option<DualResponse>,
    failure: Option<SessionFailure>,
}

impl DualStreamCoordinator {
    pub fn new(filter: ContentFilter, primary: LegTag, secondary: LegTag) -> Self {
        Self {
            filter,
            primary,
            secondary,
            session: DualSessionState::default(),
            state: CoordinatorState::NotStarted,
            diagnostics: Arc::new(NoopDiagnostics),
            untagged_chunks: 0,
            response: None,
            failure: None,
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn state(&self) -> &CoordinatorState {
        &self.state
    }

    pub fn session(&self) -> &DualSessionState {
        &self.session
    }

    /// Chunks that had to be attributed without any tag information.
    pub fn untagged_chunks(&self) -> u64 {
        self.untagged_chunks
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            CoordinatorState::Completed | CoordinatorState::Failed
        )
    }

    /// Marks the session started and calls `on_start` (once).
    pub fn start<H>(&mut self, handler: &mut H)
    where
        H: DualStreamHandler + ?Sized,
    {
        if self.state == CoordinatorState::NotStarted {
            self.state = CoordinatorState::Started;
            handler.on_start();
        }
    }

    /// Applies one event. Returns `true` once the session is terminal.
    pub fn handle<H>(&mut self, event: StreamEvent, handler: &mut H) -> bool
    where
        H: DualStreamHandler + ?Sized,
    {
        if self.is_terminal() {
            debug!(kind = ?event.kind(), "ignoring event after terminal state");
            return true;
        }
        self.start(handler);
        match event {
            StreamEvent::Step { step, message } => {
                self.session
                    .legs
                    .entry(step.clone())
                    .or_insert_with(AccumulatorState::streaming);
                self.session.current_tag = Some(step.clone());
                handler.on_step(&step, &self.filter.apply(&message));
                self.state = CoordinatorState::Step(step);
            }
            StreamEvent::Chunk {
                content,
                step,
                is_complete,
            } => self.apply_chunk(content, step, is_complete.unwrap_or(false), handler),
            StreamEvent::StepComplete { step, duration_ms } => {
                handler.on_step_complete(&step, duration_ms);
            }
            StreamEvent::Complete {
                final_response,
                response_a,
                response_b,
            } => self.complete(final_response, response_a, response_b, handler),
            StreamEvent::Error { message } => {
                self.fail(SessionFailure::upstream(message), handler);
            }
            StreamEvent::Terminator => self.finish(handler),
            StreamEvent::WebSearchStart { .. } | StreamEvent::WebSearchComplete => {
                debug!(kind = ?event.kind(), "ignoring web search event in dual stream");
            }
        }
        self.is_terminal()
    }

    /// Stream ended without `complete`: resolve from the leg buffers, or fail
    /// when nothing arrived at all.
    pub fn finish<H>(&mut self, handler: &mut H)
    where
        H: DualStreamHandler + ?Sized,
    {
        if self.is_terminal() {
            return;
        }
        let has_content = self.session.legs.values().any(|leg| !leg.buffer().is_empty());
        if has_content {
            self.complete(None, None, None, handler);
        } else {
            self.fail(SessionFailure::ended(EMPTY_DUAL_STREAM), handler);
        }
    }

    /// Terminates the session with a failure (no-op once terminal).
    pub fn fail<H>(&mut self, failure: SessionFailure, handler: &mut H)
    where
        H: DualStreamHandler + ?Sized,
    {
        if self.is_terminal() {
            return;
        }
        self.stop_legs();
        self.state = CoordinatorState::Failed;
        handler.on_error(failure.message());
        self.failure = Some(failure);
    }

    pub fn into_outcome(self) -> DualOutcome {
        if let Some(response) = self.response {
            return DualOutcome::Completed(response);
        }
        let partial = self.resolve(None, None, None);
        match self.failure {
            Some(failure) => DualOutcome::Failed { failure, partial },
            None => DualOutcome::Cancelled { partial },
        }
    }

    fn apply_chunk<H>(
        &mut self,
        content: String,
        step: Option<LegTag>,
        is_complete: bool,
        handler: &mut H,
    ) where
        H: DualStreamHandler + ?Sized,
    {
        if content.is_empty() && !is_complete {
            return;
        }
        let tag = match step.or_else(|| self.session.current_tag.clone()) {
            Some(tag) => tag,
            None => {
                self.untagged_chunks += 1;
                warn!(
                    assigned_to = %self.primary,
                    "dual stream chunk has no step tag and no step was announced"
                );
                self.diagnostics.untagged_chunk(&self.primary);
                self.primary.clone()
            }
        };

        let leg = self
            .session
            .legs
            .entry(tag.clone())
            .or_insert_with(AccumulatorState::streaming);
        leg.append(&content);
        if is_complete {
            leg.stop();
        }
        let full_text = self.filter.apply(leg.buffer());
        handler.on_chunk(&full_text, is_complete, &tag);
        self.state = CoordinatorState::Streaming(tag);
    }

    fn complete<H>(
        &mut self,
        final_response: Option<String>,
        response_a: Option<String>,
        response_b: Option<String>,
        handler: &mut H,
    ) where
        H: DualStreamHandler + ?Sized,
    {
        let response = self.resolve(final_response, response_a, response_b);
        self.stop_legs();
        self.state = CoordinatorState::Completed;
        handler.on_complete(
            &response.final_text,
            &response.primary_text,
            &response.secondary_text,
        );
        self.response = Some(response);
    }

    /// Explicit response fields win over leg buffers; the final text falls
    /// back to the first non-empty leg, primary first.
    fn resolve(
        &self,
        final_response: Option<String>,
        response_a: Option<String>,
        response_b: Option<String>,
    ) -> DualResponse {
        let non_empty = |text: Option<String>| text.filter(|t| !t.trim().is_empty());
        let primary_text = non_empty(response_a)
            .unwrap_or_else(|| self.session.leg_text(&self.primary).to_string());
        let secondary_text = non_empty(response_b)
            .unwrap_or_else(|| self.session.leg_text(&self.secondary).to_string());
        let final_text = non_empty(final_response)
            .or_else(|| non_empty(Some(primary_text.clone())))
            .unwrap_or_else(|| secondary_text.clone());
        DualResponse {
            final_text: self.filter.apply(&final_text),
            primary_text: self.filter.apply(&primary_text),
            secondary_text: self.filter.apply(&secondary_text),
        }
    }

    fn stop_legs(&mut self) {
        for leg in self.session.legs.values_mut() {
            leg.stop();
        }
    }
}
