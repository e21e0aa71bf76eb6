use crate::message::LegTag;

/// One parsed frame of the backend stream.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// Incremental text. `step` names the dual-stream leg when present.
    Chunk {
        content: String,
        step: Option<LegTag>,
        is_complete: Option<bool>,
    },
    /// A dual-stream leg announced a new phase.
    Step { step: LegTag, message: String },
    /// A dual-stream leg finished a phase.
    StepComplete { step: LegTag, duration_ms: u64 },
    /// Protocol-level completion. Response fields are only sent in dual mode.
    Complete {
        final_response: Option<String>,
        response_a: Option<String>,
        response_b: Option<String>,
    },
    /// Explicit backend failure.
    Error { message: String },
    WebSearchStart { query: String },
    WebSearchComplete,
    /// Transport-level end marker (`data: [DONE]`).
    Terminator,
}

impl StreamEvent {
    /// Returns the wire `type` of the event (`None` for the terminator).
    pub fn kind(&self) -> Option<&'static str> {
        match self {
            Self::Chunk { .. } => Some("chunk"),
            Self::Step { .. } => Some("step"),
            Self::StepComplete { .. } => Some("step_complete"),
            Self::Complete { .. } => Some("complete"),
            Self::Error { .. } => Some("error"),
            Self::WebSearchStart { .. } => Some("web_search_start"),
            Self::WebSearchComplete => Some("web_search_complete"),
            Self::Terminator => None,
        }
    }
}
