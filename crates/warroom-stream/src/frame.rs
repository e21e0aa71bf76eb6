use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::diagnostics::{DiagnosticSink, DropReason, NoopDiagnostics};
use crate::message::LegTag;
use crate::stream::StreamEvent;

const DONE_SENTINEL: &str = "[DONE]";
const UNKNOWN_ERROR: &str = "Unknown error";

/// Classifies stream lines into [`StreamEvent`]s.
///
/// The parser is tolerant: malformed JSON, lines without a `type`, unknown
/// types and frames missing a required field are skipped and reported to
/// the [`DiagnosticSink`], never turned into errors. Backends interleave
/// partial frames under normal operation.
///
/// After `data: [DONE]` the parser yields nothing more.
pub struct FrameParser {
    diagnostics: Arc<dyn DiagnosticSink>,
    terminated: bool,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new(Arc::new(NoopDiagnostics))
    }
}

impl FrameParser {
    pub fn new(diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            diagnostics,
            terminated: false,
        }
    }

    /// True once the terminator has been seen.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Parses one line. Returns `None` for lines that carry no event.
    pub fn parse_line(&mut self, line: &str) -> Option<StreamEvent> {
        let line = line.trim();
        if is_framing_line(line) {
            return None;
        }
        if self.terminated {
            self.drop_line(line, DropReason::AfterTerminator);
            return None;
        }

        let payload = line
            .strip_prefix("data:")
            .map(str::trim_start)
            .unwrap_or(line);
        if payload.is_empty() {
            return None;
        }
        if payload == DONE_SENTINEL {
            self.terminated = true;
            return Some(StreamEvent::Terminator);
        }

        let value: Value = match serde_json::from_str(payload) {
            Ok(value) => value,
            Err(_) => {
                self.drop_line(line, DropReason::MalformedJson);
                return None;
            }
        };
        let Some(kind) = value.get("type").and_then(Value::as_str) else {
            self.drop_line(line, DropReason::MissingType);
            return None;
        };

        match map_frame(kind, &value) {
            Ok(event) => Some(event),
            Err(reason) => {
                self.drop_line(line, reason);
                None
            }
        }
    }

    fn drop_line(&self, line: &str, reason: DropReason) {
        debug!(%reason, line, "skipping stream line");
        self.diagnostics.dropped_line(line, reason);
    }
}

fn is_framing_line(line: &str) -> bool {
    line.is_empty()
        || line.starts_with(':')
        || line.starts_with("event:")
        || line.starts_with("id:")
        || line.starts_with("retry:")
}

fn map_frame(kind: &str, value: &Value) -> Result<StreamEvent, DropReason> {
    match kind {
        "chunk" => {
            let content = str_field(value, &["content"]).ok_or(DropReason::MissingField)?;
            Ok(StreamEvent::Chunk {
                content,
                step: str_field(value, &["step"]).map(LegTag::new),
                is_complete: value.get("isComplete").and_then(Value::as_bool),
            })
        }
        "step" => Ok(StreamEvent::Step {
            step: str_field(value, &["step"])
                .map(LegTag::new)
                .ok_or(DropReason::MissingField)?,
            message: str_field(value, &["message"]).unwrap_or_default(),
        }),
        "step_complete" => Ok(StreamEvent::StepComplete {
            step: str_field(value, &["step"])
                .map(LegTag::new)
                .ok_or(DropReason::MissingField)?,
            duration_ms: duration_ms(value),
        }),
        "complete" => Ok(StreamEvent::Complete {
            final_response: str_field(value, &["finalResponse"]),
            response_a: str_field(value, &["responseA", "chatgptResponse"]),
            response_b: str_field(value, &["responseB", "claudeResponse"]),
        }),
        "error" => Ok(StreamEvent::Error {
            message: error_message(value),
        }),
        "web_search_start" => Ok(StreamEvent::WebSearchStart {
            query: str_field(value, &["query"]).unwrap_or_default(),
        }),
        "web_search_complete" => Ok(StreamEvent::WebSearchComplete),
        _ => Err(DropReason::UnknownType),
    }
}

/// First string value among `keys`.
fn str_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(ToOwned::to_owned)
}

fn duration_ms(value: &Value) -> u64 {
    value
        .get("durationMs")
        .or_else(|| value.get("duration"))
        .and_then(|v| {
            v.as_u64()
                .or_else(|| v.as_f64().map(|ms| ms.max(0.0).round() as u64))
        })
        .unwrap_or(0)
}

fn error_message(value: &Value) -> String {
    let nested = match value.get("error") {
        Some(Value::String(message)) => Some(message.as_str()),
        Some(Value::Object(error)) => error.get("message").and_then(Value::as_str),
        _ => None,
    };
    nested
        .or_else(|| value.get("message").and_then(Value::as_str))
        .filter(|message| !message.trim().is_empty())
        .unwrap_or(UNKNOWN_ERROR)
        .to_string()
}

/// Message from a non-success response body (JSON error object or raw text).
pub(crate) fn error_body_message(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(value) if value.get("error").is_some() || value.get("message").is_some() => {
            error_message(&value)
        }
        _ => body.trim().to_string(),
    }
}
