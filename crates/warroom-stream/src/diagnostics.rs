use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::message::LegTag;

/// Why the frame parser skipped a line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    MalformedJson,
    MissingType,
    UnknownType,
    MissingField,
    AfterTerminator,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MalformedJson => "malformed json",
            Self::MissingType => "missing type",
            Self::UnknownType => "unknown type",
            Self::MissingField => "missing field",
            Self::AfterTerminator => "after terminator",
        })
    }
}

/// Observer for input the client tolerates instead of failing on.
///
/// Implementations must not panic; hooks run inline on the session task.
pub trait DiagnosticSink: Send + Sync {
    /// A line was skipped by the frame parser.
    fn dropped_line(&self, _line: &str, _reason: DropReason) {}

    /// A dual-stream chunk arrived with no `step` field and no earlier `Step`
    /// event to attribute it; it was assigned to `assigned_to`.
    fn untagged_chunk(&self, _assigned_to: &LegTag) {}
}

/// Sink that ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopDiagnostics;

impl DiagnosticSink for NoopDiagnostics {}

/// Sink that counts tolerated input.
#[derive(Debug, Default)]
pub struct DiagnosticCounters {
    dropped_lines: AtomicU64,
    untagged_chunks: AtomicU64,
}

impl DiagnosticCounters {
    pub fn dropped_lines(&self) -> u64 {
        self.dropped_lines.load(Ordering::Relaxed)
    }

    pub fn untagged_chunks(&self) -> u64 {
        self.untagged_chunks.load(Ordering::Relaxed)
    }
}

impl DiagnosticSink for DiagnosticCounters {
    fn dropped_line(&self, _line: &str, _reason: DropReason) {
        self.dropped_lines.fetch_add(1, Ordering::Relaxed);
    }

    fn untagged_chunk(&self, _assigned_to: &LegTag) {
        self.untagged_chunks.fetch_add(1, Ordering::Relaxed);
    }
}
