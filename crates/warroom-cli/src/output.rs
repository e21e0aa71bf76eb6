use std::io::Write as _;

use warroom_stream::{DualStreamHandler, LegTag, SingleStreamHandler};

pub const INTERRUPTED_NOTICE: &str = "*Response was interrupted. Please try again.*";

/// Streams single-stream deltas straight to stdout.
#[derive(Default)]
pub struct TerminalPrinter;

impl SingleStreamHandler for TerminalPrinter {
    fn on_chunk(&mut self, delta: &str) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(delta.as_bytes());
        let _ = out.flush();
    }

    fn on_complete(&mut self) {
        println!();
    }

    fn on_error(&mut self, message: &str) {
        println!("{}", interrupted_suffix(message));
    }

    fn on_web_search_start(&mut self, query: &str) {
        eprintln!("searching the web for {query:?}...");
    }
}

/// Shows dual-stream progress on stderr and the final answer on stdout.
#[derive(Default)]
pub struct DualProgress;

impl DualStreamHandler for DualProgress {
    fn on_start(&mut self) {
        eprintln!("consulting both models...");
    }

    fn on_step(&mut self, tag: &LegTag, message: &str) {
        eprintln!("{}", step_line(tag, message));
    }

    fn on_step_complete(&mut self, tag: &LegTag, duration_ms: u64) {
        eprintln!("{}", step_done_line(tag, duration_ms));
    }

    fn on_chunk(&mut self, _full_text: &str, _is_complete: bool, _tag: &LegTag) {}

    fn on_complete(&mut self, final_text: &str, _primary_text: &str, _secondary_text: &str) {
        println!("{final_text}");
    }

    fn on_error(&mut self, message: &str) {
        eprintln!("dual stream failed: {message}");
    }
}

pub fn step_line(tag: &LegTag, message: &str) -> String {
    if message.trim().is_empty() {
        format!("[{tag}] working")
    } else {
        format!("[{tag}] {}", message.trim())
    }
}

pub fn step_done_line(tag: &LegTag, duration_ms: u64) -> String {
    format!("[{tag}] done in {:.1}s", duration_ms as f64 / 1000.0)
}

/// Appended after whatever text was already shown when a stream fails.
pub fn interrupted_suffix(message: &str) -> String {
    format!("\n\n{INTERRUPTED_NOTICE} ({message})")
}
