//! Streaming response client for the WarRoom chat backend.
//!
//! Consumes newline-delimited, SSE-style streams, reassembles incremental
//! tokens into messages, coordinates the two response legs of a dual-AI
//! stream and rewrites vendor names into the product brand.
//!
//! # Single stream
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use warroom_stream::prelude::*;
//!
//! struct Print;
//!
//! impl SingleStreamHandler for Print {
//!     fn on_chunk(&mut self, delta: &str) {
//!         print!("{delta}");
//!     }
//!     fn on_complete(&mut self) {
//!         println!();
//!     }
//!     fn on_error(&mut self, message: &str) {
//!         eprintln!("stream failed: {message}");
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), StreamError> {
//! let client = StreamClient::builder(ClientConfig::from_env()?)
//!     .token_provider(Arc::new(StaticToken::new("token")?))
//!     .build()?;
//!
//! let turn = ChatTurn::new(vec![ChatMessage::user("Say hello")], TurnOptions::default())?;
//! let outcome = client.stream_single(&turn, Print).await?.finish().await?;
//! println!("{}", outcome.text());
//! # Ok(())
//! # }
//! ```

/// Bearer token collaborator.
pub mod auth;
/// Client entry points and builder.
pub mod client;
/// Client configuration.
pub mod config;
/// Dual-stream coordination.
pub mod coordinator;
/// Hooks for tolerated input.
pub mod diagnostics;
/// Public error types.
pub mod errors;
/// Brand content filter.
pub mod filter;
/// Line to event parsing.
pub mod frame;
/// Conversation and request body types.
pub mod message;
/// Logging setup for binaries.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Single-stream reconciliation.
pub mod reconciler;
/// Session tasks, handles and cancellation.
pub mod session;
/// Parsed stream events.
pub mod stream;
/// Byte transport and line decoding.
pub mod transport;

#[cfg(test)]
mod test_support;

pub use auth::{NoAuth, StaticToken, TokenProvider};
pub use client::{StreamClient, StreamClientBuilder, TurnOutcome};
pub use config::ClientConfig;
pub use coordinator::{
    CoordinatorState, DualOutcome, DualResponse, DualSessionState, DualStreamCoordinator,
    DualStreamHandler,
};
pub use diagnostics::{DiagnosticCounters, DiagnosticSink, DropReason, NoopDiagnostics};
pub use errors::{SessionFailure, StreamError};
pub use filter::{ContentFilter, DEFAULT_BRAND, filter_content};
pub use frame::FrameParser;
pub use message::{
    ChatMessage, ChatTurn, DualStreamRequest, LegTag, Role, SingleStreamRequest, TurnOptions,
};
pub use reconciler::{
    AccumulatorState, SingleOutcome, SingleStreamHandler, SingleStreamReconciler,
};
pub use session::{AbortHandle, SessionHandle};
pub use stream::StreamEvent;
pub use transport::{ByteStream, HttpTransport, LineDecoder, Transport, TransportRequest, line_stream};
