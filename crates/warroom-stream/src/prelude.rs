//! Common imports for typical client usage.
pub use crate::{
    AbortHandle, ChatMessage, ChatTurn, ClientConfig, DualOutcome, DualStreamHandler, LegTag,
    SessionFailure, SessionHandle, SingleOutcome, SingleStreamHandler, StaticToken, StreamClient,
    StreamError, TokenProvider, TurnOptions, TurnOutcome,
};
