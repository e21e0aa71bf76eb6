/// Errors returned by the client API before a streaming session is running.
///
/// Once a session has been spawned, failures are no longer returned as
/// `Err`: they are delivered through the handler's `on_error` callback and
/// recorded as a [`SessionFailure`] in the session outcome.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid conversation or request options.
    #[error("validation error: {0}")]
    Validation(String),
    /// The token provider could not produce a bearer token.
    #[error("auth error: {0}")]
    Auth(String),
    /// Connection could not be opened or the backend rejected the request.
    #[error("transport error: {message}")]
    Transport {
        status: Option<u16>,
        message: String,
    },
    /// Internal protocol misuse or invariant violation.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The session was cancelled before it produced an outcome.
    #[error("cancelled")]
    Cancelled,
}

impl StreamError {
    /// Creates a transport error without an HTTP status.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            status: None,
            message: message.into(),
        }
    }

    /// Creates a transport error for a non-success HTTP status.
    pub fn http_status(status: u16, message: impl Into<String>) -> Self {
        Self::Transport {
            status: Some(status),
            message: message.into(),
        }
    }

    pub(crate) fn protocol_msg(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}

/// Terminal failure of a running session, as delivered to `on_error`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
pub enum SessionFailure {
    /// Connection failed, the backend answered with a non-success status, or
    /// the body could not be read.
    #[error("transport failure: {message}")]
    Transport {
        status: Option<u16>,
        message: String,
    },
    /// The backend sent an explicit `error` frame.
    #[error("upstream failure: {message}")]
    Upstream { message: String },
    /// The stream ended without anything the session could resolve to.
    #[error("stream ended: {message}")]
    Ended { message: String },
}

impl SessionFailure {
    /// Creates an upstream failure from an `error` frame message.
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
        }
    }

    /// Creates a failure for a stream that ended without a usable response.
    pub fn ended(message: impl Into<String>) -> Self {
        Self::Ended {
            message: message.into(),
        }
    }

    /// Returns the message passed to the handler's `on_error`.
    pub fn message(&self) -> &str {
        match self {
            Self::Transport { message, .. }
            | Self::Upstream { message }
            | Self::Ended { message } => message,
        }
    }

    /// True when the failure came from the connection rather than the backend.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

impl From<StreamError> for SessionFailure {
    fn from(value: StreamError) -> Self {
        match value {
            StreamError::Transport { status, message } => Self::Transport { status, message },
            other => Self::Transport {
                status: None,
                message: other.to_string(),
            },
        }
    }
}
