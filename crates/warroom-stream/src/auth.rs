use crate::errors::StreamError;

/// Supplies the bearer token attached to each stream request.
///
/// Called once per session before the connection is opened. `Ok(None)`
/// sends the request without an `Authorization` header.
#[async_trait::async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<Option<String>, StreamError>;
}

/// A fixed token, e.g. from `WARROOM_API_TOKEN`.
#[derive(Clone)]
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Result<Self, StreamError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(StreamError::Auth("token must not be empty".into()));
        }
        Ok(Self { token })
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticToken").field("token", &"<redacted>").finish()
    }
}

#[async_trait::async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<Option<String>, StreamError> {
        Ok(Some(self.token.clone()))
    }
}

/// Sends requests without credentials.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoAuth;

#[async_trait::async_trait]
impl TokenProvider for NoAuth {
    async fn token(&self) -> Result<Option<String>, StreamError> {
        Ok(None)
    }
}
