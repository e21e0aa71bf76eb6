use std::time::Duration;

use crate::errors::StreamError;
use crate::filter::DEFAULT_BRAND;
use crate::message::LegTag;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Configuration for a [`StreamClient`](crate::StreamClient).
#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
    /// Backend origin, e.g. `https://api.example.com`.
    pub base_url: String,
    /// Path of the single-stream endpoint.
    pub single_path: String,
    /// Path of the dual-stream endpoint.
    pub dual_path: String,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
    /// Leg that untagged dual chunks fall back to and that wins when
    /// resolving the final response.
    pub primary_leg: LegTag,
    pub secondary_leg: LegTag,
    /// Token the content filter rewrites vendor names into.
    pub brand: String,
}

impl ClientConfig {
    /// Creates a config with default paths and a provided backend URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            single_path: "/api/chat/stream".to_string(),
            dual_path: "/api/chat/dual-stream".to_string(),
            timeout: DEFAULT_TIMEOUT,
            primary_leg: LegTag::primary(),
            secondary_leg: LegTag::secondary(),
            brand: DEFAULT_BRAND.to_string(),
        }
    }

    /// Builds a config from `WARROOM_API_URL` and optional
    /// `WARROOM_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, StreamError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StreamError> {
        let base_url = lookup("WARROOM_API_URL").unwrap_or_default();
        if base_url.trim().is_empty() {
            return Err(StreamError::Config(
                "missing WARROOM_API_URL for the stream client".into(),
            ));
        }
        let mut config = Self::new(base_url.trim());
        if let Some(raw) = lookup("WARROOM_TIMEOUT_SECS").filter(|v| !v.trim().is_empty()) {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                StreamError::Config(format!("invalid WARROOM_TIMEOUT_SECS value {raw:?}"))
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    /// Overrides the backend URL (for proxies or test servers).
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn single_path(mut self, path: impl Into<String>) -> Self {
        self.single_path = path.into();
        self
    }

    pub fn dual_path(mut self, path: impl Into<String>) -> Self {
        self.dual_path = path.into();
        self
    }

    /// Overrides the default HTTP timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn legs(mut self, primary: impl Into<LegTag>, secondary: impl Into<LegTag>) -> Self {
        self.primary_leg = primary.into();
        self.secondary_leg = secondary.into();
        self
    }

    pub fn brand(mut self, brand: impl Into<String>) -> Self {
        self.brand = brand.into();
        self
    }

    pub(crate) fn validate(&self) -> Result<(), StreamError> {
        let url = self.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(StreamError::Config(format!(
                "base_url must start with http:// or https:// (got {url:?})"
            )));
        }
        for (name, path) in [("single_path", &self.single_path), ("dual_path", &self.dual_path)] {
            if !path.starts_with('/') {
                return Err(StreamError::Config(format!(
                    "{name} must start with '/' (got {path:?})"
                )));
            }
        }
        if self.timeout.is_zero() {
            return Err(StreamError::Config("timeout must be greater than 0".into()));
        }
        if self.primary_leg.as_str().is_empty() || self.secondary_leg.as_str().is_empty() {
            return Err(StreamError::Config("leg tags must not be empty".into()));
        }
        if self.primary_leg == self.secondary_leg {
            return Err(StreamError::Config(format!(
                "primary and secondary legs must differ (both {})",
                self.primary_leg
            )));
        }
        Ok(())
    }

    pub(crate) fn single_url(&self) -> String {
        format!("{}{}", self.base_url.trim().trim_end_matches('/'), self.single_path)
    }

    pub(crate) fn dual_url(&self) -> String {
        format!("{}{}", self.base_url.trim().trim_end_matches('/'), self.dual_path)
    }
}
