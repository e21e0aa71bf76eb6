use std::fmt;

use crate::errors::StreamError;

/// Author of a chat message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of a conversation.
///
/// Messages are owned by the caller; the client only reads them to build the
/// outbound request and never stores them.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Name of one leg of a dual stream (for example `gpt` or `claude`).
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, serde::Serialize, serde::Deserialize)]
pub struct LegTag(pub String);

impl LegTag {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Tag the backend uses for the primary leg.
    pub fn primary() -> Self {
        Self::new("gpt")
    }

    /// Tag the backend uses for the secondary leg.
    pub fn secondary() -> Self {
        Self::new("claude")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LegTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LegTag {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for LegTag {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Body of a single-stream chat request.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SingleStreamRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

/// Body of a dual-stream chat request.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DualStreamRequest {
    pub user_query: String,
    /// History before the current turn, without system messages.
    pub messages: Vec<ChatMessage>,
    pub context_files: String,
    pub agent_context: String,
    pub is_coding_request: bool,
    pub temperature: f32,
    #[serde(rename = "agent_id", skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

/// Per-turn options shared by the single and dual request bodies.
#[derive(Clone, Debug, PartialEq)]
pub struct TurnOptions {
    pub model: String,
    pub temperature: f32,
    pub agent_id: Option<String>,
    /// Pre-rendered text of files attached to the conversation.
    pub context_files: String,
    /// Pre-rendered agent instructions.
    pub agent_context: String,
    /// Overrides coding-request detection when set.
    pub is_coding_request: Option<bool>,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            temperature: 0.7,
            agent_id: None,
            context_files: String::new(),
            agent_context: String::new(),
            is_coding_request: None,
        }
    }
}

impl TurnOptions {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn context_files(mut self, text: impl Into<String>) -> Self {
        self.context_files = text.into();
        self
    }

    pub fn agent_context(mut self, text: impl Into<String>) -> Self {
        self.agent_context = text.into();
        self
    }

    pub fn coding_request(mut self, is_coding: bool) -> Self {
        self.is_coding_request = Some(is_coding);
        self
    }
}

/// One outbound conversation turn.
///
/// The same `ChatTurn` produces both request bodies, so a dual-stream
/// failure can be retried on the single-stream path with exactly the same
/// conversation.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatTurn {
    messages: Vec<ChatMessage>,
    options: TurnOptions,
}

impl ChatTurn {
    /// Creates a turn; the last message must be a non-empty user message.
    pub fn new(messages: Vec<ChatMessage>, options: TurnOptions) -> Result<Self, StreamError> {
        let Some(last) = messages.last() else {
            return Err(StreamError::Validation(
                "conversation must contain at least one message".into(),
            ));
        };
        if last.role != Role::User {
            return Err(StreamError::Validation(
                "conversation must end with a user message".into(),
            ));
        }
        if last.content.trim().is_empty() {
            return Err(StreamError::Validation(
                "user message must not be empty".into(),
            ));
        }
        if options.model.trim().is_empty() {
            return Err(StreamError::Validation("model must not be empty".into()));
        }
        if !(0.0..=2.0).contains(&options.temperature) {
            return Err(StreamError::Validation(format!(
                "temperature must be within 0.0..=2.0 (got {})",
                options.temperature
            )));
        }
        Ok(Self { messages, options })
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn options(&self) -> &TurnOptions {
        &self.options
    }

    /// Content of the current (last) user message.
    pub fn user_query(&self) -> &str {
        self.messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }

    /// Request body for the single-stream endpoint; the conversation is sent
    /// unmodified.
    pub fn single_request(&self) -> SingleStreamRequest {
        SingleStreamRequest {
            messages: self.messages.clone(),
            temperature: self.options.temperature,
            model: self.options.model.clone(),
            agent_id: self.options.agent_id.clone(),
        }
    }

    /// Request body for the dual-stream endpoint.
    pub fn dual_request(&self) -> DualStreamRequest {
        let history_len = self.messages.len().saturating_sub(1);
        let history = self.messages[..history_len]
            .iter()
            .filter(|m| m.role != Role::System)
            .cloned()
            .collect();
        let user_query = self.user_query().to_string();
        let is_coding_request = self
            .options
            .is_coding_request
            .unwrap_or_else(|| looks_like_coding_request(&user_query));
        DualStreamRequest {
            user_query,
            messages: history,
            context_files: self.options.context_files.clone(),
            agent_context: self.options.agent_context.clone(),
            is_coding_request,
            temperature: self.options.temperature,
            agent_id: self.options.agent_id.clone(),
        }
    }
}

/// Keywords that mark a query as a coding request.
pub const CODING_KEYWORDS: &[&str] = &[
    "code",
    "function",
    "debug",
    "bug",
    "compile",
    "script",
    "refactor",
    "algorithm",
    "api",
    "sql",
    "regex",
    "python",
    "javascript",
    "typescript",
    "rust",
    "react",
    "html",
    "css",
    "stack trace",
    "exception",
];

/// Heuristic used when `TurnOptions::is_coding_request` is unset.
pub fn looks_like_coding_request(query: &str) -> bool {
    if query.contains("```") {
        return true;
    }
    let words: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    let padded = format!(" {} ", words.join(" "));
    CODING_KEYWORDS
        .iter()
        .any(|keyword| padded.contains(&format!(" {keyword} ")))
}
