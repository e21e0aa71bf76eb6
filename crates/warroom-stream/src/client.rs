use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::auth::{NoAuth, TokenProvider};
use crate::config::ClientConfig;
use crate::coordinator::{DualOutcome, DualStreamCoordinator, DualStreamHandler};
use crate::diagnostics::{DiagnosticSink, NoopDiagnostics};
use crate::errors::{SessionFailure, StreamError};
use crate::filter::ContentFilter;
use crate::frame::FrameParser;
use crate::message::ChatTurn;
use crate::reconciler::{SingleOutcome, SingleStreamHandler, SingleStreamReconciler};
use crate::session::{
    AbortHandle, DualDriver, SessionHandle, SessionParts, SingleDriver, abort_requested,
    run_session, spawn_session,
};
use crate::transport::{HttpTransport, Transport, TransportRequest};

struct ClientInner {
    config: ClientConfig,
    filter: ContentFilter,
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenProvider>,
    diagnostics: Arc<dyn DiagnosticSink>,
}

/// Entry point for streaming chat responses from the backend.
///
/// Cheap to clone; every `stream_*` call runs an independent session.
#[derive(Clone)]
pub struct StreamClient {
    inner: Arc<ClientInner>,
}

/// Result of [`StreamClient::stream_with_fallback`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The dual session completed or was cancelled.
    Dual(DualOutcome),
    /// The dual session failed and the single-stream retry ran instead.
    Fallback {
        dual_failure: SessionFailure,
        single: SingleOutcome,
    },
}

impl TurnOutcome {
    /// Text to show for the turn.
    pub fn text(&self) -> &str {
        match self {
            Self::Dual(outcome) => &outcome.response().final_text,
            Self::Fallback { single, .. } => single.text(),
        }
    }

    /// Failure of the session that produced the turn's text, if any.
    pub fn failure(&self) -> Option<&SessionFailure> {
        match self {
            Self::Dual(outcome) => outcome.failure(),
            Self::Fallback { single, .. } => single.failure(),
        }
    }

    pub fn used_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }
}

impl StreamClient {
    pub fn builder(config: ClientConfig) -> StreamClientBuilder {
        StreamClientBuilder::new(config)
    }

    /// Client over HTTP configured from the environment, without credentials.
    pub fn from_env() -> Result<Self, StreamError> {
        Self::builder(ClientConfig::from_env()?).build()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn filter(&self) -> &ContentFilter {
        &self.inner.filter
    }

    /// Starts a single-stream session.
    ///
    /// Errors are returned only while preparing the request (auth). Once the
    /// session runs, every failure goes to `handler.on_error`.
    pub async fn stream_single<H>(
        &self,
        turn: &ChatTurn,
        handler: H,
    ) -> Result<SessionHandle<SingleOutcome>, StreamError>
    where
        H: SingleStreamHandler + 'static,
    {
        let token = self.inner.tokens.token().await?;
        let parts = self.single_parts(turn, token)?;
        info!(session_id = %parts.session_id, model = %turn.options().model, "starting single stream");
        Ok(spawn_session(parts, self.single_driver(handler)))
    }

    /// Starts a dual-stream session.
    ///
    /// On failure the coordinator only reports through `on_error`; retrying
    /// on the single-stream path is up to the caller (see
    /// [`stream_with_fallback`](Self::stream_with_fallback)).
    pub async fn stream_dual<H>(
        &self,
        turn: &ChatTurn,
        handler: H,
    ) -> Result<SessionHandle<DualOutcome>, StreamError>
    where
        H: DualStreamHandler + 'static,
    {
        let token = self.inner.tokens.token().await?;
        let parts = self.dual_parts(turn, token)?;
        info!(session_id = %parts.session_id, "starting dual stream");
        Ok(spawn_session(parts, self.dual_driver(handler)))
    }

    /// Runs a dual session and, if it fails, a single-stream session with
    /// the same conversation.
    ///
    /// A cancelled dual session is not retried. Aborting the returned
    /// handle cancels whichever session is running.
    pub async fn stream_with_fallback<D, S>(
        &self,
        turn: &ChatTurn,
        dual_handler: D,
        single_handler: S,
    ) -> Result<SessionHandle<TurnOutcome>, StreamError>
    where
        D: DualStreamHandler + 'static,
        S: SingleStreamHandler + 'static,
    {
        let token = self.inner.tokens.token().await?;
        let dual_parts = self.dual_parts(turn, token.clone())?;
        let single_parts = self.single_parts(turn, token)?;
        let dual_driver = self.dual_driver(dual_handler);
        let single_driver = self.single_driver(single_handler);

        let session_id = dual_parts.session_id;
        let (abort_handle, abort_rx) = AbortHandle::new();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        info!(%session_id, "starting dual stream with single-stream fallback");

        tokio::spawn(async move {
            let dual = run_session(dual_parts, dual_driver, abort_rx.clone()).await;
            let aborted = abort_requested(&abort_rx);
            let outcome = match dual {
                DualOutcome::Failed { failure, .. } if !aborted => {
                    warn!(
                        %session_id,
                        fallback_session_id = %single_parts.session_id,
                        error = %failure,
                        "dual stream failed, falling back to single stream"
                    );
                    let single = run_session(single_parts, single_driver, abort_rx).await;
                    TurnOutcome::Fallback {
                        dual_failure: failure,
                        single,
                    }
                }
                other => TurnOutcome::Dual(other),
            };
            let _ = outcome_tx.send(outcome);
        });

        Ok(SessionHandle::new(session_id, abort_handle, outcome_rx))
    }

    fn single_parts(
        &self,
        turn: &ChatTurn,
        token: Option<String>,
    ) -> Result<SessionParts, StreamError> {
        let body = encode(&turn.single_request())?;
        Ok(self.parts("single", self.inner.config.single_url(), body, token))
    }

    fn dual_parts(&self, turn: &ChatTurn, token: Option<String>) -> Result<SessionParts, StreamError> {
        let body = encode(&turn.dual_request())?;
        Ok(self.parts("dual", self.inner.config.dual_url(), body, token))
    }

    fn parts(
        &self,
        mode: &'static str,
        url: String,
        body: serde_json::Value,
        bearer_token: Option<String>,
    ) -> SessionParts {
        SessionParts {
            session_id: uuid::Uuid::new_v4(),
            mode,
            transport: self.inner.transport.clone(),
            request: TransportRequest {
                url,
                body,
                bearer_token,
                timeout: Some(self.inner.config.timeout),
            },
            parser: FrameParser::new(self.inner.diagnostics.clone()),
        }
    }

    fn single_driver<H>(&self, handler: H) -> SingleDriver<H> {
        SingleDriver {
            reconciler: SingleStreamReconciler::new(self.inner.filter.clone()),
            handler,
        }
    }

    fn dual_driver<H>(&self, handler: H) -> DualDriver<H> {
        let config = &self.inner.config;
        DualDriver {
            coordinator: DualStreamCoordinator::new(
                self.inner.filter.clone(),
                config.primary_leg.clone(),
                config.secondary_leg.clone(),
            )
            .with_diagnostics(self.inner.diagnostics.clone()),
            handler,
        }
    }
}

fn encode<T: serde::Serialize>(body: &T) -> Result<serde_json::Value, StreamError> {
    serde_json::to_value(body)
        .map_err(|e| StreamError::Validation(format!("failed to encode request body: {e}")))
}

/// Builder used to inject collaborators before creating a [`StreamClient`].
pub struct StreamClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    tokens: Arc<dyn TokenProvider>,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl StreamClientBuilder {
    fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            tokens: Arc::new(NoAuth),
            diagnostics: Arc::new(NoopDiagnostics),
        }
    }

    /// Replaces the default `reqwest` transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn token_provider(mut self, tokens: Arc<dyn TokenProvider>) -> Self {
        self.tokens = tokens;
        self
    }

    /// Receives dropped lines and untagged dual chunks.
    pub fn diagnostics(mut self, diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Validates the config and builds the client.
    pub fn build(self) -> Result<StreamClient, StreamError> {
        self.config.validate()?;
        let filter = ContentFilter::with_brand(self.config.brand.clone())?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new()?),
        };
        debug!(base_url = %self.config.base_url, brand = %filter.brand(), "stream client ready");
        Ok(StreamClient {
            inner: Arc::new(ClientInner {
                config: self.config,
                filter,
                transport,
                tokens: self.tokens,
                diagnostics: self.diagnostics,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::auth::StaticToken;
    use crate::diagnostics::DiagnosticCounters;
    use crate::message::{ChatMessage, TurnOptions};
    use crate::test_support::{
        DualCall, DualRecorder, FakeResponse, FakeTransport, SingleCall, SingleRecorder,
    };

    fn client(transport: &FakeTransport) -> StreamClient {
        StreamClient::builder(ClientConfig::new("http://backend.test"))
            .transport(Arc::new(transport.clone()))
            .token_provider(Arc::new(StaticToken::new("tok-1").expect("token")))
            .build()
            .expect("client")
    }

    fn turn(messages: Vec<ChatMessage>) -> ChatTurn {
        ChatTurn::new(messages, TurnOptions::default()).expect("turn")
    }

    struct FailingTokens;

    #[async_trait::async_trait]
    impl TokenProvider for FailingTokens {
        async fn token(&self) -> Result<Option<String>, StreamError> {
            Err(StreamError::Auth("session expired".into()))
        }
    }

    #[tokio::test]
    async fn single_stream_scenario() {
        let transport = FakeTransport::new(vec![FakeResponse::lines(&[
            r#"data: {"type":"chunk","content":"Hel"}"#,
            r#"data: {"type":"chunk","content":"lo"}"#,
            r#"data: {"type":"complete"}"#,
            "data: [DONE]",
        ])]);
        let recorder = SingleRecorder::default();

        let outcome = client(&transport)
            .stream_single(&turn(vec![ChatMessage::user("hi")]), recorder.clone())
            .await
            .expect("start")
            .finish()
            .await
            .expect("outcome");

        assert_eq!(
            recorder.calls(),
            vec![
                SingleCall::Chunk("Hel".into()),
                SingleCall::Chunk("lo".into()),
                SingleCall::Complete,
            ]
        );
        assert_eq!(outcome, SingleOutcome::Completed { text: "Hello".into() });

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, "http://backend.test/api/chat/stream");
        assert_eq!(requests[0].bearer_token.as_deref(), Some("tok-1"));
        assert_eq!(requests[0].timeout, Some(Duration::from_secs(120)));
        assert_eq!(
            requests[0].body,
            serde_json::json!({
                "messages": [{"role": "user", "content": "hi"}],
                "temperature": 0.7_f32,
                "model": "gpt-4o",
            })
        );
    }

    #[tokio::test]
    async fn dual_stream_scenario() {
        let transport = FakeTransport::new(vec![FakeResponse::lines(&[
            r#"data: {"type":"step","step":"gpt","message":"Drafting"}"#,
            r#"data: {"type":"chunk","content":"A1","step":"gpt"}"#,
            r#"data: {"type":"step","step":"claude","message":"Reviewing"}"#,
            r#"data: {"type":"chunk","content":"B1"}"#,
            r#"data: {"type":"complete","finalResponse":"F"}"#,
        ])]);
        let recorder = DualRecorder::default();

        let outcome = client(&transport)
            .stream_dual(&turn(vec![ChatMessage::user("compare")]), recorder.clone())
            .await
            .expect("start")
            .finish()
            .await
            .expect("outcome");

        assert_eq!(
            recorder.calls(),
            vec![
                DualCall::Start,
                DualCall::Step("gpt".into(), "Drafting".into()),
                DualCall::Chunk("A1".into(), false, "gpt".into()),
                DualCall::Step("claude".into(), "Reviewing".into()),
                DualCall::Chunk("B1".into(), false, "claude".into()),
                DualCall::Complete("F".into(), "A1".into(), "B1".into()),
            ]
        );
        assert_eq!(outcome.response().final_text, "F");
        assert_eq!(
            transport.requests()[0].url,
            "http://backend.test/api/chat/dual-stream"
        );
    }

    #[tokio::test]
    async fn dual_stream_upstream_error_fails_once() {
        let transport = FakeTransport::new(vec![FakeResponse::lines(&[
            r#"data: {"type":"step","step":"gpt","message":"Drafting"}"#,
            r#"data: {"type":"chunk","content":"A1","step":"gpt"}"#,
            r#"data: {"type":"error","error":"upstream timeout"}"#,
            r#"data: {"type":"complete","finalResponse":"too late"}"#,
            "data: [DONE]",
        ])]);
        let recorder = DualRecorder::default();

        let outcome = client(&transport)
            .stream_dual(&turn(vec![ChatMessage::user("compare")]), recorder.clone())
            .await
            .expect("start")
            .finish()
            .await
            .expect("outcome");

        let calls = recorder.calls();
        let errors: Vec<_> = calls
            .iter()
            .filter(|c| matches!(c, DualCall::Error(_)))
            .collect();
        assert_eq!(errors, vec![&DualCall::Error("upstream timeout".into())]);
        assert!(!calls.iter().any(|c| matches!(c, DualCall::Complete(..))));
        assert_eq!(calls.last(), Some(&DualCall::Error("upstream timeout".into())));
        assert_eq!(
            outcome.failure(),
            Some(&SessionFailure::upstream("upstream timeout"))
        );
        assert_eq!(outcome.response().primary_text, "A1");
    }

    #[tokio::test]
    async fn dual_request_body_excludes_current_turn_and_system_messages() {
        let transport = FakeTransport::new(vec![FakeResponse::lines(&[
            r#"data: {"type":"complete","finalResponse":"ok"}"#,
        ])]);
        let conversation = turn(vec![
            ChatMessage::system("be brief"),
            ChatMessage::user("first"),
            ChatMessage::assistant("answer"),
            ChatMessage::user("fix this python function"),
        ]);

        client(&transport)
            .stream_dual(&conversation, DualRecorder::default())
            .await
            .expect("start")
            .finish()
            .await
            .expect("outcome");

        let body = &transport.requests()[0].body;
        assert_eq!(body["userQuery"], "fix this python function");
        assert_eq!(
            body["messages"],
            serde_json::json!([
                {"role": "user", "content": "first"},
                {"role": "assistant", "content": "answer"},
            ])
        );
        assert_eq!(body["isCodingRequest"], true);
        assert_eq!(body["contextFiles"], "");
    }

    #[tokio::test]
    async fn fallback_reuses_the_same_conversation() {
        let transport = FakeTransport::new(vec![
            FakeResponse::Reject(StreamError::http_status(500, "dual endpoint down")),
            FakeResponse::lines(&[
                r#"data: {"type":"chunk","content":"single answer"}"#,
                "data: [DONE]",
            ]),
        ]);
        let dual = DualRecorder::default();
        let single = SingleRecorder::default();
        let conversation = turn(vec![ChatMessage::system("sys"), ChatMessage::user("hi")]);

        let outcome = client(&transport)
            .stream_with_fallback(&conversation, dual.clone(), single.clone())
            .await
            .expect("start")
            .finish()
            .await
            .expect("outcome");

        assert_eq!(
            dual.calls(),
            vec![DualCall::Start, DualCall::Error("dual endpoint down".into())]
        );
        assert_eq!(
            single.calls(),
            vec![SingleCall::Chunk("single answer".into()), SingleCall::Complete]
        );
        assert!(outcome.used_fallback());
        assert_eq!(outcome.text(), "single answer");
        assert!(outcome.failure().is_none());

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(
            requests[1].body["messages"],
            serde_json::json!([
                {"role": "system", "content": "sys"},
                {"role": "user", "content": "hi"},
            ])
        );
    }

    #[tokio::test]
    async fn fallback_is_skipped_when_dual_completes() {
        let transport = FakeTransport::new(vec![FakeResponse::lines(&[
            r#"data: {"type":"chunk","content":"A","step":"gpt"}"#,
            r#"data: {"type":"complete"}"#,
        ])]);
        let single = SingleRecorder::default();

        let outcome = client(&transport)
            .stream_with_fallback(
                &turn(vec![ChatMessage::user("hi")]),
                DualRecorder::default(),
                single.clone(),
            )
            .await
            .expect("start")
            .finish()
            .await
            .expect("outcome");

        assert!(!outcome.used_fallback());
        assert_eq!(outcome.text(), "A");
        assert!(single.calls().is_empty());
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_dual_session_does_not_fall_back() {
        let transport = FakeTransport::new(vec![FakeResponse::Stall(vec![])]);
        let single = SingleRecorder::default();
        let dual = DualRecorder::default();

        let handle = client(&transport)
            .stream_with_fallback(&turn(vec![ChatMessage::user("hi")]), dual.clone(), single.clone())
            .await
            .expect("start");
        tokio::time::timeout(Duration::from_secs(5), async {
            while transport.requests().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("request sent");
        handle.abort();
        let outcome = handle.finish().await.expect("outcome");

        assert!(matches!(outcome, TurnOutcome::Dual(DualOutcome::Cancelled { .. })));
        assert_eq!(dual.calls(), vec![DualCall::Start]);
        assert!(single.calls().is_empty());
    }

    #[tokio::test]
    async fn token_failure_is_a_setup_error() {
        let transport = FakeTransport::default();
        let client = StreamClient::builder(ClientConfig::new("http://backend.test"))
            .transport(Arc::new(transport.clone()))
            .token_provider(Arc::new(FailingTokens))
            .build()
            .expect("client");

        let result = client
            .stream_single(&turn(vec![ChatMessage::user("hi")]), SingleRecorder::default())
            .await;

        assert!(matches!(result, Err(StreamError::Auth(msg)) if msg == "session expired"));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn untagged_dual_chunks_reach_the_diagnostic_sink() {
        let transport = FakeTransport::new(vec![FakeResponse::lines(&[
            r#"data: {"type":"chunk","content":"orphan"}"#,
            r#"data: {"type":"bogus"}"#,
            r#"data: {"type":"complete"}"#,
        ])]);
        let counters = Arc::new(DiagnosticCounters::default());
        let client = StreamClient::builder(ClientConfig::new("http://backend.test"))
            .transport(Arc::new(transport))
            .diagnostics(counters.clone())
            .build()
            .expect("client");

        let outcome = client
            .stream_dual(&turn(vec![ChatMessage::user("hi")]), DualRecorder::default())
            .await
            .expect("start")
            .finish()
            .await
            .expect("outcome");

        assert_eq!(outcome.response().primary_text, "orphan");
        assert_eq!(counters.untagged_chunks(), 1);
        assert_eq!(counters.dropped_lines(), 1);
    }

    #[test]
    fn build_rejects_brand_caught_by_filter() {
        let result = StreamClient::builder(ClientConfig::new("http://backend.test").brand("OpenAI Plus"))
            .transport(Arc::new(FakeTransport::default()))
            .build();
        assert!(matches!(result, Err(StreamError::Config(_))));
    }
}
