use std::sync::Arc;

use futures::StreamExt as _;
use tokio::sync::{oneshot, watch};
use tracing::{Instrument as _, debug, debug_span};

use crate::coordinator::{DualOutcome, DualStreamCoordinator, DualStreamHandler};
use crate::errors::{SessionFailure, StreamError};
use crate::frame::FrameParser;
use crate::reconciler::{SingleOutcome, SingleStreamHandler, SingleStreamReconciler};
use crate::stream::StreamEvent;
use crate::transport::{Transport, TransportRequest, line_stream};

/// Handle used to abandon a running session.
#[derive(Clone, Debug)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    pub(crate) fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, rx)
    }

    /// Requests cancellation.
    ///
    /// The session stops at its next suspension point and closes the
    /// connection. No handler callback fires once the session has observed
    /// the request; the outcome is then `Cancelled` with the text delivered
    /// so far.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

/// A spawned session. Dropping it aborts the session; use
/// [`detach`](Self::detach) to let it run to its natural end instead.
pub struct SessionHandle<O> {
    session_id: uuid::Uuid,
    abort_handle: AbortHandle,
    outcome_rx: oneshot::Receiver<O>,
    abort_on_drop: bool,
}

impl<O> SessionHandle<O> {
    pub(crate) fn new(
        session_id: uuid::Uuid,
        abort_handle: AbortHandle,
        outcome_rx: oneshot::Receiver<O>,
    ) -> Self {
        Self {
            session_id,
            abort_handle,
            outcome_rx,
            abort_on_drop: true,
        }
    }

    pub fn session_id(&self) -> uuid::Uuid {
        self.session_id
    }

    /// Returns a handle that can cancel the session from elsewhere.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    pub fn abort(&self) {
        self.abort_handle.abort();
    }

    /// Lets the session keep running without a handle. Its outcome is
    /// discarded; handler callbacks still fire.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn detach(mut self) {
        self.abort_on_drop = false;
        // A closed abort channel stops the session, so keep one sender
        // alive until the session drops its receiver.
        let abort = self.abort_handle.clone();
        tokio::spawn(async move { abort.tx.closed().await });
    }

    /// Waits for the session to end and returns its outcome.
    pub async fn finish(mut self) -> Result<O, StreamError> {
        match (&mut self.outcome_rx).await {
            Ok(outcome) => Ok(outcome),
            Err(_) if self.abort_handle.is_aborted() => Err(StreamError::Cancelled),
            Err(_) => Err(StreamError::protocol_msg(format!(
                "session task ended without outcome (session={})",
                self.session_id
            ))),
        }
    }
}

impl<O> Drop for SessionHandle<O> {
    fn drop(&mut self) {
        if self.abort_on_drop {
            self.abort_handle.abort();
        }
    }
}

/// Reconciliation state plus the caller's handler for one session.
pub(crate) trait SessionDriver: Send + 'static {
    type Outcome: Send + 'static;

    fn start(&mut self) {}
    /// Returns `true` once the session is terminal.
    fn handle(&mut self, event: StreamEvent) -> bool;
    fn finish(&mut self);
    fn fail(&mut self, failure: SessionFailure);
    fn into_outcome(self) -> Self::Outcome;
}

pub(crate) struct SingleDriver<H> {
    pub(crate) reconciler: SingleStreamReconciler,
    pub(crate) handler: H,
}

impl<H> SessionDriver for SingleDriver<H>
where
    H: SingleStreamHandler + 'static,
{
    type Outcome = SingleOutcome;

    fn handle(&mut self, event: StreamEvent) -> bool {
        self.reconciler.handle(event, &mut self.handler)
    }

    fn finish(&mut self) {
        self.reconciler.finish(&mut self.handler);
    }

    fn fail(&mut self, failure: SessionFailure) {
        self.reconciler.fail(failure, &mut self.handler);
    }

    fn into_outcome(self) -> SingleOutcome {
        self.reconciler.into_outcome()
    }
}

pub(crate) struct DualDriver<H> {
    pub(crate) coordinator: DualStreamCoordinator,
    pub(crate) handler: H,
}

impl<H> SessionDriver for DualDriver<H>
where
    H: DualStreamHandler + 'static,
{
    type Outcome = DualOutcome;

    fn start(&mut self) {
        self.coordinator.start(&mut self.handler);
    }

    fn handle(&mut self, event: StreamEvent) -> bool {
        self.coordinator.handle(event, &mut self.handler)
    }

    fn finish(&mut self) {
        self.coordinator.finish(&mut self.handler);
    }

    fn fail(&mut self, failure: SessionFailure) {
        self.coordinator.fail(failure, &mut self.handler);
    }

    fn into_outcome(self) -> DualOutcome {
        self.coordinator.into_outcome()
    }
}

/// Everything a session task needs besides its driver.
pub(crate) struct SessionParts {
    pub(crate) session_id: uuid::Uuid,
    pub(crate) mode: &'static str,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) request: TransportRequest,
    pub(crate) parser: FrameParser,
}

/// Spawns `run_session` and returns a handle to it.
pub(crate) fn spawn_session<D>(parts: SessionParts, driver: D) -> SessionHandle<D::Outcome>
where
    D: SessionDriver,
{
    let session_id = parts.session_id;
    let (abort_handle, abort_rx) = AbortHandle::new();
    let (outcome_tx, outcome_rx) = oneshot::channel();
    tokio::spawn(async move {
        let outcome = run_session(parts, driver, abort_rx).await;
        let _ = outcome_tx.send(outcome);
    });
    SessionHandle::new(session_id, abort_handle, outcome_rx)
}

/// Opens the stream and feeds it through the driver until a terminal event,
/// the end of the body, a transport failure, or an abort.
pub(crate) async fn run_session<D>(
    parts: SessionParts,
    mut driver: D,
    mut abort_rx: watch::Receiver<bool>,
) -> D::Outcome
where
    D: SessionDriver,
{
    let SessionParts {
        session_id,
        mode,
        transport,
        request,
        mut parser,
    } = parts;
    let span = debug_span!("stream_session", %session_id, mode);

    async move {
        driver.start();
        debug!(url = %request.url, "opening stream");
        let opened = tokio::select! {
            biased;
            _ = aborted(&mut abort_rx) => {
                debug!("session aborted before stream opened");
                return driver.into_outcome();
            }
            opened = transport.open(request) => opened,
        };
        let bytes = match opened {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!(error = %err, "stream failed to open");
                driver.fail(SessionFailure::from(err));
                return driver.into_outcome();
            }
        };

        let mut lines = Box::pin(line_stream(bytes));
        let mut events = 0_u64;
        loop {
            let next = tokio::select! {
                biased;
                _ = aborted(&mut abort_rx) => {
                    debug!(events, "session aborted");
                    break;
                }
                next = lines.next() => next,
            };
            if abort_requested(&abort_rx) {
                debug!(events, "session aborted");
                break;
            }
            match next {
                Some(Ok(line)) => {
                    let Some(event) = parser.parse_line(&line) else {
                        continue;
                    };
                    debug!(seq = events, kind = ?event.kind(), "stream event");
                    events = events.saturating_add(1);
                    if driver.handle(event) {
                        break;
                    }
                }
                Some(Err(err)) => {
                    debug!(error = %err, events, "stream read failed");
                    driver.fail(SessionFailure::from(err));
                    break;
                }
                None => {
                    debug!(events, "stream ended");
                    driver.finish();
                    break;
                }
            }
        }
        drop(lines);
        driver.into_outcome()
    }
    .instrument(span)
    .await
}

/// Resolves once an abort was requested or every [`AbortHandle`] is gone.
async fn aborted(abort_rx: &mut watch::Receiver<bool>) {
    let _ = abort_rx.wait_for(|aborted| *aborted).await;
}

/// Whether the session should stop: abort requested or all handles dropped.
pub(crate) fn abort_requested(abort_rx: &watch::Receiver<bool>) -> bool {
    *abort_rx.borrow() || abort_rx.has_changed().is_err()
}
