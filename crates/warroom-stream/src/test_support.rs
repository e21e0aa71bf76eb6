use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt as _;
use futures::stream;

use crate::coordinator::DualStreamHandler;
use crate::errors::StreamError;
use crate::message::LegTag;
use crate::reconciler::SingleStreamHandler;
use crate::transport::{ByteStream, Transport, TransportRequest};

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum SingleCall {
    Chunk(String),
    Complete,
    Error(String),
    SearchStart(String),
    SearchComplete,
}

/// Records single-stream callbacks; clones share the same log.
#[derive(Clone, Default)]
pub(crate) struct SingleRecorder {
    calls: Arc<Mutex<Vec<SingleCall>>>,
}

impl SingleRecorder {
    pub(crate) fn calls(&self) -> Vec<SingleCall> {
        self.calls.lock().expect("recorder lock").clone()
    }

    pub(crate) fn deltas(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SingleCall::Chunk(delta) => Some(delta),
                _ => None,
            })
            .collect()
    }

    fn push(&self, call: SingleCall) {
        self.calls.lock().expect("recorder lock").push(call);
    }
}

impl SingleStreamHandler for SingleRecorder {
    fn on_chunk(&mut self, delta: &str) {
        self.push(SingleCall::Chunk(delta.to_string()));
    }

    fn on_complete(&mut self) {
        self.push(SingleCall::Complete);
    }

    fn on_error(&mut self, message: &str) {
        self.push(SingleCall::Error(message.to_string()));
    }

    fn on_web_search_start(&mut self, query: &str) {
        self.push(SingleCall::SearchStart(query.to_string()));
    }

    fn on_web_search_complete(&mut self) {
        self.push(SingleCall::SearchComplete);
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum DualCall {
    Start,
    Step(String, String),
    StepComplete(String, u64),
    Chunk(String, bool, String),
    Complete(String, String, String),
    Error(String),
}

/// Records dual-stream callbacks; clones share the same log.
#[derive(Clone, Default)]
pub(crate) struct DualRecorder {
    calls: Arc<Mutex<Vec<DualCall>>>,
}

impl DualRecorder {
    pub(crate) fn calls(&self) -> Vec<DualCall> {
        self.calls.lock().expect("recorder lock").clone()
    }

    fn push(&self, call: DualCall) {
        self.calls.lock().expect("recorder lock").push(call);
    }
}

impl DualStreamHandler for DualRecorder {
    fn on_start(&mut self) {
        self.push(DualCall::Start);
    }

    fn on_step(&mut self, tag: &LegTag, message: &str) {
        self.push(DualCall::Step(tag.to_string(), message.to_string()));
    }

    fn on_step_complete(&mut self, tag: &LegTag, duration_ms: u64) {
        self.push(DualCall::StepComplete(tag.to_string(), duration_ms));
    }

    fn on_chunk(&mut self, full_text: &str, is_complete: bool, tag: &LegTag) {
        self.push(DualCall::Chunk(
            full_text.to_string(),
            is_complete,
            tag.to_string(),
        ));
    }

    fn on_complete(&mut self, final_text: &str, primary_text: &str, secondary_text: &str) {
        self.push(DualCall::Complete(
            final_text.to_string(),
            primary_text.to_string(),
            secondary_text.to_string(),
        ));
    }

    fn on_error(&mut self, message: &str) {
        self.push(DualCall::Error(message.to_string()));
    }
}

pub(crate) enum FakeResponse {
    /// Body delivered as the given raw chunks.
    Body(Vec<Vec<u8>>),
    /// Body chunks followed by a read error.
    BodyThenError(Vec<Vec<u8>>, StreamError),
    /// `open` fails.
    Reject(StreamError),
    /// Body chunks, then the body stays open without yielding.
    Stall(Vec<Vec<u8>>),
    /// Body chunks, each delayed by the given interval.
    Drip(Vec<Vec<u8>>, Duration),
}

impl FakeResponse {
    /// Body with one chunk per line.
    pub(crate) fn lines(lines: &[&str]) -> Self {
        Self::Body(lines.iter().map(|l| format!("{l}\n").into_bytes()).collect())
    }
}

/// Transport that replays scripted responses in order and records requests.
#[derive(Clone, Default)]
pub(crate) struct FakeTransport {
    responses: Arc<Mutex<VecDeque<FakeResponse>>>,
    requests: Arc<Mutex<Vec<TransportRequest>>>,
}

impl FakeTransport {
    pub(crate) fn new(responses: Vec<FakeResponse>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            requests: Arc::default(),
        }
    }

    pub(crate) fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn open(&self, request: TransportRequest) -> Result<ByteStream, StreamError> {
        self.requests.lock().expect("requests lock").push(request);
        let next = self.responses.lock().expect("responses lock").pop_front();
        let chunks = |chunks: Vec<Vec<u8>>| {
            chunks
                .into_iter()
                .map(|c| Ok(bytes::Bytes::from(c)))
                .collect::<Vec<Result<bytes::Bytes, StreamError>>>()
        };
        match next {
            Some(FakeResponse::Body(body)) => Ok(Box::pin(stream::iter(chunks(body)))),
            Some(FakeResponse::BodyThenError(body, err)) => {
                let mut items = chunks(body);
                items.push(Err(err));
                Ok(Box::pin(stream::iter(items)))
            }
            Some(FakeResponse::Reject(err)) => Err(err),
            Some(FakeResponse::Stall(body)) => Ok(Box::pin(
                stream::iter(chunks(body)).chain(stream::pending()),
            )),
            Some(FakeResponse::Drip(body, interval)) => Ok(Box::pin(
                stream::iter(chunks(body)).then(move |chunk| async move {
                    tokio::time::sleep(interval).await;
                    chunk
                }),
            )),
            None => Err(StreamError::transport("no scripted response left")),
        }
    }
}
