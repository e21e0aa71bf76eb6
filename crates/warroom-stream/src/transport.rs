use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use futures::StreamExt as _;
use futures::stream;
use tracing::debug;

use crate::errors::StreamError;

/// Response body as raw byte chunks.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, StreamError>> + Send + 'static>>;

/// Outbound request handed to a [`Transport`].
#[derive(Clone, Debug, PartialEq)]
pub struct TransportRequest {
    pub url: String,
    pub body: serde_json::Value,
    /// Sent as `Authorization: Bearer <token>` when present.
    pub bearer_token: Option<String>,
    pub timeout: Option<Duration>,
}

/// Opens a streaming response for a request.
///
/// Implementations must fail with [`StreamError::Transport`] when the
/// connection cannot be opened or the backend answers with a non-success
/// status, before any body bytes are yielded. No retries are performed.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, request: TransportRequest) -> Result<ByteStream, StreamError>;
}

/// [`Transport`] backed by `reqwest`.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, StreamError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| StreamError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Uses a preconfigured client (proxies, custom TLS, ...).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn open(&self, request: TransportRequest) -> Result<ByteStream, StreamError> {
        let mut http_req = self
            .client
            .post(&request.url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&request.body);
        if let Some(token) = request.bearer_token.as_deref() {
            http_req = http_req.bearer_auth(token);
        }
        if let Some(timeout) = request.timeout {
            http_req = http_req.timeout(timeout);
        }

        let response = http_req.send().await.map_err(|e| {
            StreamError::transport(format!("request to {} failed: {e}", request.url))
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(StreamError::http_status(
                status.as_u16(),
                format!(
                    "backend responded with status {status}: {}",
                    crate::frame::error_body_message(&body)
                ),
            ));
        }
        debug!(url = %request.url, %status, "stream opened");

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| StreamError::transport(format!("stream read failed: {e}"))));
        Ok(Box::pin(stream))
    }
}

/// Incremental UTF-8 decoder that splits text into lines.
///
/// Bytes of a multi-byte character split across chunks are held back until
/// the character is complete; invalid sequences decode to U+FFFD. A partial
/// line stays buffered until its newline arrives or [`finish`] is called.
///
/// [`finish`]: LineDecoder::finish
#[derive(Debug, Default)]
pub struct LineDecoder {
    bytes: Vec<u8>,
    text: String,
}

impl LineDecoder {
    /// Feeds one body chunk and returns every line it completed.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        self.bytes.extend_from_slice(chunk);
        self.decode_available();
        self.take_lines()
    }

    /// Flushes buffered input at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        if !self.bytes.is_empty() {
            self.text.push_str(&String::from_utf8_lossy(&self.bytes));
            self.bytes.clear();
        }
        if self.text.is_empty() {
            return None;
        }
        let mut line = std::mem::take(&mut self.text);
        if line.ends_with('\r') {
            line.pop();
        }
        Some(line)
    }

    fn decode_available(&mut self) {
        loop {
            match std::str::from_utf8(&self.bytes) {
                Ok(text) => {
                    self.text.push_str(text);
                    self.bytes.clear();
                    return;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    if let Ok(text) = std::str::from_utf8(&self.bytes[..valid]) {
                        self.text.push_str(text);
                    }
                    match err.error_len() {
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            self.bytes.drain(..valid);
                            return;
                        }
                        Some(len) => {
                            self.text.push(char::REPLACEMENT_CHARACTER);
                            self.bytes.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }

    fn take_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(idx) = self.text.find('\n') {
            let mut line: String = self.text.drain(..=idx).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }
        lines
    }
}

/// Turns a byte stream into a lazy, single-pass stream of lines.
///
/// A read error is yielded once and ends the stream.
pub fn line_stream(
    bytes: ByteStream,
) -> impl futures::Stream<Item = Result<String, StreamError>> + Send {
    struct State {
        bytes: ByteStream,
        decoder: LineDecoder,
        pending: VecDeque<String>,
        done: bool,
    }

    stream::try_unfold(
        State {
            bytes,
            decoder: LineDecoder::default(),
            pending: VecDeque::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(line) = state.pending.pop_front() {
                    return Ok(Some((line, state)));
                }
                if state.done {
                    return Ok(None);
                }

                match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        let lines = state.decoder.push_chunk(&chunk);
                        state.pending.extend(lines);
                    }
                    Some(Err(err)) => return Err(err),
                    None => {
                        state.done = true;
                        state.pending.extend(state.decoder.finish());
                    }
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn byte_stream(chunks: Vec<Result<&'static [u8], StreamError>>) -> ByteStream {
        Box::pin(stream::iter(
            chunks
                .into_iter()
                .map(|c| c.map(bytes::Bytes::from_static))
                .collect::<Vec<_>>(),
        ))
    }

    #[test]
    fn partial_line_is_carried_to_next_chunk() {
        let mut decoder = LineDecoder::default();
        assert!(decoder.push_chunk(b"data: {\"type\":\"chunk\",\"con").is_empty());
        assert_eq!(
            decoder.push_chunk(b"tent\":\"hi\"}\r\ndata: [DO"),
            vec!["data: {\"type\":\"chunk\",\"content\":\"hi\"}".to_string()]
        );
        assert_eq!(decoder.push_chunk(b"NE]\n"), vec!["data: [DONE]".to_string()]);
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn multibyte_character_split_across_chunks() {
        let text = "caf\u{e9} \u{2122}\n";
        let bytes = text.as_bytes();
        // Split inside the two-byte é and again inside the three-byte ™.
        let e_acute = text.find('\u{e9}').expect("é");
        let trademark = text.find('\u{2122}').expect("™");
        let mut decoder = LineDecoder::default();
        assert!(decoder.push_chunk(&bytes[..e_acute + 1]).is_empty());
        assert!(decoder.push_chunk(&bytes[e_acute + 1..trademark + 2]).is_empty());
        let lines = decoder.push_chunk(&bytes[trademark + 2..]);
        assert_eq!(lines, vec!["caf\u{e9} \u{2122}".to_string()]);
    }

    #[test]
    fn invalid_bytes_become_replacement_characters() {
        let mut decoder = LineDecoder::default();
        let lines = decoder.push_chunk(b"a\xffb\n");
        assert_eq!(lines, vec!["a\u{fffd}b".to_string()]);
    }

    #[test]
    fn finish_flushes_unterminated_line() {
        let mut decoder = LineDecoder::default();
        assert!(decoder.push_chunk(b"{\"type\":\"complete\"}").is_empty());
        assert_eq!(decoder.finish(), Some("{\"type\":\"complete\"}".to_string()));
        assert_eq!(decoder.finish(), None);
    }

    #[tokio::test]
    async fn line_stream_yields_lines_in_order() {
        let lines: Vec<String> = line_stream(byte_stream(vec![
            Ok(&b"one\ntw"[..]),
            Ok(&b"o\n"[..]),
            Ok(&b"three"[..]),
        ]))
        .map(|l| l.expect("line"))
        .collect()
        .await;
        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn line_stream_ends_after_read_error() {
        let results: Vec<Result<String, StreamError>> = line_stream(byte_stream(vec![
            Ok(&b"one\n"[..]),
            Err(StreamError::transport("connection reset")),
            Ok(&b"never\n"[..]),
        ]))
        .collect()
        .await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], Ok("one".to_string()));
        assert!(matches!(&results[1], Err(StreamError::Transport { message, .. }) if message == "connection reset"));
    }
}
