//! Async stream that turns a chat-completions SSE body into [`ChatDelta`]s.

use chatrelay_types::sse::SseParser;
use chatrelay_types::{ApiError, ChatCompletionChunk, ChatDelta, Utf8Carry, truncate_str};
use futures_core::Stream;
use pin_project_lite::pin_project;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

pin_project! {
    /// Deltas of a streamed chat completion, ending at `data: [DONE]` or at
    /// the end of the body.
    pub struct ChatCompletionStream {
        #[pin]
        inner: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
        parser: SseParser,
        utf8: Utf8Carry,
        queued: VecDeque<Result<ChatDelta, ApiError>>,
        done: bool,
    }
}

impl ChatCompletionStream {
    pub fn new(
        byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            parser: SseParser::new(),
            utf8: Utf8Carry::new(),
            queued: VecDeque::new(),
            done: false,
        }
    }
}

/// Outcome of one `data:` frame.
#[derive(Debug, PartialEq)]
enum Frame {
    Done,
    Deltas(Vec<ChatDelta>),
    Skip,
}

impl Stream for ChatCompletionStream {
    type Item = Result<ChatDelta, ApiError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(item) = this.queued.pop_front() {
                return Poll::Ready(Some(item));
            }
            if *this.done {
                return Poll::Ready(None);
            }

            let events = match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => this.parser.feed(&this.utf8.decode(&bytes)),
                Poll::Ready(Some(Err(e))) => {
                    *this.done = true;
                    let err = if e.is_timeout() {
                        ApiError::Timeout
                    } else {
                        ApiError::Network(e.to_string())
                    };
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(None) => {
                    *this.done = true;
                    let tail = this.utf8.finish();
                    let mut events = this.parser.feed(&tail);
                    events.extend(this.parser.finish());
                    events
                }
                Poll::Pending => return Poll::Pending,
            };

            for event in events {
                match parse_frame(&event.data) {
                    Ok(Frame::Done) => {
                        *this.done = true;
                        break;
                    }
                    Ok(Frame::Deltas(deltas)) => this.queued.extend(deltas.into_iter().map(Ok)),
                    Ok(Frame::Skip) => {}
                    Err(e) => {
                        *this.done = true;
                        this.queued.push_back(Err(e));
                        break;
                    }
                }
            }
        }
    }
}

/// Parse one `data:` payload. Malformed frames are logged and skipped; an
/// `{"error": ...}` frame ends the stream with an error.
fn parse_frame(data: &str) -> Result<Frame, ApiError> {
    let data = data.trim();
    if data.is_empty() {
        return Ok(Frame::Skip);
    }
    if data == "[DONE]" {
        return Ok(Frame::Done);
    }

    match serde_json::from_str::<ChatCompletionChunk>(data) {
        Ok(chunk) => Ok(Frame::Deltas(
            chunk
                .choices
                .into_iter()
                .take(1)
                .map(|choice| choice.delta)
                .filter(|delta| delta.content.is_some() || delta.reasoning_content.is_some())
                .collect(),
        )),
        Err(parse_err) => {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(data) {
                if let Some(error) = value.get("error") {
                    let message = error
                        .get("message")
                        .and_then(|m| m.as_str())
                        .unwrap_or("unknown stream error")
                        .to_string();
                    return Err(ApiError::Server {
                        status: 502,
                        message,
                    });
                }
            }
            tracing::warn!(
                "Skipping malformed stream frame ({parse_err}): {}",
                truncate_str(data, 200)
            );
            Ok(Frame::Skip)
        }
    }
}
