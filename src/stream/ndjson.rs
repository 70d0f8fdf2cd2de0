//! Newline-delimited JSON framing for stream events.
//!
//! Each event is one JSON object followed by `\n`. The decoder reassembles
//! lines across arbitrary chunk boundaries, flushes a trailing partial line at
//! end of input, and skips lines that fail to parse.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::Stream;
use pin_project_lite::pin_project;

use super::events::StreamEvent;
use super::lines::LineBuffer;

/// Encode one event as a single NDJSON frame.
pub fn encode_event(event: &StreamEvent) -> Result<Bytes, serde_json::Error> {
    let mut line = serde_json::to_vec(event)?;
    line.push(b'\n');
    Ok(Bytes::from(line))
}

/// Incremental NDJSON decoder.
#[derive(Debug, Default)]
pub struct NdjsonParser {
    lines: LineBuffer,
    skipped: usize,
}

impl NdjsonParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return all events completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let lines = self.lines.push(chunk);
        lines
            .iter()
            .filter_map(|line| self.parse_line(line))
            .collect()
    }

    /// Parse whatever remains buffered once input has ended.
    pub fn flush(&mut self) -> Option<StreamEvent> {
        let rest = self.lines.finish()?;
        self.parse_line(&rest)
    }

    /// Number of malformed lines dropped so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn parse_line(&mut self, line: &str) -> Option<StreamEvent> {
        match serde_json::from_str::<StreamEvent>(line) {
            Ok(event) => Some(event),
            Err(e) => {
                self.skipped += 1;
                tracing::warn!(error = %e, line = %truncate(line, 200), "Skipping malformed stream line");
                None
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

pin_project! {
    /// Adapts a byte stream into a stream of decoded [`StreamEvent`]s.
    ///
    /// Errors from the underlying byte stream are passed through unchanged
    /// and end the stream.
    pub struct NdjsonStream<S> {
        #[pin]
        byte_stream: S,
        parser: NdjsonParser,
        pending: VecDeque<StreamEvent>,
        done: bool,
    }
}

impl<S> NdjsonStream<S> {
    pub fn new(byte_stream: S) -> Self {
        Self {
            byte_stream,
            parser: NdjsonParser::new(),
            pending: VecDeque::new(),
            done: false,
        }
    }
}

impl<S, B, E> Stream for NdjsonStream<S>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    type Item = Result<StreamEvent, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            if *this.done {
                return Poll::Ready(None);
            }

            match this.byte_stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.pending.extend(this.parser.feed(chunk.as_ref()));
                }
                Poll::Ready(Some(Err(e))) => {
                    *this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    *this.done = true;
                    this.pending.extend(this.parser.flush());
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
