//! SSE reframing for streamed completions
//!
//! Backend chunks are accumulated until a blank-line-terminated event is
//! complete, then each `data: ` event has its `model` field rewritten and is
//! forwarded immediately. The buffer is bounded: past the watermark, whatever
//! is held is flushed raw.

use bytes::{Bytes, BytesMut};
use futures::stream::Stream;
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;
use std::task::{Context, Poll};

use super::rectify::restore_model_name;

const EVENT_DELIMITER: &[u8] = b"\n\n";
const DATA_PREFIX: &[u8] = b"data: ";
const DONE_SENTINEL: &[u8] = b"[DONE]";

/// Incremental SSE event splitter and model-name rewriter
#[derive(Debug)]
pub struct SseReframer {
    buffer: BytesMut,
    scan_from: usize,
    virtual_model: String,
    watermark: usize,
}

impl SseReframer {
    pub fn new(virtual_model: impl Into<String>, watermark: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            scan_from: 0,
            virtual_model: virtual_model.into(),
            watermark,
        }
    }

    /// Feed one backend chunk; returns the frames ready for the client, in order
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(end) = self.next_event_end() {
            let event = self.buffer.split_to(end).freeze();
            self.scan_from = 0;
            frames.push(rewrite_event(event, &self.virtual_model));
        }

        if self.buffer.len() > self.watermark {
            tracing::warn!(
                buffered = self.buffer.len(),
                watermark = self.watermark,
                "SSE event exceeds watermark, flushing raw bytes"
            );
            frames.push(self.take_buffer());
        }

        frames
    }

    /// Residual bytes once the backend stream is over, passed verbatim
    pub fn finish(&mut self) -> Option<Bytes> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.take_buffer())
        }
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Offset just past the next `\n\n`, if the buffer holds a whole event
    fn next_event_end(&mut self) -> Option<usize> {
        let found = self.buffer[self.scan_from..]
            .windows(EVENT_DELIMITER.len())
            .position(|window| window == EVENT_DELIMITER);
        match found {
            Some(pos) => Some(self.scan_from + pos + EVENT_DELIMITER.len()),
            None => {
                // a delimiter may straddle the next chunk boundary
                self.scan_from = self.buffer.len().saturating_sub(EVENT_DELIMITER.len() - 1);
                None
            }
        }
    }

    fn take_buffer(&mut self) -> Bytes {
        self.scan_from = 0;
        self.buffer.split().freeze()
    }
}

/// Rewrite the `model` field of one complete SSE event
///
/// Non-data events, `[DONE]`, empty payloads and payloads that are not JSON
/// objects are returned as-is.
pub fn rewrite_event(event: Bytes, virtual_model: &str) -> Bytes {
    let Some(payload) = event.strip_prefix(DATA_PREFIX) else {
        return event;
    };
    let payload = payload.trim_ascii();
    if payload.is_empty() || payload == DONE_SENTINEL {
        return event;
    }

    let Ok(Value::Object(mut data)) = serde_json::from_slice::<Value>(payload) else {
        return event;
    };
    if !restore_model_name(&mut data, virtual_model) {
        return event;
    }

    let json = match serde_json::to_vec(&data) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize streaming event");
            return event;
        }
    };
    let mut frame = BytesMut::with_capacity(DATA_PREFIX.len() + json.len() + EVENT_DELIMITER.len());
    frame.extend_from_slice(DATA_PREFIX);
    frame.extend_from_slice(&json);
    frame.extend_from_slice(EVENT_DELIMITER);
    frame.freeze()
}

/// Client-facing stream that reframes a backend byte stream
///
/// Dropping it (client disconnect, shutdown) drops the backend stream and
/// with it the upstream connection. A backend error ends the stream after
/// the residual bytes are flushed; it is never surfaced to the client.
pub struct ReframeStream<S> {
    inner: S,
    reframer: SseReframer,
    pending: VecDeque<Bytes>,
    done: bool,
}

impl<S> ReframeStream<S> {
    pub fn new(inner: S, reframer: SseReframer) -> Self {
        Self {
            inner,
            reframer,
            pending: VecDeque::new(),
            done: false,
        }
    }
}

impl<S, E> Stream for ReframeStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        loop {
            if let Some(frame) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(frame)));
            }
            if this.done {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.pending.extend(this.reframer.push(&chunk));
                }
                Poll::Ready(Some(Err(e))) => {
                    tracing::warn!(error = %e, "Backend stream failed, ending client stream");
                    this.done = true;
                    this.pending.extend(this.reframer.finish());
                }
                Poll::Ready(None) => {
                    tracing::debug!("Backend stream finished");
                    this.done = true;
                    this.pending.extend(this.reframer.finish());
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<S> Drop for ReframeStream<S> {
    fn drop(&mut self) {
        if !self.done {
            tracing::debug!(
                buffered = self.reframer.buffered_len(),
                "Client stream dropped before backend finished"
            );
        }
    }
}
