//! SSE streaming plumbing shared by the protocol adapters.
//!
//! Adapters precompute the full frame sequence for a response; the frames
//! are then replayed over an SSE body with the configured inter-token
//! delay. Dropping the body stream (client disconnect) cancels any pending
//! sleep, so nothing is written after a disconnect.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::stream::{self, Stream, StreamExt};
use rand::prelude::*;
use tokio::time::sleep;

/// One Server-Sent Event, with the delay to apply before emitting it.
#[derive(Debug, Clone)]
pub struct SseFrame {
    pub event: Option<&'static str>,
    pub data: String,
    pub delay: Duration,
}

impl SseFrame {
    /// A plain `data:` frame.
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
            delay: Duration::ZERO,
        }
    }

    /// A named `event:` + `data:` frame (Anthropic style).
    pub fn event(event: &'static str, data: impl Into<String>) -> Self {
        Self {
            event: Some(event),
            data: data.into(),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn into_event(self) -> Event {
        let ev = Event::default().data(self.data);
        match self.event {
            Some(name) => ev.event(name),
            None => ev,
        }
    }
}

fn frame_stream(
    frames: Vec<SseFrame>,
) -> impl Stream<Item = Result<Event, Infallible>> + Send {
    stream::unfold(frames.into_iter(), |mut iter| async move {
        let frame = iter.next()?;
        if frame.delay > Duration::ZERO {
            sleep(frame.delay).await;
        }
        Some((Ok(frame.into_event()), iter))
    })
}

/// Stream the frames as an SSE response, honoring per-frame delays.
pub fn sse_response(frames: Vec<SseFrame>) -> Response {
    Sse::new(frame_stream(frames))
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keep-alive"),
        )
        .into_response()
}

/// Emit the given frames, then hold the connection open until the client
/// disconnects. Used by the timeout fault.
pub fn hanging_sse_response(frames: Vec<SseFrame>) -> Response {
    let stream = frame_stream(frames).chain(stream::pending());
    Sse::new(stream).into_response()
}

/// Split text into chunks of 1-3 words to simulate token-by-token
/// streaming. Every chunk after the first gets a leading space so naive
/// concatenation reconstructs the original text.
pub fn tokenize_chunks(text: &str, rng: &mut StdRng) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }
    let mut chunks = Vec::new();
    let mut i = 0;
    while i < words.len() {
        let n = (rng.gen_range(0..3) + 1).min(words.len() - i);
        chunks.push(words[i..i + n].join(" "));
        i += n;
    }
    for chunk in chunks.iter_mut().skip(1) {
        chunk.insert(0, ' ');
    }
    chunks
}

/// Split a string into pieces of at most `max_bytes`, respecting UTF-8
/// char boundaries. Used for streaming tool-call argument JSON.
pub fn split_string(s: &str, max_bytes: usize) -> Vec<String> {
    if s.is_empty() {
        return Vec::new();
    }
    let mut chunks = Vec::new();
    let mut current = String::new();
    for ch in s.chars() {
        if current.len() + ch.len_utf8() > max_bytes && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
