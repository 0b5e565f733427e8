//! Strategies for turning a reply body into event-stream records.
//!
//! Both readers hand every record to the same [`EventSink`], so how the body
//! is read never changes what the events mean.

use std::ops::ControlFlow;

use async_trait::async_trait;
use futures_util::StreamExt;
use shared::sse::{EventStreamBuffer, RawEvent, Utf8ChunkDecoder, parse_event_stream};
use tracing::debug;

use crate::{api::ByteStream, error::ClientResult};

/// Consumer of parsed records. `Break` stops reading.
pub trait EventSink: Send {
    fn handle(&mut self, event: RawEvent) -> ControlFlow<()>;
}

/// Why a reader stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEnd {
    /// The sink asked to stop.
    Stopped,
    /// The body ran out first.
    Exhausted,
}

/// Strategy for turning a reply body into records.
#[async_trait]
pub trait BodyReader: Send + Sync {
    /// Reads `body` and feeds each complete record to `sink` in order.
    ///
    /// # Errors
    /// Returns the transport error if reading the body fails.
    async fn read(&self, body: ByteStream, sink: &mut dyn EventSink) -> ClientResult<ReadEnd>;
}

/// Parses records as chunks arrive.
#[derive(Debug, Default, Clone, Copy)]
pub struct IncrementalReader;

/// Collects the whole body, then parses it once.
#[derive(Debug, Default, Clone, Copy)]
pub struct BufferedReader;

/// Picks the reader for the `incremental` capability flag.
#[must_use]
pub fn reader_for(incremental: bool) -> &'static dyn BodyReader {
    if incremental {
        &IncrementalReader
    } else {
        &BufferedReader
    }
}

fn feed(sink: &mut dyn EventSink, events: Vec<RawEvent>) -> ControlFlow<()> {
    for event in events {
        if sink.handle(event).is_break() {
            return ControlFlow::Break(());
        }
    }
    ControlFlow::Continue(())
}

#[async_trait]
impl BodyReader for IncrementalReader {
    async fn read(&self, mut body: ByteStream, sink: &mut dyn EventSink) -> ClientResult<ReadEnd> {
        let mut decoder = Utf8ChunkDecoder::new();
        let mut buffer = EventStreamBuffer::new();

        while let Some(chunk) = body.next().await {
            let text = decoder.decode(&chunk?);
            if feed(sink, buffer.push(&text)).is_break() {
                return Ok(ReadEnd::Stopped);
            }
        }

        let tail = decoder.finish();
        if feed(sink, buffer.push(&tail)).is_break() {
            return Ok(ReadEnd::Stopped);
        }
        if !buffer.remainder().trim().is_empty() {
            debug!(
                remainder = buffer.remainder(),
                "body ended inside an unterminated record"
            );
        }
        Ok(ReadEnd::Exhausted)
    }
}

#[async_trait]
impl BodyReader for BufferedReader {
    async fn read(&self, mut body: ByteStream, sink: &mut dyn EventSink) -> ClientResult<ReadEnd> {
        let mut bytes = Vec::new();
        while let Some(chunk) = body.next().await {
            bytes.extend_from_slice(&chunk?);
        }

        let text = String::from_utf8_lossy(&bytes);
        let parsed = parse_event_stream(&text);
        if feed(sink, parsed.events).is_break() {
            return Ok(ReadEnd::Stopped);
        }
        Ok(ReadEnd::Exhausted)
    }
}
