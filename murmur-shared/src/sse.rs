//! # Event-stream parsing
//!
//! Line-oriented tagged records as emitted by the Murmur backend:
//!
//! ```text
//! event: content_delta
//! data: {"content":"hi"}
//!
//! ```
//!
//! Records are separated by a blank line. A record without a terminating
//! blank line is never parsed; it is handed back as the remainder so the
//! caller can prepend it to the next chunk.

/// A complete `(event, data)` pair lifted off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// Value of the `event:` line.
    pub name: String,
    /// Value of the `data:` line(s), normally a JSON document.
    pub data: String,
}

impl RawEvent {
    /// Builds a raw event from its parts.
    pub fn new(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// Output of one parse pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedChunk {
    /// Complete records in arrival order.
    pub events: Vec<RawEvent>,
    /// Trailing text that does not yet form a complete record.
    pub remainder: String,
}

const RECORD_SEPARATOR: &str = "\n\n";

/// Splits `buffer` into complete records and an unterminated remainder.
///
/// `\r\n` line endings are accepted. Records lacking either an `event:` or a
/// `data:` line are dropped without error.
#[must_use]
pub fn parse_event_stream(buffer: &str) -> ParsedChunk {
    let normalized = if buffer.contains('\r') {
        buffer.replace("\r\n", "\n")
    } else {
        buffer.to_string()
    };

    let (complete, remainder) = match normalized.rfind(RECORD_SEPARATOR) {
        Some(idx) => (
            &normalized[..idx],
            &normalized[idx + RECORD_SEPARATOR.len()..],
        ),
        None => ("", normalized.as_str()),
    };

    let events = complete
        .split(RECORD_SEPARATOR)
        .filter_map(parse_record)
        .collect();

    ParsedChunk {
        events,
        remainder: remainder.to_string(),
    }
}

fn parse_record(record: &str) -> Option<RawEvent> {
    let mut name: Option<&str> = None;
    let mut data: Option<String> = None;

    for line in record.lines() {
        if let Some(value) = line.strip_prefix("event:") {
            name = Some(value.trim());
        } else if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            match data.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => data = Some(value.to_string()),
            }
        }
    }

    match (name, data) {
        (Some(name), Some(data)) if !name.is_empty() => Some(RawEvent::new(name, data)),
        _ => None,
    }
}

/// Accumulates text across chunks and yields complete records.
///
/// Thin stateful wrapper over [`parse_event_stream`] used by both the
/// incremental and the whole-body readers.
#[derive(Debug, Default)]
pub struct EventStreamBuffer {
    pending: String,
}

impl EventStreamBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `text` and drains every record it completes.
    pub fn push(&mut self, text: &str) -> Vec<RawEvent> {
        self.pending.push_str(text);
        let parsed = parse_event_stream(&self.pending);
        self.pending = parsed.remainder;
        parsed.events
    }

    /// Text held back because it does not end a record yet.
    #[must_use]
    pub fn remainder(&self) -> &str {
        &self.pending
    }
}

/// Decodes UTF-8 across arbitrary chunk boundaries.
///
/// A multi-byte character split between two chunks is carried over instead
/// of being replaced. Invalid sequences are replaced with U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    carry: Vec<u8>,
}

impl Utf8ChunkDecoder {
    /// Creates a decoder with no carried bytes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes as much of `carry + bytes` as forms complete characters.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.carry.extend_from_slice(bytes);
        let mut out = String::with_capacity(self.carry.len());
        let mut input: &[u8] = &self.carry;

        loop {
            match std::str::from_utf8(input) {
                Ok(valid) => {
                    out.push_str(valid);
                    input = &[];
                    break;
                }
                Err(err) => {
                    let (valid, rest) = input.split_at(err.valid_up_to());
                    // valid_up_to guarantees this prefix is UTF-8.
                    out.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            input = &rest[len..];
                        }
                        None => {
                            input = rest;
                            break;
                        }
                    }
                }
            }
        }

        let carried = input.to_vec();
        self.carry = carried;
        out
    }

    /// Flushes any carried bytes, replacing an incomplete tail.
    pub fn finish(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.carry).into_owned();
        self.carry.clear();
        tail
    }
}
