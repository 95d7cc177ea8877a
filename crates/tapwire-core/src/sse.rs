//! Line-oriented server-sent event parsing.
//!
//! ```text
//! idle ──"event: x"──▶ have-type(x) ──"data: y"──▶ emit (x, y)
//!   ▲                                                  │
//!   └──────────────────── blank line ◀─────────────────┘
//! ```
//!
//! Every `data:` line is one complete event; consecutive `data:` lines are not
//! merged. This matches how the Messages API emits one JSON object per event.

use std::time::Duration;

use crate::metadata::StreamMetadata;
use crate::models::{ExchangeRecord, StreamEvent};

const EVENT_PREFIX: &str = "event: ";
const DATA_PREFIX: &str = "data: ";

/// Longest partial line kept while waiting for its terminator.
pub const MAX_PENDING_LINE: usize = 1024 * 1024;

/// Event parser state.
#[derive(Debug, Clone, Default)]
pub struct SseParser {
    event_type: Option<String>,
}

impl SseParser {
    /// Creates a parser in the idle state.
    pub fn new() -> Self {
        Self::default()
    }

    /// The event name remembered from the last `event:` line, if any.
    pub fn current_event_type(&self) -> Option<&str> {
        self.event_type.as_deref()
    }

    /// Feeds one line (without its terminator) and returns a completed event,
    /// if the line produced one.
    pub fn feed_line(&mut self, line: &str) -> Option<StreamEvent> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.is_empty() {
            self.event_type = None;
        } else if let Some(name) = line.strip_prefix(EVENT_PREFIX) {
            self.event_type = Some(name.to_string());
        } else if let Some(data) = line.strip_prefix(DATA_PREFIX) {
            return Some(StreamEvent::new(self.event_type.clone(), data));
        }
        None
    }

    /// Feeds one line and applies any resulting event to the record: the
    /// event is appended and its metadata extracted.
    pub fn process_line(
        &mut self,
        line: &str,
        record: &mut ExchangeRecord,
        elapsed: Duration,
    ) -> bool {
        let Some(event) = self.feed_line(line) else {
            return false;
        };

        if let Some(meta) = StreamMetadata::parse(event.event_type.as_deref(), &event.data) {
            meta.apply_to(record, elapsed);
        }
        record.push_event(event);
        true
    }
}

/// Reassembles complete lines from arbitrarily split chunks.
///
/// A line longer than [`MAX_PENDING_LINE`] is discarded whole: its bytes are
/// skipped up to and including the next `\n`, and nothing is emitted for it.
#[derive(Debug, Clone, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
    /// Skipping the rest of an oversized line.
    discarding: bool,
}

impl LineSplitter {
    /// Creates an empty splitter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns every line it completed, without the
    /// trailing `\n`.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            if self.discarding {
                self.discarding = false;
            } else if self.pending.len() + pos > MAX_PENDING_LINE {
                tracing::debug!(len = self.pending.len() + pos, "dropping oversized line");
                self.pending.clear();
            } else {
                self.pending.extend_from_slice(&rest[..pos]);
                lines.push(String::from_utf8_lossy(&self.pending).into_owned());
                self.pending.clear();
            }
            rest = &rest[pos + 1..];
        }

        if self.discarding {
            return lines;
        }

        if self.pending.len() + rest.len() > MAX_PENDING_LINE {
            tracing::debug!(
                pending = self.pending.len() + rest.len(),
                "dropping oversized partial line"
            );
            self.pending.clear();
            self.discarding = true;
        } else {
            self.pending.extend_from_slice(rest);
        }

        lines
    }

    /// Returns the unterminated remainder at end of stream, if any.
    pub fn finish(&mut self) -> Option<String> {
        if std::mem::take(&mut self.discarding) || self.pending.is_empty() {
            self.pending.clear();
            return None;
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(line)
    }
}
