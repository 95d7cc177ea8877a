//! Best-effort extraction of summary fields from Messages API payloads.
//!
//! Every parser returns `Option`: a body that is not JSON, or not shaped the
//! way we expect, simply yields `None` and the record keeps its unset fields.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::models::ExchangeRecord;

/// Sentinel payload that terminates some event streams.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Fields extracted from a request body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RequestMetadata {
    pub model: Option<String>,
    #[serde(default)]
    pub stream: Option<bool>,
    pub max_tokens: Option<u32>,
}

impl RequestMetadata {
    /// Parses a request body. Returns `None` for anything but a JSON object
    /// with well-typed fields.
    pub fn parse(body: &str) -> Option<Self> {
        match serde_json::from_str::<Self>(body) {
            Ok(meta) => Some(meta),
            Err(e) => {
                tracing::debug!("request body is not a Messages payload: {}", e);
                None
            }
        }
    }

    /// Copies the extracted fields onto a record.
    pub fn apply_to(&self, record: &mut ExchangeRecord) {
        record.model = self.model.clone();
        record.is_streaming = self.stream.unwrap_or(false);
        record.max_tokens = self.max_tokens;
    }
}

/// Token usage counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cache_creation_input_tokens: Option<u64>,
    pub cache_read_input_tokens: Option<u64>,
}

impl Usage {
    fn from_value(usage: &Value) -> Self {
        Self {
            input_tokens: usage.get("input_tokens").and_then(Value::as_u64),
            output_tokens: usage.get("output_tokens").and_then(Value::as_u64),
            cache_creation_input_tokens: usage
                .get("cache_creation_input_tokens")
                .and_then(Value::as_u64),
            cache_read_input_tokens: usage
                .get("cache_read_input_tokens")
                .and_then(Value::as_u64),
        }
    }

    /// Overwrites record counters with the ones present here.
    fn apply_to(&self, record: &mut ExchangeRecord) {
        if let Some(v) = self.input_tokens {
            record.input_tokens = Some(v);
        }
        if let Some(v) = self.output_tokens {
            record.output_tokens = Some(v);
        }
        if let Some(v) = self.cache_creation_input_tokens {
            record.cache_creation_input_tokens = Some(v);
        }
        if let Some(v) = self.cache_read_input_tokens {
            record.cache_read_input_tokens = Some(v);
        }
    }
}

/// Fields extracted from a complete (non-streaming) response body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseMetadata {
    pub message_id: Option<String>,
    pub stop_reason: Option<String>,
    pub model: Option<String>,
    pub usage: Usage,
}

impl ResponseMetadata {
    /// Parses a decoded response body.
    pub fn parse(body: &str) -> Option<Self> {
        let root: Value = serde_json::from_str(body).ok()?;
        if !root.is_object() {
            return None;
        }

        Some(Self {
            message_id: string_field(&root, "id"),
            stop_reason: string_field(&root, "stop_reason"),
            model: string_field(&root, "model"),
            usage: root.get("usage").map(Usage::from_value).unwrap_or_default(),
        })
    }

    /// Copies the extracted fields onto a record. The model is only
    /// backfilled when the request did not name one.
    pub fn apply_to(&self, record: &mut ExchangeRecord) {
        if let Some(id) = &self.message_id {
            record.message_id = Some(id.clone());
        }
        if let Some(reason) = &self.stop_reason {
            record.stop_reason = Some(reason.clone());
        }
        self.usage.apply_to(record);
        if record.model.is_none() {
            record.model = self.model.clone();
        }
    }
}

/// Fields extracted from a single server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMetadata {
    /// `message_start`: message id and initial usage counters.
    MessageStart {
        message_id: Option<String>,
        usage: Usage,
    },
    /// `content_block_delta`: the first one marks time-to-first-token.
    ContentDelta,
    /// `message_delta`: final stop reason and output token count.
    MessageDelta {
        stop_reason: Option<String>,
        output_tokens: Option<u64>,
    },
}

impl StreamMetadata {
    /// Interprets one event. Unknown event names, the `[DONE]` sentinel, and
    /// payloads that are not JSON all yield `None`.
    pub fn parse(event_type: Option<&str>, data: &str) -> Option<Self> {
        if data == DONE_SENTINEL {
            return None;
        }
        let root: Value = serde_json::from_str(data).ok()?;

        match event_type? {
            "message_start" => {
                let message = root.get("message")?;
                // Output tokens in message_start are a placeholder; the real
                // count arrives with message_delta.
                let usage = message
                    .get("usage")
                    .map(|u| Usage {
                        output_tokens: None,
                        ..Usage::from_value(u)
                    })
                    .unwrap_or_default();
                Some(Self::MessageStart {
                    message_id: string_field(message, "id"),
                    usage,
                })
            }
            "content_block_delta" => Some(Self::ContentDelta),
            "message_delta" => Some(Self::MessageDelta {
                stop_reason: root
                    .get("delta")
                    .and_then(|d| string_field(d, "stop_reason")),
                output_tokens: root
                    .get("usage")
                    .and_then(|u| u.get("output_tokens"))
                    .and_then(Value::as_u64),
            }),
            _ => None,
        }
    }

    /// Applies the event to a record. `elapsed` is the time since the request
    /// started and is only used by the first content delta.
    pub fn apply_to(&self, record: &mut ExchangeRecord, elapsed: Duration) {
        match self {
            Self::MessageStart { message_id, usage } => {
                if let Some(id) = message_id {
                    record.message_id = Some(id.clone());
                }
                usage.apply_to(record);
            }
            Self::ContentDelta => record.mark_first_token(elapsed),
            Self::MessageDelta {
                stop_reason,
                output_tokens,
            } => {
                if let Some(reason) = stop_reason {
                    record.stop_reason = Some(reason.clone());
                }
                if let Some(tokens) = output_tokens {
                    record.output_tokens = Some(*tokens);
                }
            }
        }
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}
