//! Captured record types.
//!
//! Records serialize as camelCase JSON so dashboards can consume them as-is.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Length of generated record identifiers.
const ID_LEN: usize = 12;

/// Generates a short opaque identifier (12 lowercase hex characters).
pub fn new_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(ID_LEN);
    id
}

/// Converts a duration to fractional milliseconds.
pub fn duration_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// One raw event from a server-sent event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    /// Name from the preceding `event:` line, if any.
    pub event_type: Option<String>,
    /// Payload of the `data:` line.
    pub data: String,
}

impl StreamEvent {
    /// Creates a new stream event.
    pub fn new(event_type: Option<String>, data: impl Into<String>) -> Self {
        Self {
            event_type,
            data: data.into(),
        }
    }
}

/// One captured request/response pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRecord {
    id: String,
    /// When capture started (server clock).
    pub timestamp: DateTime<Utc>,

    // Request
    pub method: String,
    /// Path including the query string.
    pub path: String,
    pub request_headers: BTreeMap<String, String>,
    pub request_body: Option<String>,

    // Derived request fields
    pub model: Option<String>,
    pub is_streaming: bool,
    pub max_tokens: Option<u32>,

    // Response
    pub status_code: Option<u16>,
    pub response_headers: BTreeMap<String, String>,
    pub response_body: Option<String>,

    // Derived response fields
    pub message_id: Option<String>,
    pub stop_reason: Option<String>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cache_creation_input_tokens: Option<u64>,
    pub cache_read_input_tokens: Option<u64>,

    sse_events: Vec<StreamEvent>,

    // Timing
    duration_ms: Option<f64>,
    time_to_first_token_ms: Option<f64>,
}

impl ExchangeRecord {
    /// Creates an empty record for a request that is about to be captured.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            timestamp: Utc::now(),
            method: method.into(),
            path: path.into(),
            request_headers: BTreeMap::new(),
            request_body: None,
            model: None,
            is_streaming: false,
            max_tokens: None,
            status_code: None,
            response_headers: BTreeMap::new(),
            response_body: None,
            message_id: None,
            stop_reason: None,
            input_tokens: None,
            output_tokens: None,
            cache_creation_input_tokens: None,
            cache_read_input_tokens: None,
            sse_events: Vec::new(),
            duration_ms: None,
            time_to_first_token_ms: None,
        }
    }

    /// Creates a minimal record for a response whose request was never captured.
    pub fn orphan(status: u16, elapsed: Duration) -> Self {
        let mut record = Self::new("", "");
        record.status_code = Some(status);
        record.finish(elapsed);
        record
    }

    /// Returns the record identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the captured stream events in arrival order.
    pub fn sse_events(&self) -> &[StreamEvent] {
        &self.sse_events
    }

    /// Appends a stream event. Ignored once the record is finished.
    pub fn push_event(&mut self, event: StreamEvent) {
        if self.is_finished() {
            tracing::debug!(id = %self.id, "ignoring stream event after finish");
            return;
        }
        self.sse_events.push(event);
    }

    /// Total exchange duration in milliseconds, once finished.
    pub fn duration_ms(&self) -> Option<f64> {
        self.duration_ms
    }

    /// Time until the first content-bearing stream event, in milliseconds.
    pub fn time_to_first_token_ms(&self) -> Option<f64> {
        self.time_to_first_token_ms
    }

    /// Whether the total duration has been recorded.
    pub fn is_finished(&self) -> bool {
        self.duration_ms.is_some()
    }

    /// Records the total duration. Only the first call has an effect.
    pub fn finish(&mut self, elapsed: Duration) {
        if self.duration_ms.is_none() {
            self.duration_ms = Some(duration_ms(elapsed));
        }
    }

    /// Records time-to-first-token. Only the first call has an effect.
    pub fn mark_first_token(&mut self, elapsed: Duration) {
        if self.time_to_first_token_ms.is_none() {
            self.time_to_first_token_ms = Some(duration_ms(elapsed));
        }
    }
}

/// Response triple returned synchronously to a lifecycle event submitter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HookResponse {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl HookResponse {
    /// The response sent for every accepted event.
    pub fn captured(event_name: &str) -> Self {
        Self {
            exit_code: 0,
            stdout: format!("Hook '{}' captured", event_name),
            stderr: String::new(),
        }
    }
}

/// Lifecycle event as submitted by an external hook process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LifecycleSubmission {
    pub hook_event_name: String,
    pub session_id: Option<String>,
    pub cwd: Option<String>,
    pub permission_mode: Option<String>,
    pub transcript_path: Option<String>,
    /// Full original hook payload.
    pub hook_input: Option<Value>,
    pub environment_variables: BTreeMap<String, String>,
}

/// An ingested lifecycle (hook) event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    id: String,
    /// Server receive time; caller-supplied values are discarded.
    pub timestamp: DateTime<Utc>,
    pub hook_event_name: String,
    pub session_id: Option<String>,
    pub cwd: Option<String>,
    pub permission_mode: Option<String>,
    pub transcript_path: Option<String>,
    pub hook_input: Option<Value>,
    pub environment_variables: BTreeMap<String, String>,
    #[serde(flatten)]
    pub response: HookResponse,
}

impl LifecycleEvent {
    /// Accepts a submission, stamping it with a fresh id, the server clock,
    /// and the standard response triple.
    pub fn accept(submission: LifecycleSubmission) -> Self {
        let response = HookResponse::captured(&submission.hook_event_name);
        Self {
            id: new_id(),
            timestamp: Utc::now(),
            hook_event_name: submission.hook_event_name,
            session_id: submission.session_id,
            cwd: submission.cwd,
            permission_mode: submission.permission_mode,
            transcript_path: submission.transcript_path,
            hook_input: submission.hook_input,
            environment_variables: submission.environment_variables,
            response,
        }
    }

    /// Returns the event identifier.
    pub fn id(&self) -> &str {
        &self.id
    }
}
