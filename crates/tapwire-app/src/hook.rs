//! Lifecycle event submitter.
//!
//! Reads a hook payload the coding agent wrote to stdin, forwards it to the
//! dashboard ingestion endpoint, and relays the response triple. Any failure
//! yields the default (exit code 0, no output) so the agent is never blocked.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use tapwire_core::{HookResponse, LifecycleSubmission};

/// Default ingestion endpoint.
pub const DEFAULT_HOOK_URL: &str = "http://localhost:5000/api/hook-event";

/// Upper bound on the whole submission round trip.
pub const HOOK_TIMEOUT: Duration = Duration::from_secs(5);

/// Agent environment variables included with every submission.
pub const AGENT_ENV_VARS: &[&str] = &[
    "CLAUDE_PROJECT_DIR",
    "CLAUDE_CODE_REMOTE",
    "CLAUDE_ENV_FILE",
    "CLAUDE_PLUGIN_ROOT",
];

/// Submission errors.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Ingestion endpoint returned {0}")]
    Status(reqwest::StatusCode),
}

pub type Result<T> = std::result::Result<T, HookError>;

/// Builds a submission from the raw stdin payload.
///
/// Envelope fields are read from the snake_case payload. A payload that is
/// not JSON is still submitted, with an empty event name and no input.
pub fn build_submission<F>(stdin: &str, env: F) -> LifecycleSubmission
where
    F: Fn(&str) -> Option<String>,
{
    let root: Option<Value> = serde_json::from_str(stdin).ok();
    let field = |key: &str| {
        root.as_ref()
            .and_then(|r| r.get(key))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    let environment_variables: BTreeMap<String, String> = AGENT_ENV_VARS
        .iter()
        .filter_map(|key| env(key).map(|value| (key.to_string(), value)))
        .collect();

    LifecycleSubmission {
        hook_event_name: field("hook_event_name").unwrap_or_default(),
        session_id: field("session_id"),
        cwd: field("cwd"),
        permission_mode: field("permission_mode"),
        transcript_path: field("transcript_path"),
        environment_variables,
        hook_input: root,
    }
}

/// HTTP client for the ingestion endpoint.
#[derive(Debug, Clone)]
pub struct HookClient {
    client: reqwest::Client,
    url: String,
}

impl HookClient {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HOOK_TIMEOUT)
            .no_proxy()
            .user_agent(format!("tapwire-hook/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Posts a submission and returns the server's response triple.
    pub async fn submit(&self, submission: &LifecycleSubmission) -> Result<HookResponse> {
        let response = self.client.post(&self.url).json(submission).send().await?;

        if !response.status().is_success() {
            return Err(HookError::Status(response.status()));
        }

        Ok(response.json::<HookResponse>().await?)
    }
}

/// Runs one submission end to end. Never fails: errors map to the default
/// response.
pub async fn relay(url: &str, stdin: &str) -> HookResponse {
    let submission = build_submission(stdin, |key| std::env::var(key).ok());

    let result = match HookClient::new(url) {
        Ok(client) => client.submit(&submission).await,
        Err(e) => Err(e),
    };

    result.unwrap_or_else(|e| {
        tracing::debug!("Hook submission failed: {}", e);
        HookResponse::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use tapwire_server::AppState;
    use tokio::net::TcpListener;

    const PAYLOAD: &str = r#"{
        "hook_event_name": "PreToolUse",
        "session_id": "s-42",
        "cwd": "/work",
        "permission_mode": "default",
        "transcript_path": "/tmp/t.jsonl",
        "tool_input": {"command": "cargo fmt"}
    }"#;

    fn env(key: &str) -> Option<String> {
        match key {
            "CLAUDE_PROJECT_DIR" => Some("/work".to_string()),
            "HOME" => Some("/root".to_string()),
            _ => None,
        }
    }

    async fn spawn_dashboard(state: AppState) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = tapwire_server::router(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/api/hook-event", addr)
    }

    #[test]
    fn envelope_fields_are_extracted() {
        let submission = build_submission(PAYLOAD, env);

        assert_eq!(submission.hook_event_name, "PreToolUse");
        assert_eq!(submission.session_id.as_deref(), Some("s-42"));
        assert_eq!(submission.cwd.as_deref(), Some("/work"));
        assert_eq!(submission.permission_mode.as_deref(), Some("default"));
        assert_eq!(submission.transcript_path.as_deref(), Some("/tmp/t.jsonl"));
        assert_eq!(
            submission.hook_input.unwrap()["tool_input"]["command"],
            "cargo fmt"
        );
    }

    #[test]
    fn only_agent_variables_are_collected() {
        let submission = build_submission(PAYLOAD, env);
        assert_eq!(submission.environment_variables.len(), 1);
        assert_eq!(submission.environment_variables["CLAUDE_PROJECT_DIR"], "/work");
    }

    #[test]
    fn garbage_stdin_still_builds_a_submission() {
        let submission = build_submission("not json at all", |_| None);
        assert_eq!(submission.hook_event_name, "");
        assert!(submission.hook_input.is_none());
        assert!(submission.environment_variables.is_empty());
    }

    #[tokio::test]
    async fn submission_round_trip() {
        let state = AppState::with_capacity(10);
        let url = spawn_dashboard(state.clone()).await;

        let client = HookClient::new(url).unwrap();
        let response = client.submit(&build_submission(PAYLOAD, env)).await.unwrap();

        assert_eq!(response, HookResponse::captured("PreToolUse"));
        let stored = state.lifecycle.get_all();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].session_id.as_deref(), Some("s-42"));
    }

    #[tokio::test]
    async fn unreachable_server_yields_default_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let response = relay(&format!("http://{}/api/hook-event", addr), PAYLOAD).await;
        assert_eq!(response, HookResponse::default());
        assert_eq!(response.exit_code, 0);
    }
}
