//! Tapwire Proxy - capturing reverse proxy for LLM API traffic.
//!
//! Requests are forwarded to a configured upstream unchanged while a
//! [`CaptureHandler`] records each exchange into a bounded store.
//!
//! ## Architecture
//!
//! ```text
//! Client ─▶ ProxyServer ─▶ ExchangeHook::on_request ─▶ reqwest ─▶ Upstream
//!                                                                    │
//! Client ◀─────────────── ExchangeHook::on_response ◀────────────────┘
//!                                   │
//!                                   ▼
//!                        ExchangeStore + Broadcaster
//! ```
//!
//! Event-stream responses are relayed chunk by chunk; each chunk reaches the
//! client before it is decoded and parsed.

mod body;
mod error;
mod handler;
mod proxy;

pub use body::BufferedBody;
pub use error::{ProxyError, Result};
pub use handler::{CaptureHandler, ExchangeContext};
pub use proxy::{
    forwardable_headers, is_hop_by_hop, ExchangeHook, ProxyConfig, ProxyHandle, ProxyServer,
};

/// Default proxy port.
pub const DEFAULT_PROXY_PORT: u16 = 8888;

/// Default upstream base URL.
pub const DEFAULT_UPSTREAM: &str = "https://api.anthropic.com";

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::Router;
    use bytes::Bytes;
    use http::{HeaderMap, Request, StatusCode};
    use tapwire_core::{ExchangeStore, NoopBroadcaster, REDACTED};
    use tokio::net::TcpListener;
    use tower::ServiceExt;

    const SSE_CHUNKS: &[&str] = &[
        "event: message_start\ndata: {\"message\":{\"id\":\"msg_e2e\",\"usage\":{\"input_tokens\":12}}}\n\n",
        "event: content_block_delta\ndata: {\"delta\":{\"text\":\"Hel",
        "lo\"}}\n\nevent: message_delta\ndata: {\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":2}}\n\n",
    ];

    async fn upstream_messages(headers: HeaderMap, body: Bytes) -> axum::response::Response {
        let key = headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let streaming = String::from_utf8_lossy(&body).contains("\"stream\":true");

        if streaming {
            let chunks = futures::stream::iter(
                SSE_CHUNKS
                    .iter()
                    .map(|c| Ok::<_, std::io::Error>(Bytes::from_static(c.as_bytes()))),
            );
            (
                [("content-type", "text/event-stream"), ("x-seen-key", key.as_str())],
                Body::from_stream(chunks),
            )
                .into_response()
        } else {
            (
                [("content-type", "application/json"), ("x-seen-key", key.as_str())],
                r#"{"id":"msg_b","stop_reason":"end_turn","usage":{"input_tokens":3,"output_tokens":7}}"#,
            )
                .into_response()
        }
    }

    async fn spawn_upstream() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/v1/messages", post(upstream_messages));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn capture(store: &Arc<ExchangeStore>) -> CaptureHandler {
        CaptureHandler::new(Arc::clone(store), Arc::new(NoopBroadcaster))
    }

    #[test]
    fn default_port_is_correct() {
        assert_eq!(DEFAULT_PROXY_PORT, 8888);
    }

    #[test]
    fn invalid_upstream_is_rejected() {
        let store = Arc::new(ExchangeStore::new(1));
        let config = ProxyConfig::new().with_upstream("not a url");
        assert!(matches!(
            ProxyServer::new(config, capture(&store)),
            Err(ProxyError::InvalidUpstream(_))
        ));
    }

    #[tokio::test]
    async fn streamed_exchange_is_relayed_unchanged() {
        let upstream = spawn_upstream().await;
        let store = Arc::new(ExchangeStore::new(10));
        let config = ProxyConfig::new().with_port(0).with_upstream(upstream);
        let handle = ProxyServer::new(config, capture(&store))
            .unwrap()
            .start()
            .await
            .unwrap();

        let response = reqwest::Client::builder()
            .no_proxy()
            .build()
            .unwrap()
            .post(format!("http://{}/v1/messages", handle.addr()))
            .header("x-api-key", "sk-live")
            .header("content-type", "application/json")
            .body(r#"{"model":"m1","stream":true,"max_tokens":64}"#)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-seen-key"], "sk-live");
        let body = response.bytes().await.unwrap();
        assert_eq!(body, SSE_CHUNKS.concat().as_bytes());

        let record = store.get_all().pop().unwrap();
        assert_eq!(record.request_headers["x-api-key"], REDACTED);
        assert!(record.is_streaming);
        assert_eq!(record.message_id.as_deref(), Some("msg_e2e"));
        assert_eq!(record.input_tokens, Some(12));
        assert_eq!(record.output_tokens, Some(2));
        assert_eq!(record.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(record.sse_events().len(), 3);
        assert!(record.time_to_first_token_ms().is_some());

        handle.stop().await;
    }

    #[tokio::test]
    async fn buffered_exchange_through_router() {
        let upstream = spawn_upstream().await;
        let store = Arc::new(ExchangeStore::new(10));
        let config = ProxyConfig::new().with_upstream(format!("{}/", upstream));
        let server = ProxyServer::new(config, capture(&store)).unwrap();

        let request = Request::builder()
            .method("POST")
            .uri("/v1/messages")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"model":"m1","stream":false,"max_tokens":100}"#))
            .unwrap();

        let response = server.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("msg_b"));

        let record = store.get_all().pop().unwrap();
        assert_eq!(record.model.as_deref(), Some("m1"));
        assert_eq!(record.message_id.as_deref(), Some("msg_b"));
        assert_eq!(record.input_tokens, Some(3));
        assert_eq!(record.output_tokens, Some(7));
    }

    #[tokio::test]
    async fn unreachable_upstream_yields_bad_gateway() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = listener.local_addr().unwrap();
        drop(listener);

        let store = Arc::new(ExchangeStore::new(10));
        let config = ProxyConfig::new().with_upstream(format!("http://{}", dead));
        let server = ProxyServer::new(config, capture(&store)).unwrap();

        let request = Request::builder()
            .method("POST")
            .uri("/v1/messages")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"model":"m1"}"#))
            .unwrap();

        let response = server.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let record = store.get_all().pop().unwrap();
        assert_eq!(record.status_code, Some(502));
        assert!(record.is_finished());
    }
}
