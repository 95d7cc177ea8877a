//! Forwarding proxy server.
//!
//! Every inbound request is handed to an [`ExchangeHook`], rewritten onto the
//! configured upstream base URL and sent with `reqwest`. The upstream response
//! (or failure) goes back through the hook, which produces what the client
//! sees.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Router;
use http::header::HOST;
use http::{HeaderMap, HeaderName, Request, StatusCode};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::error::{ProxyError, Result};
use crate::{DEFAULT_PROXY_PORT, DEFAULT_UPSTREAM};
use tapwire_core::DEFAULT_STORE_CAPACITY;

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Returns true for connection-scoped headers.
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Copies every header except connection-scoped ones.
pub fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_hop_by_hop(name) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

/// Per-exchange interception points.
///
/// `on_request` runs before forwarding and returns the context that is
/// threaded into exactly one of `on_response` or `on_upstream_error`.
#[async_trait]
pub trait ExchangeHook: Clone + Send + Sync + 'static {
    /// State carried from the request to the response of one exchange.
    type Context: Send + 'static;

    /// Inspects (and may re-buffer) the inbound request.
    async fn on_request(&self, req: &mut Request<Body>) -> Option<Self::Context>;

    /// Turns the upstream response into the response sent to the client.
    async fn on_response(
        &self,
        ctx: Option<Self::Context>,
        upstream: reqwest::Response,
    ) -> Response<Body>;

    /// Called when no upstream response was obtained. The client receives
    /// `status` with an empty body.
    async fn on_upstream_error(&self, ctx: Option<Self::Context>, status: StatusCode);
}

/// Proxy server configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address to bind the proxy to.
    pub addr: SocketAddr,
    /// Base URL requests are forwarded to.
    pub upstream: String,
    /// Number of exchanges kept in memory.
    pub capacity: usize,
}

impl ProxyConfig {
    /// Creates a new configuration with default settings.
    pub fn new() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PROXY_PORT)),
            upstream: DEFAULT_UPSTREAM.to_string(),
            capacity: DEFAULT_STORE_CAPACITY,
        }
    }

    /// Sets the listen address.
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Sets the port (uses 127.0.0.1 as host).
    pub fn with_port(mut self, port: u16) -> Self {
        self.addr = SocketAddr::from(([127, 0, 0, 1], port));
        self
    }

    /// Sets the upstream base URL.
    pub fn with_upstream(mut self, upstream: impl Into<String>) -> Self {
        self.upstream = upstream.into();
        self
    }

    /// Sets the store capacity. Zero is treated as one by the store.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared state of the forwarding route.
struct Forwarder<H> {
    hook: H,
    client: reqwest::Client,
    upstream: String,
}

/// Capturing reverse proxy.
pub struct ProxyServer<H: ExchangeHook> {
    config: ProxyConfig,
    forwarder: Arc<Forwarder<H>>,
}

impl<H: ExchangeHook> ProxyServer<H> {
    /// Creates a proxy server that forwards through `hook`.
    pub fn new(config: ProxyConfig, hook: H) -> Result<Self> {
        let upstream = validate_upstream(&config.upstream)?;

        // Bodies are forwarded as received: no decompression, no redirects,
        // and no system proxy (which could be this process).
        let client = reqwest::Client::builder()
            .no_proxy()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            config,
            forwarder: Arc::new(Forwarder {
                hook,
                client,
                upstream,
            }),
        })
    }

    /// Returns the address the proxy is configured to listen on.
    pub fn addr(&self) -> SocketAddr {
        self.config.addr
    }

    /// Returns the normalized upstream base URL.
    pub fn upstream(&self) -> &str {
        &self.forwarder.upstream
    }

    /// Builds the router. Every method and path is forwarded.
    pub fn router(&self) -> Router {
        Router::new()
            .fallback(forward::<H>)
            .with_state(Arc::clone(&self.forwarder))
    }

    /// Starts the proxy server.
    ///
    /// This will block until the server is shut down.
    pub async fn run(self) -> Result<()> {
        let listener = bind(self.config.addr).await?;

        tracing::info!(
            "Starting proxy on {} -> {}",
            self.config.addr,
            self.forwarder.upstream
        );

        axum::serve(listener, self.router()).await?;

        tracing::info!("Proxy server stopped");
        Ok(())
    }

    /// Binds the listener and serves in the background.
    ///
    /// Returns a handle that can be used to stop the server. The handle
    /// reports the bound address, which differs from the configured one when
    /// port 0 was requested.
    pub async fn start(self) -> Result<ProxyHandle> {
        let listener = bind(self.config.addr).await?;
        let addr = listener.local_addr()?;
        let router = self.router();

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let mut shutdown_rx = shutdown_tx.subscribe();

        tracing::info!("Starting proxy on {} -> {}", addr, self.forwarder.upstream);

        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                    tracing::info!("Proxy shutdown signal received");
                })
                .await;

            if let Err(e) = result {
                tracing::error!("Proxy error: {}", e);
            }
            tracing::info!("Proxy server stopped");
        });

        Ok(ProxyHandle {
            shutdown_tx,
            addr,
            handle,
        })
    }
}

/// Handle for controlling a running proxy server.
pub struct ProxyHandle {
    shutdown_tx: broadcast::Sender<()>,
    addr: SocketAddr,
    handle: tokio::task::JoinHandle<()>,
}

impl ProxyHandle {
    /// Returns the address the proxy is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signals the proxy to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Waits for the proxy to finish.
    pub async fn wait(self) {
        let _ = self.handle.await;
    }

    /// Shuts down the proxy and waits for it to finish.
    pub async fn stop(self) {
        self.shutdown();
        self.wait().await;
    }
}

async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ProxyError::Bind { addr, source })
}

fn validate_upstream(upstream: &str) -> Result<String> {
    let url = reqwest::Url::parse(upstream)
        .map_err(|_| ProxyError::InvalidUpstream(upstream.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ProxyError::InvalidUpstream(upstream.to_string()));
    }

    Ok(upstream.trim_end_matches('/').to_string())
}

async fn forward<H: ExchangeHook>(
    State(forwarder): State<Arc<Forwarder<H>>>,
    mut req: Request<Body>,
) -> Response<Body> {
    let ctx = forwarder.hook.on_request(&mut req).await;

    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let target = format!("{}{}", forwarder.upstream, path);

    let (parts, body) = req.into_parts();
    let mut headers = forwardable_headers(&parts.headers);
    headers.remove(HOST);

    tracing::debug!(method = %parts.method, target = %target, "forwarding request");

    let result = forwarder
        .client
        .request(parts.method, target.as_str())
        .headers(headers)
        .body(reqwest::Body::wrap_stream(body.into_data_stream()))
        .send()
        .await;

    match result {
        Ok(upstream) => forwarder.hook.on_response(ctx, upstream).await,
        Err(e) => {
            tracing::warn!(target = %target, "Upstream request failed: {}", e);
            forwarder
                .hook
                .on_upstream_error(ctx, StatusCode::BAD_GATEWAY)
                .await;
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn proxy_config_defaults() {
        let config = ProxyConfig::default();
        assert_eq!(config.addr.port(), 8888);
        assert_eq!(config.upstream, "https://api.anthropic.com");
        assert_eq!(config.capacity, 1000);
    }

    #[test]
    fn proxy_config_with_port() {
        let config = ProxyConfig::new().with_port(9999);
        assert_eq!(config.addr.port(), 9999);
    }

    #[test]
    fn proxy_config_with_addr() {
        let addr = SocketAddr::from(([0, 0, 0, 0], 9999));
        let config = ProxyConfig::new().with_addr(addr);
        assert_eq!(config.addr, addr);
    }

    #[test]
    fn upstream_is_validated_and_normalized() {
        assert_eq!(
            validate_upstream("http://localhost:9000/").unwrap(),
            "http://localhost:9000"
        );
        assert!(matches!(
            validate_upstream("localhost:9000"),
            Err(ProxyError::InvalidUpstream(_))
        ));
        assert!(matches!(
            validate_upstream("ftp://example.com"),
            Err(ProxyError::InvalidUpstream(_))
        ));
    }

    #[test]
    fn hop_by_hop_headers_are_dropped() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("content-encoding", HeaderValue::from_static("gzip"));
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));

        let out = forwardable_headers(&headers);
        assert!(!out.contains_key("connection"));
        assert!(!out.contains_key("transfer-encoding"));
        assert_eq!(out["content-encoding"], "gzip");
        assert_eq!(out.get_all("set-cookie").iter().count(), 2);
    }
}
