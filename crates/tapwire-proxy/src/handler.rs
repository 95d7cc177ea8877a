//! Capturing exchange hook.
//!
//! Builds an [`ExchangeRecord`] for every proxied exchange while passing the
//! traffic through unchanged:
//!
//! ```text
//! request ─▶ buffer body, redact headers, parse metadata ─▶ ExchangeContext
//!                                                               │
//!                          ┌────────────────────────────────────┴──────┐
//!                          │ text/event-stream                         │ otherwise
//!                          ▼                                           ▼
//!            chunk ─▶ client, then decode ─▶ lines ─▶ SSE      read body, forward,
//!                          │                                   decode, parse
//!                          ▼                                           │
//!                  upstream closed ─────────▶ store + broadcast ◀──────┘
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use futures::StreamExt;
use http::header::{CACHE_CONTROL, CONTENT_ENCODING, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, Request, StatusCode};
use tokio::sync::mpsc;

use tapwire_core::{
    copy_headers, decode_body, redact_headers, Broadcaster, ContentEncoding, ExchangeRecord,
    ExchangeStore, LineSplitter, RequestMetadata, ResponseMetadata, SseParser, StreamDecoder,
};

use crate::body::BufferedBody;
use crate::proxy::{forwardable_headers, is_hop_by_hop, ExchangeHook};

/// Content type that selects the streaming path.
const EVENT_STREAM: &str = "text/event-stream";

/// Chunks buffered between the exchange task and the client. One keeps
/// forwarding and parsing in lock-step.
const STREAM_CHANNEL_CAPACITY: usize = 1;

type ChunkResult = std::result::Result<Bytes, std::io::Error>;

/// State of one in-flight exchange.
#[derive(Debug)]
pub struct ExchangeContext {
    record: ExchangeRecord,
    started: Instant,
}

impl ExchangeContext {
    /// Starts the clock for a new exchange.
    pub fn new(record: ExchangeRecord) -> Self {
        Self {
            record,
            started: Instant::now(),
        }
    }

    pub fn record(&self) -> &ExchangeRecord {
        &self.record
    }

    /// Time since the request was first seen.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn complete(mut self) -> ExchangeRecord {
        let elapsed = self.elapsed();
        self.record.finish(elapsed);
        self.record
    }
}

/// Exchange hook that records traffic into a store and notifies observers.
#[derive(Clone)]
pub struct CaptureHandler {
    store: Arc<ExchangeStore>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl std::fmt::Debug for CaptureHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureHandler")
            .field("stored", &self.store.len())
            .field("capacity", &self.store.capacity())
            .finish()
    }
}

impl CaptureHandler {
    /// Creates a handler writing into `store`.
    pub fn new(store: Arc<ExchangeStore>, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self { store, broadcaster }
    }

    /// Returns the exchange store.
    pub fn store(&self) -> &Arc<ExchangeStore> {
        &self.store
    }

    fn commit(&self, record: ExchangeRecord) {
        tracing::debug!(
            id = %record.id(),
            method = %record.method,
            path = %record.path,
            status = ?record.status_code,
            "exchange captured"
        );
        let record = self.store.append(record);
        self.broadcaster.notify_new_or_updated(record);
    }

    fn buffered(
        &self,
        mut ctx: ExchangeContext,
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
        encoding: ContentEncoding,
    ) -> Response<Body> {
        match decode_body(&body, encoding) {
            Ok(text) => {
                if let Some(meta) = ResponseMetadata::parse(&text) {
                    meta.apply_to(&mut ctx.record);
                }
                ctx.record.response_body = Some(text);
            }
            Err(e) => {
                tracing::debug!(id = %ctx.record.id(), "Response body not captured: {}", e);
            }
        }

        self.commit(ctx.complete());
        build_response(status, headers, Body::from(body))
    }

    fn streaming(
        &self,
        ctx: ExchangeContext,
        upstream: reqwest::Response,
        encoding: ContentEncoding,
    ) -> Response<Body> {
        let status = upstream.status();
        let headers = streaming_headers(upstream.headers());

        let (tx, rx) = mpsc::channel::<ChunkResult>(STREAM_CHANNEL_CAPACITY);
        let handler = self.clone();
        tokio::spawn(async move {
            handler.pump(ctx, upstream, encoding, tx).await;
        });

        let chunks = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (chunk, rx))
        });
        build_response(status, headers, Body::from_stream(chunks))
    }

    /// Copies upstream chunks to the client and parses them as they pass.
    async fn pump(
        &self,
        mut ctx: ExchangeContext,
        upstream: reqwest::Response,
        encoding: ContentEncoding,
        tx: mpsc::Sender<ChunkResult>,
    ) {
        let mut chunks = upstream.bytes_stream();
        let mut capture = StreamCapture::new(encoding);

        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(bytes) => {
                    if tx.send(Ok(bytes.clone())).await.is_err() {
                        tracing::debug!(id = %ctx.record.id(), "Client disconnected, exchange dropped");
                        return;
                    }
                    let elapsed = ctx.elapsed();
                    capture.feed(&bytes, &mut ctx.record, elapsed);
                }
                Err(e) => {
                    tracing::warn!(id = %ctx.record.id(), "Upstream stream failed: {}", e);
                    let _ = tx.send(Err(std::io::Error::other(e.to_string()))).await;
                    break;
                }
            }
        }

        let elapsed = ctx.elapsed();
        capture.finish(&mut ctx.record, elapsed);
        self.commit(ctx.complete());
        drop(tx);
    }
}

#[async_trait]
impl ExchangeHook for CaptureHandler {
    type Context = ExchangeContext;

    async fn on_request(&self, req: &mut Request<Body>) -> Option<ExchangeContext> {
        let path = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| req.uri().path().to_string());

        let mut ctx = ExchangeContext::new(ExchangeRecord::new(req.method().as_str(), path));
        ctx.record.request_headers = redact_headers(req.headers());

        if let Some(body) = BufferedBody::capture(req).await {
            let text = body.text();
            if let Some(meta) = RequestMetadata::parse(&text) {
                meta.apply_to(&mut ctx.record);
            }
            ctx.record.request_body = Some(text);
        }

        tracing::debug!(
            id = %ctx.record.id(),
            method = %ctx.record.method,
            path = %ctx.record.path,
            model = ?ctx.record.model,
            "request captured"
        );
        Some(ctx)
    }

    async fn on_response(
        &self,
        ctx: Option<ExchangeContext>,
        upstream: reqwest::Response,
    ) -> Response<Body> {
        let status = upstream.status();

        let Some(mut ctx) = ctx else {
            tracing::debug!(status = status.as_u16(), "Response without captured request");
            self.commit(ExchangeRecord::orphan(status.as_u16(), Duration::ZERO));
            let headers = forwardable_headers(upstream.headers());
            return build_response(status, headers, Body::from_stream(upstream.bytes_stream()));
        };

        ctx.record.status_code = Some(status.as_u16());
        ctx.record.response_headers = copy_headers(upstream.headers());

        let encoding = ContentEncoding::from_header(
            upstream
                .headers()
                .get(CONTENT_ENCODING)
                .and_then(|v| v.to_str().ok()),
        );

        if is_event_stream(upstream.headers()) {
            return self.streaming(ctx, upstream, encoding);
        }

        let headers = forwardable_headers(upstream.headers());
        match upstream.bytes().await {
            Ok(body) => self.buffered(ctx, status, headers, body, encoding),
            Err(e) => {
                tracing::warn!(id = %ctx.record.id(), "Failed to read upstream body: {}", e);
                ctx.record.status_code = Some(StatusCode::BAD_GATEWAY.as_u16());
                self.commit(ctx.complete());
                build_response(StatusCode::BAD_GATEWAY, HeaderMap::new(), Body::empty())
            }
        }
    }

    async fn on_upstream_error(&self, ctx: Option<ExchangeContext>, status: StatusCode) {
        let record = match ctx {
            Some(mut ctx) => {
                ctx.record.status_code = Some(status.as_u16());
                ctx.complete()
            }
            None => ExchangeRecord::orphan(status.as_u16(), Duration::ZERO),
        };
        self.commit(record);
    }
}

/// Incremental parse state of one event stream.
struct StreamCapture {
    /// `None` once decoding has failed; forwarding continues regardless.
    decoder: Option<StreamDecoder>,
    lines: LineSplitter,
    parser: SseParser,
}

impl StreamCapture {
    fn new(encoding: ContentEncoding) -> Self {
        Self {
            decoder: Some(StreamDecoder::new(encoding)),
            lines: LineSplitter::new(),
            parser: SseParser::new(),
        }
    }

    fn feed(&mut self, chunk: &[u8], record: &mut ExchangeRecord, elapsed: Duration) {
        let Some(decoder) = self.decoder.as_mut() else {
            return;
        };

        let decoded = match decoder.decode(chunk) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::debug!(id = %record.id(), "Stream parsing disabled: {}", e);
                self.decoder = None;
                return;
            }
        };

        for line in self.lines.push(&decoded) {
            self.parser.process_line(&line, record, elapsed);
        }
    }

    fn finish(&mut self, record: &mut ExchangeRecord, elapsed: Duration) {
        if self.decoder.is_none() {
            return;
        }
        if let Some(line) = self.lines.finish() {
            self.parser.process_line(&line, record, elapsed);
        }
    }
}

fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains(EVENT_STREAM))
}

/// Event-stream response headers: fixed content type and cache policy first,
/// then every other upstream header.
fn streaming_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len() + 2);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(EVENT_STREAM));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

    for (name, value) in upstream {
        if name == CONTENT_TYPE || name == CACHE_CONTROL || is_hop_by_hop(name) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

fn build_response(status: StatusCode, headers: HeaderMap, body: Body) -> Response<Body> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
