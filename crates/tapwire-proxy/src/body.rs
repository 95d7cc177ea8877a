//! Request body buffering.
//!
//! The body of an intercepted request is read once for inspection and then
//! put back as an in-memory body so it can still be forwarded.

use axum::body::{to_bytes, Body};
use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::Request;

/// A fully buffered request body.
#[derive(Debug, Clone)]
pub struct BufferedBody {
    bytes: Bytes,
}

impl BufferedBody {
    /// Buffers the request body when one is plausibly present (a non-zero
    /// `content-length` or any `content-type`).
    ///
    /// On success the request keeps an equivalent, re-readable body. A read
    /// failure is logged and leaves the request with an empty body and no
    /// `content-length`.
    pub async fn capture(req: &mut Request<Body>) -> Option<Self> {
        if !has_body(req) {
            return None;
        }

        let body = std::mem::take(req.body_mut());
        match to_bytes(body, usize::MAX).await {
            Ok(bytes) => {
                *req.body_mut() = Body::from(bytes.clone());
                Some(Self { bytes })
            }
            Err(e) => {
                tracing::warn!("Failed to read request body: {}", e);
                // The body left behind is empty.
                req.headers_mut().remove(CONTENT_LENGTH);
                None
            }
        }
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Body as text; invalid UTF-8 is replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

fn has_body<B>(req: &Request<B>) -> bool {
    let declared_len = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(0);

    declared_len > 0 || req.headers().contains_key(CONTENT_TYPE)
}
