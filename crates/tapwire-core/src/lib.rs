//! Tapwire Core - capture model, metadata extraction, and record stores.
//!
//! This crate holds everything that is independent of the network layer:
//!
//! - [`models`]: exchange records, stream events, lifecycle events
//! - [`headers`]: header copying with credential redaction
//! - [`metadata`]: request, response and stream field extraction
//! - [`decode`]: gzip / deflate / brotli body decoding
//! - [`sse`]: server-sent event line parsing
//! - [`store`]: bounded FIFO stores
//! - [`broadcast`]: change notification seam

pub mod broadcast;
pub mod decode;
pub mod error;
pub mod headers;
pub mod metadata;
pub mod models;
pub mod sse;
pub mod store;

pub use broadcast::{Broadcaster, NoopBroadcaster};
pub use decode::{decode_body, ContentEncoding, StreamDecoder};
pub use error::{CaptureError, Result};
pub use headers::{copy_headers, redact_headers, REDACTED};
pub use metadata::{RequestMetadata, ResponseMetadata, StreamMetadata};
pub use models::{
    ExchangeRecord, HookResponse, LifecycleEvent, LifecycleSubmission, StreamEvent,
};
pub use sse::{LineSplitter, SseParser};
pub use store::{BoundedStore, ExchangeStore, Identified, LifecycleStore, DEFAULT_STORE_CAPACITY};
