//! Error types for the proxy.

use std::net::SocketAddr;

use thiserror::Error;

/// Proxy error type.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The listener could not be bound.
    #[error("Failed to bind proxy on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Upstream client error.
    #[error("Upstream error: {0}")]
    Upstream(#[from] reqwest::Error),

    /// The configured upstream is not an absolute http(s) URL.
    #[error("Invalid upstream URL '{0}'")]
    InvalidUpstream(String),
}

/// Result type for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
