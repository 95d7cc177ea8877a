//! Error types for capture-side processing.

use thiserror::Error;

/// Errors raised while analysing captured traffic.
///
/// None of these ever reach the proxied client: the capture pipeline logs
/// them and leaves the affected record fields unset.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Response body could not be decompressed.
    #[error("failed to decode {encoding} body: {source}")]
    Decode {
        /// The declared content encoding.
        encoding: &'static str,
        /// Underlying decompression error.
        #[source]
        source: std::io::Error,
    },
}

/// Result type for capture operations.
pub type Result<T> = std::result::Result<T, CaptureError>;
