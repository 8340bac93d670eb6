//! Error types for the stream layer.

use thiserror::Error;

/// Result type for stream operations.
pub type StreamResult<T> = Result<T, StreamError>;

/// Errors that can occur while connecting to or consuming event sources.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Could not establish a connection to the event source.
    #[error("failed to connect to {url}: {message}")]
    Connect { url: String, message: String },

    /// HTTP transport error during polling or history fetches.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket transport error on the push channel.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A frame or response failed to decode.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}
