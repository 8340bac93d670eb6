//! Error types for the render layer.

use stepscope_core::CacheKey;
use thiserror::Error;

/// Result type for render operations.
pub type RenderResult<T> = Result<T, RenderError>;

/// Errors that can occur while describing, rendering, or caching artifacts.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The rendering backend rejected or failed a render request.
    #[error("render backend failed for {key:?}: {message}")]
    BackendFailed { key: CacheKey, message: String },

    /// The backend returned an artifact with no addressable elements.
    #[error("render backend returned an empty artifact for {key:?}")]
    EmptyArtifact { key: CacheKey },

    /// A subgraph-parameterized render named a subgraph the flow does not have.
    #[error("unknown subgraph: {name}")]
    UnknownSubgraph { name: String },

    /// A subgraph-parameterized render key is missing its subgraph parameter.
    #[error("render kind {kind} requires a subgraph parameter")]
    MissingSubgraph { kind: &'static str },

    /// A render shared over the single-flight channel failed for the first caller.
    #[error("shared render failed: {message}")]
    SharedRenderFailed { message: String },

    /// The scheduler worker is gone and can no longer accept requests.
    #[error("render scheduler is shut down")]
    SchedulerClosed,

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
