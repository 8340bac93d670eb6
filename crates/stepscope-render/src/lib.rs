//! Rendered-artifact handling for Stepscope.
//!
//! This crate owns everything between a logical `FlowGraph` and the visual
//! artifact a UI styles: the textual description builder, the backend
//! contract, the bounded artifact cache, tolerant node/edge resolution, and
//! the scheduler that keeps expensive renders serialized and coalesced.

mod artifact;
mod backend;
mod cache;
mod edge_index;
mod error;
mod resolver;
mod scheduler;

pub use artifact::{ArtifactElement, Bounds, ElementKind, Point, RenderedArtifact};
pub use backend::{describe, RenderBackend, StaticBackend, END_MARKER, START_MARKER};
pub use cache::{GraphCache, DEFAULT_CACHE_CAPACITY};
pub use edge_index::EdgeIndex;
pub use error::{RenderError, RenderResult};
pub use resolver::{
    core_token, normalize_label, sanitize, MatchStrategy, NodeResolver, STRATEGY_ORDER,
};
pub use scheduler::{RenderOutcome, RenderRequest, RenderScheduler, DEFAULT_MIN_INTERVAL};
