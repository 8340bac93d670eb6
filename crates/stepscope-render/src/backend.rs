//! The rendering backend contract and the textual description builder.
//!
//! The backend consumes a textual graph description plus a `CacheKey` and
//! returns a `RenderedArtifact`. The real backend lives outside this
//! workspace; `StaticBackend` is a deterministic in-process stand-in used by
//! the CLI and by tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use stepscope_core::{CacheKey, FlowGraph, RenderKind};

use crate::artifact::{ArtifactElement, Bounds, Point, RenderedArtifact};
use crate::error::{RenderError, RenderResult};

/// Synthetic id of the process start marker node.
pub const START_MARKER: &str = "__start__";
/// Synthetic id of the process end marker node.
pub const END_MARKER: &str = "__end__";

/// External rendering backend contract.
#[async_trait]
pub trait RenderBackend: Send + Sync {
    /// Render a textual graph description into an addressable artifact.
    async fn render(&self, description: &str, key: &CacheKey) -> RenderResult<RenderedArtifact>;
}

/// Build the textual graph description for a render key.
///
/// The format is line-oriented and tab-separated:
/// `node\t<id>\t<label>` and `edge\t<from>\t<to>`. Node order is
/// deterministic: breadth-first from the start marker when one exists,
/// declaration order otherwise, so equal inputs hash equal.
pub fn describe(graph: &FlowGraph, key: &CacheKey) -> RenderResult<String> {
    let selected: Vec<&str> = match key.kind {
        RenderKind::Process => ordered_node_ids(graph),
        RenderKind::Overview => {
            return Ok(describe_overview(graph, key));
        }
        RenderKind::Subgraph | RenderKind::CurrentSubgraph => {
            let name = key.subgraph.as_deref().ok_or(RenderError::MissingSubgraph {
                kind: key.kind.label(),
            })?;
            let nodes = graph.subgraph_nodes(name);
            if nodes.is_empty() {
                return Err(RenderError::UnknownSubgraph { name: name.into() });
            }
            nodes
        }
    };

    let mut lines = Vec::new();
    for id in &selected {
        if hidden_marker(id, key) {
            continue;
        }
        let label = match graph.node(id) {
            Some(node) if key.options.show_labels => node.label.clone(),
            _ => (*id).to_string(),
        };
        lines.push(format!("node\t{id}\t{label}"));
    }

    for edge in &graph.edges {
        let in_scope = selected.contains(&edge.from.as_str())
            && selected.contains(&edge.to.as_str())
            && !hidden_marker(&edge.from, key)
            && !hidden_marker(&edge.to, key);
        if in_scope {
            lines.push(format!("edge\t{}\t{}", edge.from, edge.to));
        }
    }

    Ok(lines.join("\n"))
}

fn hidden_marker(id: &str, key: &CacheKey) -> bool {
    (key.options.hide_start && id == START_MARKER) || (key.options.hide_end && id == END_MARKER)
}

/// Node ids in a deterministic layout order.
fn ordered_node_ids(graph: &FlowGraph) -> Vec<&str> {
    if graph.node(START_MARKER).is_some() {
        let reached = graph.reachable_from(START_MARKER);
        let mut ordered: Vec<&str> = reached
            .iter()
            .filter_map(|id| graph.node(id).map(|n| n.id.as_str()))
            .collect();
        for node in &graph.nodes {
            if !reached.iter().any(|r| r == &node.id) {
                ordered.push(node.id.as_str());
            }
        }
        ordered
    } else {
        graph.nodes.iter().map(|n| n.id.as_str()).collect()
    }
}

/// Condensed description: one node per subgraph, untagged nodes kept as-is,
/// edges collapsed to the clusters they connect.
fn describe_overview(graph: &FlowGraph, key: &CacheKey) -> String {
    let mut lines = Vec::new();

    for name in graph.subgraph_names() {
        lines.push(format!("node\t{name}\t{name}"));
    }
    for node in graph.nodes.iter().filter(|n| n.subgraph.is_none()) {
        if hidden_marker(&node.id, key) {
            continue;
        }
        let label = if key.options.show_labels {
            node.label.clone()
        } else {
            node.id.clone()
        };
        lines.push(format!("node\t{}\t{}", node.id, label));
    }

    let cluster = |id: &str| -> Option<String> {
        match graph.subgraph_of(id) {
            Some(sg) => Some(sg.to_string()),
            None if graph.node(id).is_some() && !hidden_marker(id, key) => Some(id.to_string()),
            None => None,
        }
    };

    let mut seen = std::collections::HashSet::new();
    for edge in &graph.edges {
        if let (Some(from), Some(to)) = (cluster(&edge.from), cluster(&edge.to)) {
            if from != to && seen.insert((from.clone(), to.clone())) {
                lines.push(format!("edge\t{from}\t{to}"));
            }
        }
    }

    lines.join("\n")
}

// =============================================================================
// Static Backend
// =============================================================================

/// Deterministic in-process rendering backend.
///
/// Lays nodes out on a fixed grid in description order. No layout quality is
/// attempted; the point is a stable, addressable artifact for headless use.
pub struct StaticBackend {
    /// Decorate element ids the way external renderers do
    /// (`flowchart-<id>-<n>`), exercising the resolver fallback chain.
    decorate_ids: bool,
    /// Emit structural from/to hints on connectors. When off, connectors
    /// carry only endpoint geometry.
    structural_hints: bool,
    /// Grid width in nodes.
    columns: usize,
    /// Artificial render latency, for cache single-flight behavior.
    delay: Option<Duration>,
    calls: AtomicUsize,
}

const CELL_WIDTH: f32 = 160.0;
const CELL_HEIGHT: f32 = 80.0;
const NODE_WIDTH: f32 = 120.0;
const NODE_HEIGHT: f32 = 40.0;

impl Default for StaticBackend {
    fn default() -> Self {
        Self {
            decorate_ids: false,
            structural_hints: true,
            columns: 4,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }
}

impl StaticBackend {
    /// Plain backend: element ids equal logical ids, hints present.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decorate element ids like an external renderer would.
    pub fn with_decorated_ids(mut self) -> Self {
        self.decorate_ids = true;
        self
    }

    /// Drop structural hints so connectors only carry geometry.
    pub fn without_structural_hints(mut self) -> Self {
        self.structural_hints = false;
        self
    }

    /// Sleep this long inside every render call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of render calls served so far.
    pub fn render_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn element_id(&self, logical: &str, ordinal: usize) -> String {
        if self.decorate_ids {
            format!("flowchart-{logical}-{ordinal}")
        } else {
            logical.to_string()
        }
    }
}

#[async_trait]
impl RenderBackend for StaticBackend {
    async fn render(&self, description: &str, key: &CacheKey) -> RenderResult<RenderedArtifact> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut elements = Vec::new();
        let mut centers: Vec<(String, Point)> = Vec::new();

        let mut node_ordinal = 0usize;
        let mut link_ordinal = 0usize;
        for line in description.lines() {
            let mut parts = line.split('\t');
            match parts.next() {
                Some("node") => {
                    let (Some(id), Some(label)) = (parts.next(), parts.next()) else {
                        continue;
                    };
                    let col = node_ordinal % self.columns;
                    let row = node_ordinal / self.columns;
                    let bounds = Bounds::new(
                        col as f32 * CELL_WIDTH,
                        row as f32 * CELL_HEIGHT,
                        NODE_WIDTH,
                        NODE_HEIGHT,
                    );
                    centers.push((id.to_string(), bounds.center()));
                    elements.push(ArtifactElement::node(
                        self.element_id(id, node_ordinal),
                        Some(label.to_string()),
                        bounds,
                    ));
                    node_ordinal += 1;
                }
                Some("edge") => {
                    let (Some(from), Some(to)) = (parts.next(), parts.next()) else {
                        continue;
                    };
                    let start = centers
                        .iter()
                        .find(|(id, _)| id == from)
                        .map(|(_, c)| *c)
                        .unwrap_or_default();
                    let end = centers
                        .iter()
                        .find(|(id, _)| id == to)
                        .map(|(_, c)| *c)
                        .unwrap_or_default();

                    let id = format!("link-{link_ordinal}");
                    link_ordinal += 1;
                    if self.structural_hints {
                        let mut connector = ArtifactElement::connector(
                            id,
                            from,
                            to,
                            Bounds::new(
                                start.x.min(end.x),
                                start.y.min(end.y),
                                (start.x - end.x).abs(),
                                (start.y - end.y).abs(),
                            ),
                        );
                        connector.endpoints = Some((start, end));
                        elements.push(connector);
                    } else {
                        elements.push(ArtifactElement::bare_connector(id, start, end));
                    }
                }
                _ => {}
            }
        }

        if elements.is_empty() {
            return Err(RenderError::EmptyArtifact { key: key.clone() });
        }

        Ok(RenderedArtifact::new(description, elements))
    }
}
