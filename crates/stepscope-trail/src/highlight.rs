//! Highlight level computation over the current trail.

use serde::{Deserialize, Serialize};
use stepscope_core::FlowGraph;
use stepscope_render::{EdgeIndex, NodeResolver, RenderedArtifact};
use tracing::debug;

use crate::animation::TransitionPlan;
use crate::trail::{Trail, TrailAdvance, DEFAULT_TRAIL_LEN};

/// Intensity applied to the trail head.
pub const HEAD_INTENSITY: f32 = 1.0;
/// Intensity applied to the entry right behind the head; also the level the
/// animation demotes to.
pub const MID_INTENSITY: f32 = 0.6;

/// Highlight intensity for a trail position (0 = head). Strictly decreasing
/// with position, so older entries always read weaker.
pub fn intensity_at(position: usize) -> f32 {
    HEAD_INTENSITY * MID_INTENSITY.powi(position as i32)
}

/// One restyle operation against an artifact element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighlightOp {
    /// Backend element id to restyle.
    pub element_id: String,
    /// Highlight intensity in `(0.0, 1.0]`.
    pub intensity: f32,
}

impl HighlightOp {
    /// Convenience constructor.
    pub fn new(element_id: impl Into<String>, intensity: f32) -> Self {
        Self {
            element_id: element_id.into(),
            intensity,
        }
    }
}

/// A computed set of restyles plus elements to clear outright.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HighlightBatch {
    /// Elements to restyle with their intensity.
    pub ops: Vec<HighlightOp>,
    /// Elements whose highlight must be removed.
    pub cleared: Vec<String>,
}

/// Receiver of highlight operations — whatever owns the visual artifact.
pub trait HighlightSink {
    /// Apply restyle operations.
    fn apply(&mut self, ops: &[HighlightOp]);
    /// Remove any highlight from the given elements.
    fn clear(&mut self, element_ids: &[String]);
}

/// Outcome of advancing the trail against the current artifact.
#[derive(Debug)]
pub enum Advance {
    /// The trail moved; apply the batch (and optionally animate).
    Applied {
        batch: HighlightBatch,
        transition: Option<TransitionPlan>,
    },
    /// The node already is the head; nothing to do.
    DuplicateHead,
    /// The node is not in the current artifact but belongs to a known
    /// subgraph; the caller must switch the view and retry.
    NeedsViewSwitch { subgraph: String },
    /// The node resolved nowhere and has no known subgraph; a final miss.
    Unresolved,
}

/// Computes highlight batches as the trail advances.
///
/// The highlighter never switches views itself: when the advanced node is
/// missing from the artifact it reports `NeedsViewSwitch` and leaves the
/// trail untouched, so the caller can re-render and retry the same node.
#[derive(Debug)]
pub struct TrailHighlighter {
    trail: Trail,
}

impl Default for TrailHighlighter {
    fn default() -> Self {
        Self::new(DEFAULT_TRAIL_LEN)
    }
}

impl TrailHighlighter {
    /// Highlighter with the given trail capacity.
    pub fn new(trail_len: usize) -> Self {
        Self {
            trail: Trail::with_capacity(trail_len),
        }
    }

    /// Read access to the trail.
    pub fn trail(&self) -> &Trail {
        &self.trail
    }

    /// Reconfigure the trail capacity; evicted entries are reported so the
    /// caller can clear their highlight.
    pub fn set_trail_length(&mut self, len: usize) -> Vec<String> {
        self.trail.set_capacity(len)
    }

    /// Forget the whole trail (mode switch).
    pub fn clear(&mut self) {
        self.trail.clear();
    }

    /// Advance to `node_id` and compute the resulting highlight batch.
    pub fn advance(
        &mut self,
        graph: &FlowGraph,
        artifact: &RenderedArtifact,
        edges: &EdgeIndex,
        resolver: &NodeResolver,
        node_id: &str,
    ) -> Advance {
        if self.trail.head() == Some(node_id) {
            return Advance::DuplicateHead;
        }

        if resolver.resolve(artifact, node_id).is_none() {
            return match graph.subgraph_of(node_id) {
                Some(subgraph) => Advance::NeedsViewSwitch {
                    subgraph: subgraph.to_string(),
                },
                None => Advance::Unresolved,
            };
        }

        let prev_head = self.trail.head().map(|s| s.to_string());
        let evicted = match self.trail.advance(node_id) {
            TrailAdvance::Advanced { evicted } => evicted,
            TrailAdvance::DuplicateHead => return Advance::DuplicateHead,
        };

        let batch = self.compute_batch(artifact, edges, resolver, evicted.as_deref());
        let transition =
            self.plan_transition(artifact, edges, resolver, prev_head.as_deref(), evicted);

        Advance::Applied { batch, transition }
    }

    /// Recompute the full batch for the current trail, e.g. after a view
    /// switch re-rendered the artifact underneath an unchanged trail.
    pub fn recompute(
        &self,
        artifact: &RenderedArtifact,
        edges: &EdgeIndex,
        resolver: &NodeResolver,
    ) -> HighlightBatch {
        self.compute_batch(artifact, edges, resolver, None)
    }

    fn compute_batch(
        &self,
        artifact: &RenderedArtifact,
        edges: &EdgeIndex,
        resolver: &NodeResolver,
        evicted: Option<&str>,
    ) -> HighlightBatch {
        let mut batch = HighlightBatch::default();

        let entries: Vec<&str> = self.trail.iter().collect();
        for (position, node) in entries.iter().enumerate() {
            if let Some(element) = resolver.resolve(artifact, node) {
                batch
                    .ops
                    .push(HighlightOp::new(element.id.clone(), intensity_at(position)));
            } else {
                // The entry lives in a different subgraph than the current
                // view; it keeps its place in the trail regardless.
                debug!(node, "trail entry not present in current artifact");
            }
            if position + 1 < entries.len() {
                // Edge between this entry and the next-older one, styled at
                // the newer endpoint's intensity.
                if let Some(edge) =
                    find_edge(edges, resolver, artifact, entries[position + 1], node)
                {
                    batch.ops.push(HighlightOp::new(edge, intensity_at(position)));
                }
            }
        }

        if let Some(evicted) = evicted {
            if let Some(element) = resolver.resolve(artifact, evicted) {
                batch.cleared.push(element.id.clone());
            }
            if let Some(tail) = self.trail.tail() {
                if let Some(edge) = find_edge(edges, resolver, artifact, evicted, tail) {
                    batch.cleared.push(edge);
                }
            }
        }

        batch
    }

    fn plan_transition(
        &self,
        artifact: &RenderedArtifact,
        edges: &EdgeIndex,
        resolver: &NodeResolver,
        prev_head: Option<&str>,
        evicted: Option<String>,
    ) -> Option<TransitionPlan> {
        let prev_head = prev_head?;
        let new_head = self.trail.head()?;
        let new_node = resolver.resolve(artifact, new_head)?.id.clone();
        let prev_node = resolver.resolve(artifact, prev_head).map(|e| e.id.clone());
        let connecting_edge = find_edge(edges, resolver, artifact, prev_head, new_head);

        // Edge feeding into the previous head, demoted in phase four.
        let prev_incoming_edge = self
            .trail
            .get(2)
            .and_then(|older| find_edge(edges, resolver, artifact, older, prev_head));

        let entries: Vec<&str> = self.trail.iter().collect();
        let trail_edges: Vec<String> = entries
            .windows(2)
            .filter_map(|pair| find_edge(edges, resolver, artifact, pair[1], pair[0]))
            .collect();

        let evicted_node = evicted
            .as_deref()
            .and_then(|node| resolver.resolve(artifact, node))
            .map(|e| e.id.clone());
        let evicted_edge = evicted.as_deref().and_then(|node| {
            let tail = self.trail.tail()?;
            find_edge(edges, resolver, artifact, node, tail)
        });

        Some(TransitionPlan {
            new_node,
            connecting_edge,
            prev_node,
            prev_incoming_edge,
            trail_edges,
            evicted_node,
            evicted_edge,
        })
    }
}

/// Look up the connector for a directed logical pair, falling back to the
/// resolved element ids when the index was built from geometry.
fn find_edge(
    edges: &EdgeIndex,
    resolver: &NodeResolver,
    artifact: &RenderedArtifact,
    from: &str,
    to: &str,
) -> Option<String> {
    if let Some(edge) = edges.edge_between(from, to) {
        return Some(edge.to_string());
    }
    let from_element = resolver.resolve(artifact, from)?;
    let to_element = resolver.resolve(artifact, to)?;
    edges
        .edge_between(&from_element.id, &to_element.id)
        .map(|s| s.to_string())
}
