//! Tolerant resolution of logical node ids to artifact elements.
//!
//! Backend-assigned element ids are not stable across renders, so lookup
//! falls through an explicit, ordered list of matching strategies. The order
//! is a documented contract: exact id, sanitized suffix, core token, visible
//! label. Resolution stops at the first hit.

use std::collections::HashSet;

use stepscope_core::RenderKind;
use tracing::warn;

use crate::artifact::{ArtifactElement, ElementKind, RenderedArtifact};

/// One strategy in the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    /// Exact match against the artifact's addressable-element index.
    Exact,
    /// Suffix match between sanitized element id and sanitized node id.
    SanitizedSuffix,
    /// Element id with its structural prefix and trailing sequence number
    /// stripped equals the node id.
    CoreToken,
    /// Normalized rendered label equals the normalized node id.
    VisibleLabel,
}

/// The fallback chain, in the order strategies are attempted.
pub const STRATEGY_ORDER: [MatchStrategy; 4] = [
    MatchStrategy::Exact,
    MatchStrategy::SanitizedSuffix,
    MatchStrategy::CoreToken,
    MatchStrategy::VisibleLabel,
];

/// Strip every non-alphanumeric character.
pub fn sanitize(input: &str) -> String {
    input.chars().filter(|c| c.is_alphanumeric()).collect()
}

/// Reduce a backend element id to its logical core: drop a trailing
/// all-digit sequence segment, then drop the structural prefix segment.
/// `flowchart-parse-12` becomes `parse`.
pub fn core_token(input: &str) -> String {
    let mut segments: Vec<&str> = input.split('-').collect();
    if segments.len() > 1 && segments.last().is_some_and(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())) {
        segments.pop();
    }
    if segments.len() > 1 {
        segments.remove(0);
    }
    segments.join("-")
}

/// Normalize visible text: lower-case, separator runs collapsed to one space.
pub fn normalize_label(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_space = false;
    for c in input.chars() {
        if c.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.extend(c.to_lowercase());
        } else {
            pending_space = true;
        }
    }
    out
}

/// Resolves logical node ids against rendered artifacts.
///
/// Also tracks resolution misses so each `(kind, node_id)` pair is logged at
/// most once instead of flooding the log on every event.
#[derive(Debug, Default)]
pub struct NodeResolver {
    missed: HashSet<(RenderKind, String)>,
}

impl NodeResolver {
    /// Create a resolver with an empty miss log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Find the artifact element for a logical node id, trying each strategy
    /// in `STRATEGY_ORDER` and stopping at the first hit.
    pub fn resolve<'a>(
        &self,
        artifact: &'a RenderedArtifact,
        node_id: &str,
    ) -> Option<&'a ArtifactElement> {
        self.resolve_with(artifact, node_id).map(|(element, _)| element)
    }

    /// Like [`resolve`](Self::resolve) but also reports which strategy hit.
    pub fn resolve_with<'a>(
        &self,
        artifact: &'a RenderedArtifact,
        node_id: &str,
    ) -> Option<(&'a ArtifactElement, MatchStrategy)> {
        for strategy in STRATEGY_ORDER {
            let hit = match strategy {
                MatchStrategy::Exact => artifact
                    .element(node_id)
                    .filter(|e| e.kind == ElementKind::Node),
                MatchStrategy::SanitizedSuffix => {
                    let want = sanitize(node_id);
                    if want.is_empty() {
                        None
                    } else {
                        artifact.nodes().find(|e| sanitize(&e.id).ends_with(&want))
                    }
                }
                MatchStrategy::CoreToken => {
                    artifact.nodes().find(|e| core_token(&e.id) == node_id)
                }
                MatchStrategy::VisibleLabel => {
                    let want = normalize_label(node_id);
                    if want.is_empty() {
                        None
                    } else {
                        artifact.nodes().find(|e| {
                            e.label.as_deref().map(normalize_label) == Some(want.clone())
                        })
                    }
                }
            };
            if let Some(element) = hit {
                return Some((element, strategy));
            }
        }
        None
    }

    /// Record a final resolution miss. Logs the first occurrence per
    /// `(kind, node_id)` pair; repeats are silent no-ops.
    pub fn note_miss(&mut self, kind: RenderKind, node_id: &str) {
        if self.missed.insert((kind, node_id.to_string())) {
            warn!(kind = kind.label(), node_id, "node not resolvable in artifact");
        }
    }
}
