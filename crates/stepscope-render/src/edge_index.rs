//! Directed edge lookup over a rendered artifact.
//!
//! Connectors are keyed by their `(from, to)` pair. Structural from/to hints
//! embedded by the backend are authoritative; connectors without hints fall
//! back to a geometric assignment where each sampled endpoint goes to the
//! node whose bounding-box center is nearest. The fallback is
//! O(edges × nodes), which is fine at the low hundreds of nodes these flows
//! reach.

use std::collections::HashMap;

use crate::artifact::{Point, RenderedArtifact};

/// Index of connector elements by directed `(from, to)` pair.
///
/// Hinted connectors are keyed by the logical ids in their hints; fallback
/// connectors are keyed by the element ids of their nearest nodes, so
/// callers should try both the logical pair and the resolved-element pair.
#[derive(Debug, Default)]
pub struct EdgeIndex {
    map: HashMap<(String, String), Vec<String>>,
}

impl EdgeIndex {
    /// Build the index for one artifact.
    pub fn build(artifact: &RenderedArtifact) -> Self {
        let mut map: HashMap<(String, String), Vec<String>> = HashMap::new();

        let node_centers: Vec<(&str, Point)> = artifact
            .nodes()
            .map(|e| (e.id.as_str(), e.bounds.center()))
            .collect();

        for connector in artifact.connectors() {
            match (&connector.from_hint, &connector.to_hint) {
                (Some(from), Some(to)) => {
                    map.entry((from.clone(), to.clone()))
                        .or_default()
                        .push(connector.id.clone());
                }
                _ => {
                    let Some((start, end)) = connector.endpoints else {
                        continue;
                    };
                    let (Some(from), Some(to)) =
                        (nearest_node(&node_centers, start), nearest_node(&node_centers, end))
                    else {
                        continue;
                    };
                    map.entry((from.to_string(), to.to_string()))
                        .or_default()
                        .push(connector.id.clone());
                }
            }
        }

        Self { map }
    }

    /// All connector element ids for the directed pair.
    pub fn lookup(&self, from: &str, to: &str) -> &[String] {
        self.map
            .get(&(from.to_string(), to.to_string()))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// First connector element id for the directed pair, if any.
    pub fn edge_between(&self, from: &str, to: &str) -> Option<&str> {
        self.lookup(from, to).first().map(|s| s.as_str())
    }

    /// Number of distinct directed pairs indexed.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether no connectors were indexed.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

fn nearest_node<'a>(centers: &[(&'a str, Point)], point: Point) -> Option<&'a str> {
    centers
        .iter()
        .min_by(|(_, a), (_, b)| {
            a.distance_sq(point)
                .partial_cmp(&b.distance_sq(point))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(id, _)| *id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{ArtifactElement, Bounds};

    fn node_at(id: &str, x: f32, y: f32) -> ArtifactElement {
        ArtifactElement::node(id, None, Bounds::new(x, y, 20.0, 10.0))
    }

    #[test]
    fn test_structural_hints_win() {
        let artifact = RenderedArtifact::new(
            "",
            vec![
                node_at("a", 0.0, 0.0),
                node_at("b", 100.0, 0.0),
                ArtifactElement::connector("link-0", "a", "b", Bounds::default()),
            ],
        );

        let index = EdgeIndex::build(&artifact);
        assert_eq!(index.edge_between("a", "b"), Some("link-0"));
        assert_eq!(index.edge_between("b", "a"), None);
    }

    #[test]
    fn test_geometric_fallback_assigns_nearest_centers() {
        let a = node_at("a", 0.0, 0.0); // center (10, 5)
        let b = node_at("b", 100.0, 0.0); // center (110, 5)
        let c = node_at("c", 0.0, 100.0); // center (10, 105)
        let artifact = RenderedArtifact::new(
            "",
            vec![
                a,
                b,
                c,
                ArtifactElement::bare_connector(
                    "link-0",
                    Point::new(12.0, 6.0),
                    Point::new(108.0, 4.0),
                ),
            ],
        );

        let index = EdgeIndex::build(&artifact);
        assert_eq!(index.edge_between("a", "b"), Some("link-0"));
        assert!(index.lookup("a", "c").is_empty());
    }

    #[test]
    fn test_connector_without_hints_or_endpoints_is_skipped() {
        let mut bare = ArtifactElement::bare_connector("link-0", Point::default(), Point::default());
        bare.endpoints = None;
        let artifact = RenderedArtifact::new("", vec![node_at("a", 0.0, 0.0), bare]);

        let index = EdgeIndex::build(&artifact);
        assert!(index.is_empty());
    }

    #[test]
    fn test_parallel_edges_accumulate() {
        let artifact = RenderedArtifact::new(
            "",
            vec![
                node_at("a", 0.0, 0.0),
                node_at("b", 100.0, 0.0),
                ArtifactElement::connector("link-0", "a", "b", Bounds::default()),
                ArtifactElement::connector("link-1", "a", "b", Bounds::default()),
            ],
        );

        let index = EdgeIndex::build(&artifact);
        assert_eq!(index.lookup("a", "b"), ["link-0", "link-1"]);
    }
}
