//! The rendered artifact model: addressable elements with labels and geometry.
//!
//! An artifact is what the rendering backend hands back for one graph
//! description. Element identifiers are assigned by the backend and are not
//! guaranteed to equal the logical node ids, or to stay stable between
//! renders; `NodeResolver` bridges that gap.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A point in artifact coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    /// Create a point.
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Squared euclidean distance to another point.
    pub fn distance_sq(&self, other: Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }
}

/// Axis-aligned bounding box of an element.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Bounds {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Bounds {
    /// Create a bounding box.
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Center of the bounding box.
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// What kind of visual element this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    /// A step node.
    Node,
    /// A connector between two nodes.
    Connector,
}

/// One addressable element of a rendered artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactElement {
    /// Backend-assigned addressable identifier.
    pub id: String,
    /// Node or connector.
    pub kind: ElementKind,
    /// Rendered text label, if the element carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Bounding box in artifact coordinates.
    pub bounds: Bounds,
    /// Structural hint: logical id of the connector's source node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_hint: Option<String>,
    /// Structural hint: logical id of the connector's destination node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_hint: Option<String>,
    /// Sampled endpoint coordinates for connectors without structural hints.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<(Point, Point)>,
}

impl ArtifactElement {
    /// Create a node element.
    pub fn node(id: impl Into<String>, label: Option<String>, bounds: Bounds) -> Self {
        Self {
            id: id.into(),
            kind: ElementKind::Node,
            label,
            bounds,
            from_hint: None,
            to_hint: None,
            endpoints: None,
        }
    }

    /// Create a connector element with structural from/to hints.
    pub fn connector(
        id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        bounds: Bounds,
    ) -> Self {
        Self {
            id: id.into(),
            kind: ElementKind::Connector,
            label: None,
            bounds,
            from_hint: Some(from.into()),
            to_hint: Some(to.into()),
            endpoints: None,
        }
    }

    /// Create a connector element carrying only endpoint geometry.
    pub fn bare_connector(id: impl Into<String>, start: Point, end: Point) -> Self {
        let (min_x, max_x) = (start.x.min(end.x), start.x.max(end.x));
        let (min_y, max_y) = (start.y.min(end.y), start.y.max(end.y));
        Self {
            id: id.into(),
            kind: ElementKind::Connector,
            label: None,
            bounds: Bounds::new(min_x, min_y, max_x - min_x, max_y - min_y),
            from_hint: None,
            to_hint: None,
            endpoints: Some((start, end)),
        }
    }
}

/// A rendered, addressable visual representation of one graph description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenderedArtifact {
    /// The graph description this artifact was rendered from.
    pub description: String,
    /// All elements, nodes and connectors.
    elements: Vec<ArtifactElement>,
    /// Addressable-element index by backend id.
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl RenderedArtifact {
    /// Build an artifact from its elements, indexing them by id.
    pub fn new(description: impl Into<String>, elements: Vec<ArtifactElement>) -> Self {
        let index = elements
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id.clone(), i))
            .collect();
        Self {
            description: description.into(),
            elements,
            index,
        }
    }

    /// Look up an element by its exact backend id.
    pub fn element(&self, id: &str) -> Option<&ArtifactElement> {
        self.index.get(id).map(|&i| &self.elements[i])
    }

    /// All elements in render order.
    pub fn elements(&self) -> &[ArtifactElement] {
        &self.elements
    }

    /// All node elements.
    pub fn nodes(&self) -> impl Iterator<Item = &ArtifactElement> {
        self.elements
            .iter()
            .filter(|e| e.kind == ElementKind::Node)
    }

    /// All connector elements.
    pub fn connectors(&self) -> impl Iterator<Item = &ArtifactElement> {
        self.elements
            .iter()
            .filter(|e| e.kind == ElementKind::Connector)
    }

    /// Whether the artifact has no addressable elements at all.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_center() {
        let bounds = Bounds::new(10.0, 20.0, 40.0, 10.0);
        assert_eq!(bounds.center(), Point::new(30.0, 25.0));
    }

    #[test]
    fn test_artifact_index() {
        let artifact = RenderedArtifact::new(
            "node a\nnode b",
            vec![
                ArtifactElement::node("a", None, Bounds::default()),
                ArtifactElement::node("b", None, Bounds::default()),
            ],
        );

        assert!(artifact.element("a").is_some());
        assert!(artifact.element("c").is_none());
        assert_eq!(artifact.nodes().count(), 2);
        assert_eq!(artifact.connectors().count(), 0);
    }

    #[test]
    fn test_bare_connector_bounds() {
        let connector =
            ArtifactElement::bare_connector("e1", Point::new(10.0, 5.0), Point::new(2.0, 9.0));
        assert_eq!(connector.bounds, Bounds::new(2.0, 5.0, 8.0, 4.0));
        assert!(connector.from_hint.is_none());
    }
}
