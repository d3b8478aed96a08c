//! Conversion between the flat stored node list and the canvas graph.
//!
//! Visual records carry data only. Interaction is expressed by the
//! `EditorIntent` values the canvas emits, never by handlers stored here.

use super::graph::{EdgeId, NodeId, NodeKind, StoryNode};

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CanvasPos {
    pub x: f32,
    pub y: f32,
}

impl CanvasPos {
    pub fn new(x: f32, y: f32) -> Self { Self { x, y } }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EdgeStyle {
    Step,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VisualNode {
    pub id: NodeId,
    pub title: String,
    pub body: String,
    pub kind: NodeKind,
    pub is_root: bool,
    pub position: CanvasPos,
    // stored label; only meaningful while an incoming edge exists
    pub link_text: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VisualEdge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    pub label: String,
    pub style: EdgeStyle,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct VisualGraph {
    pub nodes: Vec<VisualNode>,
    pub edges: Vec<VisualEdge>,
}

impl VisualGraph {
    pub fn node(&self, id: NodeId) -> Option<&VisualNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// The incoming edge of `target`, if any.
    pub fn edge_into(&self, target: NodeId) -> Option<&VisualEdge> {
        self.edges.iter().find(|e| e.target == target)
    }
}

pub fn to_visual<'a>(nodes: impl IntoIterator<Item = &'a StoryNode>) -> VisualGraph {
    let mut graph = VisualGraph::default();
    for n in nodes {
        graph.nodes.push(VisualNode {
            id: n.id,
            title: n.title_text.clone(),
            body: n.body_text.clone(),
            kind: n.kind,
            is_root: n.parent_node_id.is_none(),
            position: CanvasPos::new(n.editor_position_x, n.editor_position_y),
            link_text: n.parent_node_link_text.clone(),
        });
        if let (Some(parent), Some(id)) = (n.parent_node_id, n.edge_id()) {
            graph.edges.push(VisualEdge {
                id,
                source: parent,
                target: n.id,
                label: n.parent_node_link_text.clone(),
                style: EdgeStyle::Step,
            });
        }
    }
    graph
}

/// Project a canvas graph back to stored records. Parent and link text come
/// from each node's incoming edge; a node without one keeps its own label.
pub fn from_visual(graph: &VisualGraph) -> Vec<StoryNode> {
    graph
        .nodes
        .iter()
        .map(|v| {
            let incoming = graph.edge_into(v.id);
            StoryNode {
                id: v.id,
                title_text: v.title.clone(),
                body_text: v.body.clone(),
                kind: v.kind,
                parent_node_id: incoming.map(|e| e.source),
                parent_node_link_text: incoming.map_or_else(|| v.link_text.clone(), |e| e.label.clone()),
                editor_position_x: v.position.x,
                editor_position_y: v.position.y,
            }
        })
        .collect()
}

pub fn from_canvas_drop(kind: NodeKind, position: CanvasPos) -> StoryNode {
    StoryNode::new(kind, position.x, position.y)
}
