use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Basic type aliases for clarity
pub type NodeId = Uuid;
pub type GameId = Uuid;
pub type UserId = String;

/// Length of the hyphenated text form of a [`NodeId`].
pub const NODE_ID_LEN: usize = 36;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Start,
    Standard,
    Win,
    Lose,
}

impl NodeKind {
    pub const ALL: [NodeKind; 4] = [NodeKind::Start, NodeKind::Standard, NodeKind::Win, NodeKind::Lose];

    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Start => "Start",
            NodeKind::Standard => "Standard",
            NodeKind::Win => "Win",
            NodeKind::Lose => "Lose",
        }
    }

    /// Win and Lose end a play session.
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeKind::Win | NodeKind::Lose)
    }

    /// Canvas offers an incoming-link handle.
    pub fn accepts_parent(self) -> bool { self != NodeKind::Start }

    /// Canvas offers an outgoing-link handle.
    pub fn offers_branches(self) -> bool { !self.is_terminal() }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown node kind: {}", s))
    }
}

/// One narrative beat. Field names follow the stored record shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryNode {
    pub id: NodeId,
    pub title_text: String,
    pub body_text: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub parent_node_id: Option<NodeId>,
    #[serde(default)]
    pub parent_node_link_text: String,
    pub editor_position_x: f32,
    pub editor_position_y: f32,
}

impl StoryNode {
    pub fn new(kind: NodeKind, x: f32, y: f32) -> Self {
        Self {
            id: Uuid::now_v7(),
            title_text: String::new(),
            body_text: String::new(),
            kind,
            parent_node_id: None,
            parent_node_link_text: String::new(),
            editor_position_x: x,
            editor_position_y: y,
        }
    }

    pub fn is_root(&self) -> bool { self.parent_node_id.is_none() }

    /// Id of the edge from this node's parent to this node, if it has a parent.
    pub fn edge_id(&self) -> Option<EdgeId> {
        self.parent_node_id.map(|parent| EdgeId::between(self.id, parent))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryGame {
    pub id: GameId,
    pub name: String,
    pub description: String,
    pub is_public: bool,
    pub author_id: UserId,
    #[serde(default)]
    pub nodes: Vec<StoryNode>,
}

/// Derived identity of a parent link: `"{nodeId}-{parentId}"`.
///
/// The owning (child) node comes first so the first 36 characters always
/// decode back to it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeId(String);

impl EdgeId {
    pub fn between(node: NodeId, parent: NodeId) -> Self {
        EdgeId(format!("{}-{}", node.hyphenated(), parent.hyphenated()))
    }

    pub fn owner(&self) -> Option<NodeId> {
        self.0.get(..NODE_ID_LEN).and_then(|s| Uuid::parse_str(s).ok())
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl From<String> for EdgeId {
    fn from(s: String) -> Self { EdgeId(s) }
}

impl From<&str> for EdgeId {
    fn from(s: &str) -> Self { EdgeId(s.to_string()) }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a parent link was refused.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LinkRefusal {
    UnknownNode(NodeId),
    Cycle,
}

/// In-memory arena of a game's nodes keyed by id. Parent links are plain ids,
/// so the tree never holds references to itself.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StoryGraph {
    pub nodes: HashMap<NodeId, StoryNode>,
}

impl StoryGraph {
    // Instantiate a new, empty graph
    pub fn new() -> Self {
        StoryGraph { nodes: HashMap::new() }
    }

    pub fn from_nodes(nodes: impl IntoIterator<Item = StoryNode>) -> Self {
        StoryGraph { nodes: nodes.into_iter().map(|n| (n.id, n)).collect() }
    }

    /// Flat list in id order. Ids are time-ordered, so this is creation order
    /// for nodes made by the editor.
    pub fn to_nodes(&self) -> Vec<StoryNode> {
        let mut out: Vec<StoryNode> = self.nodes.values().cloned().collect();
        out.sort_by_key(|n| n.id);
        out
    }

    pub fn insert(&mut self, node: StoryNode) -> NodeId {
        let id = node.id;
        self.nodes.insert(id, node);
        id
    }

    pub fn get_node(&self, id: NodeId) -> Option<&StoryNode> { self.nodes.get(&id) }
    pub fn contains(&self, id: NodeId) -> bool { self.nodes.contains_key(&id) }
    pub fn node_count(&self) -> usize { self.nodes.len() }

    pub fn update_node_title(&mut self, id: NodeId, text: String) -> bool {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.title_text = text;
            true
        } else {
            false
        }
    }

    pub fn update_node_body(&mut self, id: NodeId, text: String) -> bool {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.body_text = text;
            true
        } else {
            false
        }
    }

    /// Roots have no incoming link, so their label cannot be set.
    pub fn update_link_text(&mut self, id: NodeId, text: String) -> bool {
        if let Some(node) = self.nodes.get_mut(&id).filter(|n| !n.is_root()) {
            node.parent_node_link_text = text;
            true
        } else {
            false
        }
    }

    pub fn update_position(&mut self, id: NodeId, x: f32, y: f32) -> bool {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.editor_position_x = x;
            node.editor_position_y = y;
            true
        } else {
            false
        }
    }

    /// True when `ancestor` is reachable by following parent links up from `id`.
    /// Stops on a revisit so a malformed (already cyclic) graph cannot hang it.
    pub fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut seen = Vec::new();
        let mut cursor = self.nodes.get(&id).and_then(|n| n.parent_node_id);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            if seen.contains(&current) {
                return false;
            }
            seen.push(current);
            cursor = self.nodes.get(&current).and_then(|n| n.parent_node_id);
        }
        false
    }

    /// Point `child` at `parent`, replacing any previous parent.
    pub fn set_parent(&mut self, child: NodeId, parent: NodeId) -> Result<(), LinkRefusal> {
        if !self.nodes.contains_key(&parent) {
            return Err(LinkRefusal::UnknownNode(parent));
        }
        if !self.nodes.contains_key(&child) {
            return Err(LinkRefusal::UnknownNode(child));
        }
        if child == parent || self.is_ancestor(child, parent) {
            return Err(LinkRefusal::Cycle);
        }
        if let Some(node) = self.nodes.get_mut(&child) {
            node.parent_node_id = Some(parent);
        }
        Ok(())
    }

    /// Drop the parent link and its label. Returns false if the node is unknown.
    pub fn clear_parent(&mut self, id: NodeId) -> bool {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.parent_node_id = None;
            node.parent_node_link_text.clear();
            true
        } else {
            false
        }
    }

    /// Remove a node and sever the parent link of every child that pointed at it.
    pub fn remove_node(&mut self, id: NodeId) -> Option<StoryNode> {
        let removed = self.nodes.remove(&id)?;
        for node in self.nodes.values_mut() {
            if node.parent_node_id == Some(id) {
                node.parent_node_id = None;
                node.parent_node_link_text.clear();
            }
        }
        Some(removed)
    }

    /// Children of `id` in id order.
    pub fn children_of(&self, id: NodeId) -> Vec<&StoryNode> {
        let mut out: Vec<&StoryNode> = self
            .nodes
            .values()
            .filter(|n| n.parent_node_id == Some(id))
            .collect();
        out.sort_by_key(|n| n.id);
        out
    }

    /// Parentless nodes in id order.
    pub fn roots(&self) -> Vec<&StoryNode> {
        let mut out: Vec<&StoryNode> = self.nodes.values().filter(|n| n.is_root()).collect();
        out.sort_by_key(|n| n.id);
        out
    }

    /// The node play starts from: a parentless Start node if there is one,
    /// otherwise the first parentless node.
    pub fn root(&self) -> Option<&StoryNode> {
        let roots = self.roots();
        roots
            .iter()
            .find(|n| n.kind == NodeKind::Start)
            .or_else(|| roots.first())
            .copied()
    }
}
