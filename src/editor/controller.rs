use thiserror::Error;

use crate::persistence::gateway::{GatewayError, StoryGateway};
use crate::story::graph::{EdgeId, GameId, LinkRefusal, NodeId, NodeKind, StoryGame, StoryGraph, StoryNode};
use crate::story::validate::{SaveGate, Validity};
use crate::story::visual::{self, CanvasPos, VisualGraph};
use super::keys::{EditorKey, KeyBus, KeySubscription};

/// Drag payload key the toolbar uses for the node kind being created.
pub const DROP_PAYLOAD_KEY: &str = "application/reactflow/gameNodeType";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditorError {
    #[error("the story has nodes or branches with missing text")]
    ValidationFailed,
    #[error("nothing to save")]
    NotDirty,
    #[error("a save is already in progress")]
    SaveInFlight,
    #[error("unknown node kind in drop payload: {0}")]
    UnknownNodeKind(String),
    #[error("node {0} does not exist")]
    UnknownNode(NodeId),
    #[error("linking would make a node its own ancestor")]
    WouldCreateCycle,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// What the flyout editors are showing. An edge is addressed by the node that
/// owns it, and only one editor can be open at a time.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Selection {
    #[default]
    None,
    Node(NodeId),
    Edge(NodeId),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EditField {
    Title,
    Body,
    LinkText,
}

/// Canvas pan/zoom. Canvas point = graph point * zoom + pan.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Viewport {
    pub pan_x: f32,
    pub pan_y: f32,
    pub zoom: f32,
}

impl Default for Viewport {
    fn default() -> Self { Self { pan_x: 0.0, pan_y: 0.0, zoom: 1.0 } }
}

impl Viewport {
    pub const MIN_ZOOM: f32 = 0.25;
    pub const MAX_ZOOM: f32 = 2.0;

    pub fn project(&self, canvas: CanvasPos) -> CanvasPos {
        CanvasPos::new((canvas.x - self.pan_x) / self.zoom, (canvas.y - self.pan_y) / self.zoom)
    }

    pub fn unproject(&self, graph: CanvasPos) -> CanvasPos {
        CanvasPos::new(graph.x * self.zoom + self.pan_x, graph.y * self.zoom + self.pan_y)
    }

    pub fn pan_by(&mut self, dx: f32, dy: f32) {
        self.pan_x += dx;
        self.pan_y += dy;
    }

    /// Zoom around a fixed canvas point.
    pub fn zoom_at(&mut self, anchor: CanvasPos, factor: f32) {
        let before = self.project(anchor);
        self.zoom = (self.zoom * factor).clamp(Self::MIN_ZOOM, Self::MAX_ZOOM);
        let after = self.unproject(before);
        self.pan_by(anchor.x - after.x, anchor.y - after.y);
    }
}

/// Commands emitted by the canvas and flyouts.
#[derive(Clone, Debug, PartialEq)]
pub enum EditorIntent {
    EditNode(NodeId),
    RemoveNode(NodeId),
    EditEdge(EdgeId),
    DeleteEdge(EdgeId),
    Connect { source: NodeId, target: NodeId },
    DropNode { payload: String, at: CanvasPos },
    DragStop { id: NodeId, to: CanvasPos },
    EditField { id: NodeId, field: EditField, value: String },
    PaneClicked,
}

/// Snapshot handed to the gateway while a save is in flight.
#[derive(Clone, Debug)]
pub struct SaveTicket {
    pub game_id: GameId,
    pub nodes: Vec<StoryNode>,
    revision: u64,
}

pub struct EditorSession {
    game_id: GameId,
    game_name: String,
    graph: StoryGraph,
    selection: Selection,
    dirty: bool,
    saving: bool,
    // bumped on every mutation so a save can tell whether it is stale
    revision: u64,
    pub viewport: Viewport,
    escape: KeySubscription,
}

impl EditorSession {
    pub fn open(game: StoryGame, keys: &KeyBus) -> Self {
        log::debug!("editing game {} ({} nodes)", game.id, game.nodes.len());
        Self {
            game_id: game.id,
            game_name: game.name,
            graph: StoryGraph::from_nodes(game.nodes),
            selection: Selection::None,
            dirty: false,
            saving: false,
            revision: 0,
            viewport: Viewport::default(),
            escape: keys.subscribe(EditorKey::Escape),
        }
    }

    pub fn load(gateway: &dyn StoryGateway, id: GameId, keys: &KeyBus) -> Result<Self, GatewayError> {
        Ok(Self::open(gateway.load_game(id)?, keys))
    }

    pub fn game_id(&self) -> GameId { self.game_id }
    pub fn game_name(&self) -> &str { &self.game_name }
    pub fn graph(&self) -> &StoryGraph { &self.graph }
    pub fn selection(&self) -> Selection { self.selection }
    pub fn is_dirty(&self) -> bool { self.dirty }
    pub fn is_saving(&self) -> bool { self.saving }

    pub fn visual(&self) -> VisualGraph {
        visual::to_visual(&self.graph.to_nodes())
    }

    pub fn validity(&self) -> Validity { Validity::of(&self.visual()) }

    pub fn save_gate(&self) -> SaveGate {
        SaveGate { validity: self.validity(), dirty: self.dirty, saving: self.saving }
    }

    pub fn editing_node(&self) -> Option<&StoryNode> {
        match self.selection {
            Selection::Node(id) => self.graph.get_node(id),
            _ => None,
        }
    }

    pub fn editing_edge(&self) -> Option<&StoryNode> {
        match self.selection {
            Selection::Edge(id) => self.graph.get_node(id),
            _ => None,
        }
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
        self.revision += 1;
    }

    pub fn select_node(&mut self, id: NodeId) {
        if self.graph.contains(id) {
            self.selection = Selection::Node(id);
        }
    }

    pub fn select_edge(&mut self, edge: &EdgeId) {
        let owner = edge.owner().filter(|id| self.graph.get_node(*id).is_some_and(|n| !n.is_root()));
        if let Some(owner) = owner {
            self.selection = Selection::Edge(owner);
        }
    }

    pub fn deselect(&mut self) {
        self.selection = Selection::None;
    }

    /// Apply any Escape presses delivered since the last frame.
    pub fn pump_keys(&mut self) {
        if self.escape.drain() > 0 {
            self.deselect();
        }
    }

    /// Make `target` a child of `source`. A previous parent is replaced.
    pub fn connect(&mut self, source: NodeId, target: NodeId) -> Result<(), EditorError> {
        match self.graph.set_parent(target, source) {
            Ok(()) => {
                self.mark_dirty();
                Ok(())
            }
            Err(LinkRefusal::UnknownNode(id)) => Err(EditorError::UnknownNode(id)),
            Err(LinkRefusal::Cycle) => {
                log::warn!("refused link {} -> {}: would create a cycle", source, target);
                Err(EditorError::WouldCreateCycle)
            }
        }
    }

    pub fn delete_edge(&mut self, edge: &EdgeId) {
        let Some(owner) = edge.owner() else { return };
        if self.graph.clear_parent(owner) {
            self.mark_dirty();
            if self.selection == Selection::Edge(owner) {
                self.selection = Selection::None;
            }
        }
    }

    pub fn delete_node(&mut self, id: NodeId) {
        if self.graph.remove_node(id).is_none() {
            return;
        }
        self.mark_dirty();
        match self.selection {
            Selection::Node(sel) | Selection::Edge(sel) if sel == id => self.selection = Selection::None,
            // a selected edge into the removed node is gone with it
            Selection::Edge(sel) if self.graph.get_node(sel).is_some_and(StoryNode::is_root) => {
                self.selection = Selection::None;
            }
            _ => {}
        }
    }

    pub fn drop_kind(&mut self, kind: NodeKind, at: CanvasPos) -> NodeId {
        let node = visual::from_canvas_drop(kind, self.viewport.project(at));
        let id = self.graph.insert(node);
        self.mark_dirty();
        id
    }

    /// Create a node from a toolbar drop. `at` is relative to the canvas origin.
    pub fn drop_node(&mut self, payload: &str, at: CanvasPos) -> Result<NodeId, EditorError> {
        let kind: NodeKind = payload
            .parse()
            .map_err(|_| EditorError::UnknownNodeKind(payload.to_string()))?;
        Ok(self.drop_kind(kind, at))
    }

    pub fn drag_stop(&mut self, id: NodeId, to: CanvasPos) {
        if self.graph.update_position(id, to.x, to.y) {
            self.mark_dirty();
        }
    }

    pub fn edit_field(&mut self, id: NodeId, field: EditField, value: String) {
        let changed = match field {
            EditField::Title => self.graph.update_node_title(id, value),
            EditField::Body => self.graph.update_node_body(id, value),
            EditField::LinkText => self.graph.update_link_text(id, value),
        };
        if changed {
            self.mark_dirty();
        }
    }

    pub fn apply(&mut self, intent: EditorIntent) -> Result<(), EditorError> {
        match intent {
            EditorIntent::EditNode(id) => self.select_node(id),
            EditorIntent::RemoveNode(id) => self.delete_node(id),
            EditorIntent::EditEdge(edge) => self.select_edge(&edge),
            EditorIntent::DeleteEdge(edge) => self.delete_edge(&edge),
            EditorIntent::Connect { source, target } => self.connect(source, target)?,
            EditorIntent::DropNode { payload, at } => {
                self.drop_node(&payload, at)?;
            }
            EditorIntent::DragStop { id, to } => self.drag_stop(id, to),
            EditorIntent::EditField { id, field, value } => self.edit_field(id, field, value),
            EditorIntent::PaneClicked => self.deselect(),
        }
        Ok(())
    }

    /// Start a save: checks the gate, closes the flyouts and snapshots the
    /// complete node set.
    pub fn begin_save(&mut self) -> Result<SaveTicket, EditorError> {
        if self.saving {
            return Err(EditorError::SaveInFlight);
        }
        if !self.validity().save_eligible() {
            return Err(EditorError::ValidationFailed);
        }
        if !self.dirty {
            return Err(EditorError::NotDirty);
        }
        self.saving = true;
        self.selection = Selection::None;
        Ok(SaveTicket { game_id: self.game_id, nodes: self.graph.to_nodes(), revision: self.revision })
    }

    /// Finish a save. On failure the session stays dirty and the nodes are
    /// untouched so the user can retry.
    pub fn finish_save<T>(&mut self, ticket: &SaveTicket, outcome: Result<T, GatewayError>) -> Result<(), EditorError> {
        self.saving = false;
        match outcome {
            Ok(_) => {
                self.dirty = self.revision != ticket.revision;
                log::info!("saved game {} ({} nodes)", ticket.game_id, ticket.nodes.len());
                Ok(())
            }
            Err(e) => {
                log::warn!("save of game {} failed: {}", ticket.game_id, e);
                Err(e.into())
            }
        }
    }

    pub fn save(&mut self, gateway: &dyn StoryGateway) -> Result<(), EditorError> {
        let ticket = self.begin_save()?;
        let outcome = gateway.save_nodes(ticket.game_id, ticket.nodes.clone());
        self.finish_save(&ticket, outcome)
    }
}
