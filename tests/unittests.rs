use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use story_loom::editor::controller::{EditField, EditorError, EditorIntent, EditorSession, Selection};
use story_loom::editor::keys::{EditorKey, KeyBus};
use story_loom::persistence::gateway::{GatewayError, LocalGateway, Session, SharedStore, StoryGateway};
use story_loom::persistence::persist;
use story_loom::persistence::store::{
    GameRating, GameSummary, GameUpdate, Page, PlayRecord, PlayResult, SearchQuery, StoryStore,
};
use story_loom::play::engine::{PlayEngine, PlayError, PlayState, RateOutcome};
use story_loom::story::graph::{EdgeId, GameId, NodeKind, StoryGame, StoryGraph, StoryNode, UserId};
use story_loom::story::validate::{SaveButton, Validity};
use story_loom::story::visual::{self, CanvasPos};
use uuid::Uuid;

fn node(kind: NodeKind, title: &str, body: &str) -> StoryNode {
    let mut n = StoryNode::new(kind, 0.0, 0.0);
    n.title_text = title.to_string();
    n.body_text = body.to_string();
    n
}

fn child_of(parent: &StoryNode, kind: NodeKind, title: &str, link: &str) -> StoryNode {
    let mut n = node(kind, title, "text");
    n.parent_node_id = Some(parent.id);
    n.parent_node_link_text = link.to_string();
    n
}

fn game_with(author: &str, nodes: Vec<StoryNode>) -> StoryGame {
    StoryGame {
        id: Uuid::now_v7(),
        name: "Cave".into(),
        description: "A dark cave".into(),
        is_public: true,
        author_id: author.to_string(),
        nodes,
    }
}

/// Gateway double that counts calls and can be told to fail.
#[derive(Default)]
struct MockGateway {
    user: Option<UserId>,
    fail_saves: bool,
    fail_records: bool,
    fail_ratings: bool,
    // record_play waits for a message here before it writes
    gate: Option<Mutex<Receiver<()>>>,
    saves: Mutex<Vec<Vec<StoryNode>>>,
    records: Mutex<Vec<PlayResult>>,
    ratings: Mutex<Vec<u8>>,
}

impl MockGateway {
    fn as_user(user: &str) -> Self {
        Self { user: Some(user.to_string()), ..Default::default() }
    }
}

impl StoryGateway for MockGateway {
    fn current_user(&self) -> Option<UserId> { self.user.clone() }

    fn load_game(&self, id: GameId) -> Result<StoryGame, GatewayError> { Err(GatewayError::NotFound(id)) }

    fn save_nodes(&self, id: GameId, nodes: Vec<StoryNode>) -> Result<StoryGame, GatewayError> {
        if self.fail_saves {
            return Err(GatewayError::Persistence("disk full".into()));
        }
        self.saves.lock().unwrap().push(nodes.clone());
        let mut game = game_with("me", nodes);
        game.id = id;
        Ok(game)
    }

    fn record_play(&self, id: GameId, result: PlayResult) -> Result<PlayRecord, GatewayError> {
        if let Some(gate) = &self.gate {
            let _ = gate.lock().unwrap().recv_timeout(Duration::from_secs(5));
        }
        if self.fail_records {
            return Err(GatewayError::Persistence("offline".into()));
        }
        self.records.lock().unwrap().push(result);
        Ok(PlayRecord { id: Uuid::now_v7(), game_id: id, player_id: "p".into(), result, played_at: 0 })
    }

    fn rate_game(&self, id: GameId, rating: u8) -> Result<GameRating, GatewayError> {
        if self.fail_ratings {
            return Err(GatewayError::Persistence("offline".into()));
        }
        self.ratings.lock().unwrap().push(rating);
        Ok(GameRating { id: Uuid::now_v7(), game_id: id, player_id: "p".into(), rating, rated_at: 0 })
    }

    fn find_game(&self, id: GameId) -> Result<GameSummary, GatewayError> { Err(GatewayError::NotFound(id)) }

    fn create_game(&self, _name: &str, _description: &str) -> Result<StoryGame, GatewayError> {
        Err(GatewayError::Forbidden)
    }

    fn update_game(&self, id: GameId, _update: GameUpdate) -> Result<GameSummary, GatewayError> {
        Err(GatewayError::NotFound(id))
    }

    fn search_games(&self, _query: &SearchQuery) -> Result<Page<GameSummary>, GatewayError> {
        Ok(Page { items: Vec::new(), next_cursor: None })
    }
}

// --- graph model adapter ---

#[test]
fn adapter_round_trip_preserves_nodes() {
    let start = node(NodeKind::Start, "Entrance", "You stand at the mouth of a cave.");
    let mut left = child_of(&start, NodeKind::Win, "Treasure", "Go left");
    left.editor_position_x = 120.5;
    left.editor_position_y = -40.0;
    let right = child_of(&start, NodeKind::Lose, "Pit", "Go right");
    let nodes = vec![start.clone(), left, right];

    let graph = visual::to_visual(&nodes);
    assert_eq!(graph.nodes.len(), 3);
    assert_eq!(graph.edges.len(), 2);
    assert_eq!(visual::from_visual(&graph), nodes);
}

#[test]
fn adapter_round_trip_covers_roots_chains_and_labels() {
    let start = node(NodeKind::Start, "Entrance", "Dark.");
    let mut stray = node(NodeKind::Standard, "Loose", "Unlinked page");
    stray.parent_node_link_text = "left over".into();
    stray.editor_position_x = -3.25;
    let hall = child_of(&start, NodeKind::Standard, "Hall", "");
    let mut deep = child_of(&hall, NodeKind::Lose, "Pit", "Jump");
    deep.editor_position_y = 999.0;
    let win = child_of(&stray, NodeKind::Win, "", "Take the key");
    let nodes = vec![start, stray, hall, deep, win];

    let graph = visual::to_visual(&nodes);
    assert_eq!(graph.edges.len(), 3);
    for n in nodes.iter().filter(|n| !n.is_root()) {
        assert_eq!(graph.edge_into(n.id).map(|e| e.id.clone()), n.edge_id());
    }
    assert_eq!(visual::from_visual(&graph), nodes);
}

#[test]
fn adapter_marks_roots_and_labels_edges() {
    let start = node(NodeKind::Start, "A", "a");
    let next = child_of(&start, NodeKind::Standard, "B", "onward");
    let graph = visual::to_visual(&[start.clone(), next.clone()]);

    assert!(graph.node(start.id).unwrap().is_root);
    assert!(!graph.node(next.id).unwrap().is_root);
    let edge = graph.edge_into(next.id).expect("edge into child");
    assert_eq!(edge.source, start.id);
    assert_eq!(edge.label, "onward");
    assert_eq!(edge.id.as_str(), format!("{}-{}", next.id, start.id));
}

#[test]
fn edge_id_decodes_to_owning_node() {
    let child = Uuid::now_v7();
    let parent = Uuid::now_v7();
    let edge = EdgeId::between(child, parent);
    assert_eq!(edge.owner(), Some(child));
    assert_eq!(EdgeId::from("not-an-edge").owner(), None);
}

#[test]
fn canvas_drop_creates_blank_root() {
    let n = visual::from_canvas_drop(NodeKind::Win, CanvasPos::new(100.0, 200.0));
    assert_eq!(n.kind, NodeKind::Win);
    assert_eq!((n.editor_position_x, n.editor_position_y), (100.0, 200.0));
    assert!(n.is_root());
    assert!(n.title_text.is_empty() && n.body_text.is_empty());
}

#[test]
fn node_kind_parses_case_insensitively() {
    assert_eq!("win".parse::<NodeKind>(), Ok(NodeKind::Win));
    assert_eq!("Standard".parse::<NodeKind>(), Ok(NodeKind::Standard));
    assert!("Boss".parse::<NodeKind>().is_err());
}

// --- story graph ---

#[test]
fn removing_node_orphans_its_children() {
    let start = node(NodeKind::Start, "A", "a");
    let mid = child_of(&start, NodeKind::Standard, "B", "go");
    let end = child_of(&mid, NodeKind::Win, "C", "finish");
    let (mid_id, end_id) = (mid.id, end.id);
    let mut graph = StoryGraph::from_nodes([start, mid, end]);

    assert!(graph.remove_node(mid_id).is_some());
    let orphan = graph.get_node(end_id).expect("child survives");
    assert!(orphan.parent_node_id.is_none());
    assert!(orphan.parent_node_link_text.is_empty());
    assert!(graph.remove_node(mid_id).is_none());
}

#[test]
fn set_parent_refuses_cycles() {
    let a = node(NodeKind::Start, "A", "a");
    let b = child_of(&a, NodeKind::Standard, "B", "x");
    let c = child_of(&b, NodeKind::Standard, "C", "y");
    let (a_id, c_id) = (a.id, c.id);
    let mut graph = StoryGraph::from_nodes([a, b, c]);

    assert!(graph.set_parent(a_id, c_id).is_err());
    assert!(graph.set_parent(a_id, a_id).is_err());
    assert!(graph.get_node(a_id).unwrap().is_root());
}

#[test]
fn root_prefers_start_node() {
    let plain = node(NodeKind::Standard, "Loose", "x");
    let start = node(NodeKind::Start, "Begin", "y");
    let graph = StoryGraph::from_nodes([plain.clone(), start.clone()]);
    assert_eq!(graph.root().map(|n| n.id), Some(start.id));

    let only = StoryGraph::from_nodes([plain.clone()]);
    assert_eq!(only.root().map(|n| n.id), Some(plain.id));
    assert!(StoryGraph::new().root().is_none());
}

// --- validation ---

#[test]
fn validation_requires_text_everywhere() {
    let start = node(NodeKind::Start, "A", "a");
    let mut next = child_of(&start, NodeKind::Win, "B", "go");
    let ok = Validity::of(&visual::to_visual(&[start.clone(), next.clone()]));
    assert!(ok.save_eligible());

    next.parent_node_link_text.clear();
    let no_label = Validity::of(&visual::to_visual(&[start.clone(), next.clone()]));
    assert!(no_label.nodes_valid);
    assert!(!no_label.edges_valid);

    let blank = node(NodeKind::Lose, "", "text");
    let no_title = Validity::of(&visual::to_visual(&[blank]));
    assert!(!no_title.nodes_valid);
    assert!(!no_title.save_eligible());
}

#[test]
fn empty_graph_is_save_eligible() {
    let v = Validity::of(&visual::to_visual(&Vec::<StoryNode>::new()));
    assert!(v.nodes_valid && v.edges_valid);
}

// --- interaction controller ---

fn open_session(nodes: Vec<StoryNode>, keys: &KeyBus) -> EditorSession {
    EditorSession::open(game_with("me", nodes), keys)
}

#[test]
fn drop_with_identity_viewport_lands_at_pointer() {
    let keys = KeyBus::new();
    let mut s = open_session(Vec::new(), &keys);
    let id = s.drop_node("Win", CanvasPos::new(100.0, 200.0)).expect("known kind");
    let n = s.graph().get_node(id).unwrap();
    assert_eq!(n.kind, NodeKind::Win);
    assert_eq!((n.editor_position_x, n.editor_position_y), (100.0, 200.0));
    assert!(s.is_dirty());
    assert_eq!(
        s.drop_node("Dragon", CanvasPos::new(0.0, 0.0)),
        Err(EditorError::UnknownNodeKind("Dragon".into()))
    );
}

#[test]
fn drop_accounts_for_pan_and_zoom() {
    let keys = KeyBus::new();
    let mut s = open_session(Vec::new(), &keys);
    s.viewport.pan_by(50.0, 20.0);
    s.viewport.zoom = 2.0;
    let id = s.drop_node("Standard", CanvasPos::new(250.0, 420.0)).unwrap();
    let n = s.graph().get_node(id).unwrap();
    assert_eq!((n.editor_position_x, n.editor_position_y), (100.0, 200.0));
}

#[test]
fn connect_replaces_parent_and_edit_edge_selects_owner() {
    let keys = KeyBus::new();
    let a = node(NodeKind::Start, "A", "a");
    let b = node(NodeKind::Standard, "B", "b");
    let c = node(NodeKind::Win, "C", "c");
    let (a_id, b_id, c_id) = (a.id, b.id, c.id);
    let mut s = open_session(vec![a, b, c], &keys);

    s.apply(EditorIntent::Connect { source: a_id, target: c_id }).unwrap();
    s.apply(EditorIntent::Connect { source: b_id, target: c_id }).unwrap();
    assert_eq!(s.graph().get_node(c_id).unwrap().parent_node_id, Some(b_id));

    s.apply(EditorIntent::EditEdge(EdgeId::between(c_id, b_id))).unwrap();
    assert_eq!(s.selection(), Selection::Edge(c_id));
    assert_eq!(s.editing_edge().map(|n| n.id), Some(c_id));
    assert!(s.editing_node().is_none());
}

#[test]
fn connect_rejects_cycle() {
    let keys = KeyBus::new();
    let a = node(NodeKind::Start, "A", "a");
    let b = child_of(&a, NodeKind::Standard, "B", "go");
    let (a_id, b_id) = (a.id, b.id);
    let mut s = open_session(vec![a, b], &keys);
    assert_eq!(s.connect(b_id, a_id), Err(EditorError::WouldCreateCycle));
    assert!(!s.is_dirty());
}

#[test]
fn delete_edge_clears_link_and_selection() {
    let keys = KeyBus::new();
    let a = node(NodeKind::Start, "A", "a");
    let b = child_of(&a, NodeKind::Win, "B", "go");
    let (a_id, b_id) = (a.id, b.id);
    let mut s = open_session(vec![a, b], &keys);
    let edge = EdgeId::between(b_id, a_id);

    s.select_edge(&edge);
    s.apply(EditorIntent::DeleteEdge(edge)).unwrap();
    let b = s.graph().get_node(b_id).unwrap();
    assert!(b.parent_node_id.is_none());
    assert!(b.parent_node_link_text.is_empty());
    assert_eq!(s.selection(), Selection::None);
    assert!(s.is_dirty());
}

#[test]
fn edit_field_updates_only_the_target() {
    let keys = KeyBus::new();
    let a = node(NodeKind::Start, "A", "a");
    let b = child_of(&a, NodeKind::Win, "B", "go");
    let (a_id, b_id) = (a.id, b.id);
    let mut s = open_session(vec![a, b], &keys);

    s.apply(EditorIntent::EditField { id: b_id, field: EditField::LinkText, value: "run".into() }).unwrap();
    s.apply(EditorIntent::EditField { id: a_id, field: EditField::Title, value: "Hall".into() }).unwrap();
    assert_eq!(s.graph().get_node(b_id).unwrap().parent_node_link_text, "run");
    assert_eq!(s.graph().get_node(b_id).unwrap().title_text, "B");
    assert_eq!(s.graph().get_node(a_id).unwrap().title_text, "Hall");
}

#[test]
fn root_has_no_link_to_edit_or_select() {
    let keys = KeyBus::new();
    let a = node(NodeKind::Start, "A", "a");
    let b = child_of(&a, NodeKind::Win, "B", "go");
    let (a_id, b_id) = (a.id, b.id);
    let mut s = open_session(vec![a, b], &keys);

    s.apply(EditorIntent::EditField { id: a_id, field: EditField::LinkText, value: "lost".into() }).unwrap();
    assert!(s.graph().get_node(a_id).unwrap().parent_node_link_text.is_empty());
    assert!(!s.is_dirty());

    s.apply(EditorIntent::EditEdge(EdgeId::between(a_id, b_id))).unwrap();
    assert_eq!(s.selection(), Selection::None);
    assert!(s.editing_edge().is_none());
}

#[test]
fn deleting_nodes_keeps_unrelated_edge_selection() {
    let keys = KeyBus::new();
    let a = node(NodeKind::Start, "A", "a");
    let b = child_of(&a, NodeKind::Standard, "B", "go");
    let c = child_of(&b, NodeKind::Win, "C", "on");
    let loose = node(NodeKind::Lose, "D", "d");
    let (a_id, b_id, c_id, loose_id) = (a.id, b.id, c.id, loose.id);
    let mut s = open_session(vec![a, b, c, loose], &keys);

    s.select_edge(&EdgeId::between(c_id, b_id));
    s.delete_node(loose_id);
    assert_eq!(s.selection(), Selection::Edge(c_id));
    s.delete_node(a_id);
    assert_eq!(s.selection(), Selection::Edge(c_id));

    // the selected edge hangs off b, so it goes with it
    s.delete_node(b_id);
    assert_eq!(s.selection(), Selection::None);
    assert!(s.graph().get_node(c_id).unwrap().is_root());
}

#[test]
fn unknown_ids_leave_session_clean() {
    let keys = KeyBus::new();
    let mut s = open_session(vec![node(NodeKind::Start, "A", "a")], &keys);
    let ghost = Uuid::now_v7();
    s.drag_stop(ghost, CanvasPos::new(1.0, 1.0));
    s.edit_field(ghost, EditField::Body, "x".into());
    s.delete_node(ghost);
    s.select_node(ghost);
    assert!(!s.is_dirty());
    assert_eq!(s.selection(), Selection::None);
}

#[test]
fn escape_deselects_until_session_is_dropped() {
    let keys = KeyBus::new();
    let a = node(NodeKind::Start, "A", "a");
    let a_id = a.id;
    let mut s = open_session(vec![a], &keys);
    assert_eq!(keys.listener_count(), 1);

    s.select_node(a_id);
    assert_eq!(keys.dispatch(EditorKey::Escape), 1);
    s.pump_keys();
    assert_eq!(s.selection(), Selection::None);

    drop(s);
    assert_eq!(keys.listener_count(), 0);
    assert_eq!(keys.dispatch(EditorKey::Escape), 0);
}

#[test]
fn save_gate_tracks_validity_and_dirty() {
    let keys = KeyBus::new();
    let a = node(NodeKind::Start, "A", "a");
    let a_id = a.id;
    let mut s = open_session(vec![a], &keys);
    assert_eq!(s.save_gate().button(), SaveButton::Save);
    assert!(!s.save_gate().enabled());

    s.edit_field(a_id, EditField::Title, String::new());
    assert_eq!(s.save_gate().button(), SaveButton::CannotSave);
    assert_eq!(s.begin_save().map(|_| ()), Err(EditorError::ValidationFailed));

    s.edit_field(a_id, EditField::Title, "Again".into());
    assert_eq!(s.save_gate().button().label(), "Save *");
    assert!(s.save_gate().enabled());
}

#[test]
fn failed_save_keeps_session_dirty() {
    let keys = KeyBus::new();
    let a = node(NodeKind::Start, "A", "a");
    let a_id = a.id;
    let mut s = open_session(vec![a], &keys);
    s.edit_field(a_id, EditField::Body, "changed".into());
    let before = s.graph().clone();

    let gw = MockGateway { fail_saves: true, ..MockGateway::as_user("me") };
    assert!(matches!(s.save(&gw), Err(EditorError::Gateway(GatewayError::Persistence(_)))));
    assert!(s.is_dirty());
    assert!(!s.is_saving());
    assert_eq!(s.graph(), &before);
}

#[test]
fn successful_save_sends_all_nodes_and_clears_dirty() {
    let keys = KeyBus::new();
    let a = node(NodeKind::Start, "A", "a");
    let b = child_of(&a, NodeKind::Lose, "B", "jump");
    let a_id = a.id;
    let mut s = open_session(vec![a, b], &keys);
    s.select_node(a_id);
    s.edit_field(a_id, EditField::Title, "Ledge".into());

    let gw = MockGateway::as_user("me");
    s.save(&gw).expect("save");
    assert!(!s.is_dirty());
    assert_eq!(s.selection(), Selection::None);
    let saves = gw.saves.lock().unwrap();
    assert_eq!(saves.len(), 1);
    assert_eq!(saves[0].len(), 2);
    assert_eq!(s.begin_save().map(|_| ()), Err(EditorError::NotDirty));
}

#[test]
fn edits_during_save_keep_session_dirty() {
    let keys = KeyBus::new();
    let a = node(NodeKind::Start, "A", "a");
    let a_id = a.id;
    let mut s = open_session(vec![a], &keys);
    s.edit_field(a_id, EditField::Title, "One".into());

    let ticket = s.begin_save().expect("eligible");
    assert!(s.is_saving());
    assert_eq!(s.save_gate().button(), SaveButton::Saving);
    assert_eq!(s.begin_save().map(|_| ()), Err(EditorError::SaveInFlight));

    s.edit_field(a_id, EditField::Title, "Two".into());
    s.finish_save(&ticket, Ok(())).unwrap();
    assert!(s.is_dirty());
    assert!(!s.is_saving());
}

// --- play engine ---

fn win_lose_game(author: &str) -> (StoryGame, StoryNode, StoryNode, StoryNode) {
    let a = node(NodeKind::Start, "A", "Pick a door");
    let b = child_of(&a, NodeKind::Win, "B", "Left");
    let c = child_of(&a, NodeKind::Lose, "C", "Right");
    let game = game_with(author, vec![a.clone(), b.clone(), c.clone()]);
    (game, a, b, c)
}

#[test]
fn play_to_win_records_once() {
    let (game, a, b, c) = win_lose_game("author");
    let gw = Arc::new(MockGateway::as_user("player"));
    let mut engine = PlayEngine::start(game, gw.user.as_ref());

    assert_eq!(engine.current_node().map(|n| n.id), Some(a.id));
    let branches: Vec<_> = engine.branches().iter().map(|n| n.id).collect();
    assert_eq!(branches.len(), 2);
    assert!(branches.contains(&b.id) && branches.contains(&c.id));

    let state = engine.select_branch(b.id, &gw).expect("valid branch");
    assert_eq!(state, PlayState::Finished { node: b.id, result: PlayResult::Win });
    assert_eq!(engine.select_branch(c.id, &gw), Err(PlayError::AlreadyFinished));
    engine.wait();
    assert_eq!(*gw.records.lock().unwrap(), vec![PlayResult::Win]);
    assert!(engine.take_notice().is_none());
    assert!(!engine.poll());
}

#[test]
fn finishing_does_not_wait_for_the_record() {
    let (game, _a, b, _c) = win_lose_game("author");
    let (release, gate) = mpsc::channel();
    let gw = Arc::new(MockGateway { gate: Some(Mutex::new(gate)), ..MockGateway::as_user("player") });
    let mut engine = PlayEngine::start(game, gw.user.as_ref());

    let state = engine.select_branch(b.id, &gw).unwrap();
    assert_eq!(state, PlayState::Finished { node: b.id, result: PlayResult::Win });
    assert!(gw.records.lock().unwrap().is_empty());
    assert!(engine.poll());
    assert!(engine.can_rate());

    release.send(()).unwrap();
    engine.wait();
    assert_eq!(*gw.records.lock().unwrap(), vec![PlayResult::Win]);
    assert!(!engine.poll());
}

#[test]
fn play_rejects_non_branch() {
    let (game, _a, b, _c) = win_lose_game("author");
    let gw = Arc::new(MockGateway::as_user("player"));
    let mut engine = PlayEngine::start(game, gw.user.as_ref());
    let stray = Uuid::now_v7();
    assert_eq!(engine.select_branch(stray, &gw), Err(PlayError::NotABranch(stray)));
    assert!(!engine.poll());
    engine.select_branch(b.id, &gw).unwrap();
}

#[test]
fn failed_record_still_finishes_with_notice() {
    let (game, _a, _b, c) = win_lose_game("author");
    let gw = Arc::new(MockGateway { fail_records: true, ..MockGateway::as_user("player") });
    let mut engine = PlayEngine::start(game, gw.user.as_ref());
    engine.select_branch(c.id, &gw).unwrap();
    assert_eq!(engine.result(), Some(PlayResult::Lose));
    engine.wait();
    assert_eq!(engine.result(), Some(PlayResult::Lose));
    assert!(engine.take_notice().is_some());
    assert!(engine.take_notice().is_none());
}

#[test]
fn rating_is_once_and_never_own_game() {
    let (game, _a, b, _c) = win_lose_game("author");
    let gw = Arc::new(MockGateway::as_user("player"));
    let mut engine = PlayEngine::start(game.clone(), gw.user.as_ref());
    assert_eq!(engine.rate(4, &gw), Err(PlayError::NotFinished));

    engine.select_branch(b.id, &gw).unwrap();
    assert!(engine.can_rate());
    assert_eq!(engine.rate(9, &gw), Err(PlayError::InvalidRating(9)));
    assert_eq!(engine.rate(4, &gw), Ok(RateOutcome::Submitted));
    assert!(!engine.can_rate());
    assert_eq!(engine.rate(5, &gw), Ok(RateOutcome::AlreadyRated));
    engine.wait();
    assert!(engine.is_rated());
    assert_eq!(engine.rate(5, &gw), Ok(RateOutcome::AlreadyRated));
    assert_eq!(*gw.ratings.lock().unwrap(), vec![4]);
    assert!(!engine.can_rate());

    let author = Arc::new(MockGateway::as_user("author"));
    let mut own = PlayEngine::start(game, author.user.as_ref());
    own.select_branch(b.id, &author).unwrap();
    assert!(own.is_own_game());
    assert!(!own.can_rate());
    assert_eq!(own.rate(5, &author), Err(PlayError::OwnGame));
    own.wait();
    assert!(author.ratings.lock().unwrap().is_empty());
}

#[test]
fn failed_rating_can_be_retried() {
    let (game, _a, b, _c) = win_lose_game("author");
    let flaky = Arc::new(MockGateway { fail_ratings: true, ..MockGateway::as_user("player") });
    let mut engine = PlayEngine::start(game, flaky.user.as_ref());
    engine.select_branch(b.id, &flaky).unwrap();

    assert_eq!(engine.rate(3, &flaky), Ok(RateOutcome::Submitted));
    engine.wait();
    assert!(!engine.is_rated());
    assert!(engine.take_notice().is_some());
    assert!(engine.can_rate());

    let gw = Arc::new(MockGateway::as_user("player"));
    assert_eq!(engine.rate(3, &gw), Ok(RateOutcome::Submitted));
    engine.wait();
    assert!(engine.is_rated());
    assert_eq!(*gw.ratings.lock().unwrap(), vec![3]);
}

#[test]
fn empty_game_has_nothing_to_play() {
    let gw = Arc::new(MockGateway::as_user("player"));
    let mut engine = PlayEngine::start(game_with("author", Vec::new()), gw.user.as_ref());
    assert_eq!(engine.state(), PlayState::Empty);
    assert!(engine.current_node().is_none());
    assert_eq!(engine.select_branch(Uuid::now_v7(), &gw), Err(PlayError::NotStarted));
}

// --- store and gateway ---

fn gateway_for(store: &SharedStore, user: &str) -> LocalGateway {
    LocalGateway::new(store.clone(), Session::authenticated(user, Some(format!("{} name", user))))
}

#[test]
fn store_enforces_authorship_and_sign_in() {
    let store = SharedStore::new(StoryStore::in_memory());
    let alice = gateway_for(&store, "alice");
    let bob = gateway_for(&store, "bob");
    let anon = LocalGateway::new(store.clone(), Session::anonymous());

    let game = alice.create_game("Cave", "Dark").unwrap();
    assert!(!game.is_public);
    assert_eq!(anon.find_game(game.id), Err(GatewayError::Unauthorized));
    assert_eq!(
        bob.update_game(game.id, GameUpdate { is_public: Some(true), ..Default::default() }),
        Err(GatewayError::Forbidden)
    );
    assert_eq!(bob.save_nodes(game.id, Vec::new()), Err(GatewayError::Forbidden));
    assert!(matches!(alice.create_game("", "x"), Err(GatewayError::InvalidInput(_))));

    let summary = alice
        .update_game(game.id, GameUpdate { is_public: Some(true), ..Default::default() })
        .unwrap();
    assert!(summary.is_public);
    assert_eq!(summary.author_name, "alice name");
}

#[test]
fn store_rejects_malformed_node_sets() {
    let store = SharedStore::new(StoryStore::in_memory());
    let alice = gateway_for(&store, "alice");
    let first = alice.create_game("One", "1").unwrap();
    let second = alice.create_game("Two", "2").unwrap();

    let a = node(NodeKind::Start, "A", "a");
    let mut dangling = node(NodeKind::Win, "B", "b");
    dangling.parent_node_id = Some(Uuid::now_v7());
    assert!(matches!(
        alice.save_nodes(first.id, vec![a.clone(), dangling]),
        Err(GatewayError::InvalidInput(_))
    ));
    assert!(matches!(
        alice.save_nodes(first.id, vec![a.clone(), a.clone()]),
        Err(GatewayError::InvalidInput(_))
    ));

    let b = child_of(&a, NodeKind::Win, "B", "go");
    let saved = alice.save_nodes(first.id, vec![a.clone(), b]).unwrap();
    assert_eq!(saved.nodes.len(), 2);
    assert!(matches!(alice.save_nodes(second.id, vec![a]), Err(GatewayError::InvalidInput(_))));
    assert_eq!(alice.load_game(first.id).unwrap().nodes.len(), 2);
}

#[test]
fn store_rejects_parent_cycles_and_drops_root_labels() {
    let store = SharedStore::new(StoryStore::in_memory());
    let alice = gateway_for(&store, "alice");
    let game = alice.create_game("Loop", "l").unwrap();

    let mut x = node(NodeKind::Standard, "X", "x");
    let mut y = node(NodeKind::Standard, "Y", "y");
    x.parent_node_id = Some(y.id);
    y.parent_node_id = Some(x.id);
    let start = node(NodeKind::Start, "S", "s");
    assert!(matches!(
        alice.save_nodes(game.id, vec![start.clone(), x, y]),
        Err(GatewayError::InvalidInput(_))
    ));

    let mut own = node(NodeKind::Standard, "O", "o");
    own.parent_node_id = Some(own.id);
    assert!(matches!(alice.save_nodes(game.id, vec![own]), Err(GatewayError::InvalidInput(_))));

    let mut root = start;
    root.parent_node_link_text = "nowhere".into();
    let next = child_of(&root, NodeKind::Win, "W", "go");
    let saved = alice.save_nodes(game.id, vec![root.clone(), next]).unwrap();
    let root = saved.nodes.iter().find(|n| n.id == root.id).unwrap();
    assert!(root.parent_node_link_text.is_empty());
    assert!(alice.load_game(game.id).unwrap().nodes.iter().all(|n| n.is_root() == n.parent_node_link_text.is_empty()));
}

#[test]
fn ratings_and_records_feed_stats() {
    let store = SharedStore::new(StoryStore::in_memory());
    let alice = gateway_for(&store, "alice");
    let bob = gateway_for(&store, "bob");
    let carol = gateway_for(&store, "carol");
    let game = alice.create_game("Cave", "Dark").unwrap();

    bob.record_play(game.id, PlayResult::Win).unwrap();
    carol.record_play(game.id, PlayResult::Lose).unwrap();
    bob.record_play(game.id, PlayResult::Lose).unwrap();
    bob.rate_game(game.id, 5).unwrap();
    carol.rate_game(game.id, 2).unwrap();
    assert!(matches!(bob.rate_game(game.id, 0), Err(GatewayError::InvalidInput(_))));
    assert_eq!(alice.rate_game(game.id, 5), Err(GatewayError::Forbidden));

    let stats = alice.find_game(game.id).unwrap().stats;
    assert_eq!((stats.plays, stats.wins, stats.losses), (3, 1, 2));
    assert_eq!(stats.rating_count, 2);
    assert_eq!(stats.average_rating, Some(3.5));

    let missing = Uuid::now_v7();
    assert_eq!(bob.record_play(missing, PlayResult::Win).map(|_| ()), Err(GatewayError::NotFound(missing)));
}

#[test]
fn search_filters_orders_and_pages() {
    let store = SharedStore::new(StoryStore::in_memory());
    let alice = gateway_for(&store, "alice");
    let bob = gateway_for(&store, "bob");
    for name in ["Cavern", "apple cave", "Bridge"] {
        alice.create_game(name, "by alice").unwrap();
    }
    bob.create_game("Cave of Bob", "by bob").unwrap();

    let caves = alice
        .search_games(&SearchQuery { name: Some("CAV".into()), ..Default::default() })
        .unwrap();
    let names: Vec<_> = caves.items.iter().map(|g| g.name.as_str()).collect();
    assert_eq!(names, vec!["Cave of Bob", "Cavern", "apple cave"]);

    let bobs = alice
        .search_games(&SearchQuery { author: Some("BOB".into()), ..Default::default() })
        .unwrap();
    assert_eq!(bobs.items.len(), 1);

    let first = alice.search_games(&SearchQuery { limit: Some(3), ..Default::default() }).unwrap();
    assert_eq!(first.items.len(), 3);
    assert_eq!(first.next_cursor, Some(3));
    let rest = alice
        .search_games(&SearchQuery { limit: Some(3), cursor: first.next_cursor, ..Default::default() })
        .unwrap();
    assert_eq!(rest.items.len(), 1);
    assert_eq!(rest.next_cursor, None);

    assert!(matches!(
        alice.search_games(&SearchQuery { limit: Some(0), ..Default::default() }),
        Err(GatewayError::InvalidInput(_))
    ));
}

#[test]
fn store_file_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("stories.ron");

    let store = SharedStore::new(StoryStore::open(&path).unwrap());
    let alice = gateway_for(&store, "alice");
    let game = alice.create_game("Cave", "Dark").unwrap();
    let a = node(NodeKind::Start, "A", "a");
    let b = child_of(&a, NodeKind::Win, "B", "go");
    alice.save_nodes(game.id, vec![a, b]).unwrap();
    gateway_for(&store, "bob").rate_game(game.id, 4).unwrap();

    let on_disk = persist::load_from_path(&path).unwrap();
    assert_eq!(&on_disk, store.read().unwrap().state());

    let reopened = StoryStore::open(&path).unwrap();
    let loaded = reopened.game_with_nodes(game.id).unwrap();
    assert_eq!(loaded.nodes.len(), 2);
    assert_eq!(reopened.find_game(game.id).unwrap().stats.rating_count, 1);
}

// --- settings ---

#[test]
fn settings_fill_defaults_and_snap() {
    use story_loom::persistence::settings::AppSettings;

    let s: AppSettings = serde_json::from_str(r#"{ "api_port": 9000 }"#).unwrap();
    assert_eq!(s.api_endpoint(), "127.0.0.1:9000");
    assert_eq!(s.user_id, "local");
    assert!(s.snap_to_grid);
    assert_eq!(s.snap(22.0), 15.0);
    assert_eq!(s.snap(23.0), 30.0);

    let off = AppSettings { snap_to_grid: false, ..AppSettings::default() };
    assert_eq!(off.snap(22.0), 22.0);
    assert!(off.store_path().ends_with("stories.ron"));
}
