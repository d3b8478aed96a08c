use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::time::{Duration, Instant};

use eframe::egui::{self, Align2, Color32, FontId, Pos2, Rect, RichText, Sense, Stroke, Vec2};

use crate::api;
use crate::editor::controller::{
    EditField, EditorIntent, EditorSession, SaveTicket, Selection, DROP_PAYLOAD_KEY,
};
use crate::editor::keys::{EditorKey, KeyBus};
use crate::persistence::gateway::{GatewayError, LocalGateway, Session, SharedStore, StoryGateway};
use crate::persistence::settings::AppSettings;
use crate::persistence::store::{GameSummary, GameUpdate, Page, PlayResult, SearchQuery};
use crate::play::engine::{PlayEngine, RateOutcome};
use crate::story::graph::{GameId, NodeId, NodeKind, StoryGame};
use crate::story::visual::CanvasPos;

const NODE_W: f32 = 200.0;
const NODE_H: f32 = 110.0;
const HANDLE_R: f32 = 6.0;
const PAGE_SIZE: usize = 10;

const RED: Color32 = Color32::from_rgb(185, 28, 28);
const GREEN: Color32 = Color32::from_rgb(4, 120, 87);
const AMBER: Color32 = Color32::from_rgb(217, 119, 6);

fn truncate(s: &str, len: usize) -> String {
    if s.chars().count() > len {
        let head: String = s.chars().take(len.saturating_sub(1)).collect();
        format!("{}...", head)
    } else {
        s.to_string()
    }
}

fn rating_color(rating: f32) -> Color32 {
    if rating < 2.0 { RED } else if rating < 4.0 { AMBER } else { GREEN }
}

fn kind_color(kind: NodeKind) -> Color32 {
    match kind {
        NodeKind::Win => GREEN,
        NodeKind::Lose => RED,
        NodeKind::Start => Color32::from_rgb(96, 165, 250),
        NodeKind::Standard => Color32::GRAY,
    }
}

// Style for toast notifications
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum NoticeStyle {
    Success,
    Error,
}

struct Notice {
    text: String,
    style: NoticeStyle,
    until: Instant,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Nav {
    Games,
    NewGame,
    Game(GameId),
    Editor(GameId),
    Play(GameId),
}

/// Side effects a screen asks for while it is being drawn.
#[derive(Default)]
struct Outbox {
    nav: Option<Nav>,
    notice: Option<(String, NoticeStyle)>,
}

impl Outbox {
    fn go(&mut self, nav: Nav) { self.nav = Some(nav); }

    fn notify(&mut self, text: impl Into<String>, style: NoticeStyle) {
        self.notice = Some((text.into(), style));
    }
}

/// Toolbar drag payload: the node kind name.
#[derive(Clone, Debug)]
struct DropPayload(String);

struct GameForm {
    summary: GameSummary,
    name: String,
    description: String,
    dirty: bool,
    updated: bool,
}

struct EditorView {
    session: EditorSession,
    // node being dragged and its offset in graph space
    drag: Option<(NodeId, Vec2)>,
    connecting: Option<NodeId>,
    pending_save: Option<(SaveTicket, Receiver<Result<StoryGame, GatewayError>>)>,
}

struct PlayView {
    engine: PlayEngine,
    summary: GameSummary,
}

enum Screen {
    Games,
    NewGame { name: String, description: String },
    Game(GameForm),
    Editor(EditorView),
    Play(PlayView),
}

pub struct StoryApp {
    settings: AppSettings,
    gateway: LocalGateway,
    keys: KeyBus,
    screen: Screen,
    notice: Option<Notice>,
    // game list
    search_name: String,
    search_author: String,
    search_cursor: usize,
    listing: Option<Page<GameSummary>>,
    listing_stale: bool,
    api_running: bool,
}

impl StoryApp {
    pub fn new(settings: AppSettings, store: SharedStore) -> Self {
        let session = Session::authenticated(settings.user_id.clone(), Some(settings.user_name.clone()));
        let mut api_running = false;
        if settings.api_enabled {
            match api::server::start_server(&settings, store.clone()) {
                Ok(()) => api_running = true,
                Err(e) => log::error!("could not start API server: {}", e),
            }
        }
        Self {
            gateway: LocalGateway::new(store, session),
            settings,
            keys: KeyBus::new(),
            screen: Screen::Games,
            notice: None,
            search_name: String::new(),
            search_author: String::new(),
            search_cursor: 0,
            listing: None,
            listing_stale: true,
            api_running,
        }
    }

    fn notify(&mut self, text: String, style: NoticeStyle) {
        self.notice = Some(Notice { text, style, until: Instant::now() + Duration::from_secs(4) });
    }

    fn navigate(&mut self, nav: Nav) {
        let next = match nav {
            Nav::Games => {
                self.listing_stale = true;
                Ok(Screen::Games)
            }
            Nav::NewGame => Ok(Screen::NewGame { name: String::new(), description: String::new() }),
            Nav::Game(id) => self.gateway.find_game(id).map(|s| Screen::Game(GameForm::new(s))),
            Nav::Editor(id) => EditorSession::load(&self.gateway, id, &self.keys)
                .map(|session| Screen::Editor(EditorView::new(session))),
            Nav::Play(id) => self.gateway.find_game(id).and_then(|summary| {
                let game = self.gateway.load_game(id)?;
                let viewer = self.gateway.current_user();
                Ok(Screen::Play(PlayView { engine: PlayEngine::start(game, viewer.as_ref()), summary }))
            }),
        };
        match next {
            // replacing an editor drops its session and with it the Escape subscription
            Ok(screen) => self.screen = screen,
            Err(GatewayError::NotFound(_)) => {
                self.notify("Uh oh. We can't find any data.".into(), NoticeStyle::Error)
            }
            Err(e) => self.notify(format!("Something went wrong: {}", e), NoticeStyle::Error),
        }
    }

    fn refresh_listing(&mut self, out: &mut Outbox) {
        let query = SearchQuery {
            name: Some(self.search_name.clone()),
            author: Some(self.search_author.clone()),
            limit: Some(PAGE_SIZE),
            cursor: Some(self.search_cursor),
        };
        match self.gateway.search_games(&query) {
            Ok(page) => self.listing = Some(page),
            Err(e) => out.notify(format!("Search failed: {}", e), NoticeStyle::Error),
        }
        self.listing_stale = false;
    }

    fn games_screen(&mut self, ui: &mut egui::Ui, out: &mut Outbox) {
        ui.horizontal(|ui| {
            let a = ui.add(egui::TextEdit::singleline(&mut self.search_name).hint_text("GAME NAME...")).changed();
            let b = ui.add(egui::TextEdit::singleline(&mut self.search_author).hint_text("AUTHOR NAME...")).changed();
            if a || b {
                self.search_cursor = 0;
                self.listing_stale = true;
            }
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if ui.button(RichText::new("Create a Game").color(GREEN)).clicked() {
                    out.go(Nav::NewGame);
                }
            });
        });
        ui.separator();
        if self.listing_stale {
            self.refresh_listing(out);
        }

        let me = self.gateway.current_user();
        let Some(page) = &self.listing else { return };
        if page.items.is_empty() {
            ui.label("No Results");
            return;
        }
        egui::ScrollArea::vertical().auto_shrink([false, true]).show(ui, |ui| {
            egui::Grid::new("games_table").striped(true).num_columns(7).show(ui, |ui| {
                for h in ["Name", "Description", "Rating", "Author", "", "", ""] {
                    ui.strong(h);
                }
                ui.end_row();
                for g in &page.items {
                    ui.label(truncate(&g.name, 30)).on_hover_text(&g.name);
                    ui.label(truncate(&g.description, 30)).on_hover_text(&g.description);
                    match g.stats.average_rating {
                        Some(r) => ui.colored_label(rating_color(r), format!("{:.1}", r)),
                        None => ui.weak("UNRATED"),
                    };
                    ui.label(&g.author_name);
                    if g.is_public {
                        ui.colored_label(GREEN, "Public");
                    } else {
                        ui.colored_label(AMBER, "Private");
                    }
                    if ui.link("Play").clicked() {
                        out.go(Nav::Play(g.id));
                    }
                    if me.as_ref() == Some(&g.author_id) {
                        if ui.link("Edit").clicked() {
                            out.go(Nav::Game(g.id));
                        }
                    } else {
                        ui.label("");
                    }
                    ui.end_row();
                }
            });
        });
        let has_next = page.next_cursor;
        ui.horizontal(|ui| {
            if ui.add_enabled(self.search_cursor > 0, egui::Button::new("Previous")).clicked() {
                self.search_cursor = self.search_cursor.saturating_sub(PAGE_SIZE);
                self.listing_stale = true;
            }
            if ui.add_enabled(has_next.is_some(), egui::Button::new("Next")).clicked() {
                if let Some(next) = has_next {
                    self.search_cursor = next;
                    self.listing_stale = true;
                }
            }
        });
    }

    fn show_notice(&mut self, ctx: &egui::Context) {
        let Some(n) = &self.notice else { return };
        if Instant::now() >= n.until {
            self.notice = None;
            return;
        }
        let color = match n.style {
            NoticeStyle::Success => GREEN,
            NoticeStyle::Error => RED,
        };
        egui::Area::new(egui::Id::new("notice_toast"))
            .anchor(Align2::RIGHT_BOTTOM, [-16.0, -16.0])
            .show(ctx, |ui| {
                egui::Frame::popup(ui.style()).show(ui, |ui| {
                    ui.colored_label(color, &n.text);
                });
            });
        ctx.request_repaint_after(Duration::from_millis(250));
    }
}

fn new_game_screen(ui: &mut egui::Ui, name: &mut String, description: &mut String, gateway: &LocalGateway, out: &mut Outbox) {
    ui.heading("Create a new Game");
    ui.label("Game Name *");
    ui.add(egui::TextEdit::singleline(name).desired_width(400.0));
    ui.label("Description *");
    ui.add(egui::TextEdit::multiline(description).desired_width(400.0));
    let valid = !name.trim().is_empty() && !description.trim().is_empty();
    ui.horizontal(|ui| {
        if ui.add_enabled(valid, egui::Button::new(RichText::new("Create Game").color(GREEN))).clicked() {
            match gateway.create_game(name, description) {
                Ok(game) => {
                    out.notify("Game created.", NoticeStyle::Success);
                    out.go(Nav::Game(game.id));
                }
                Err(e) => out.notify(format!("Something went wrong: {}", e), NoticeStyle::Error),
            }
        }
        if ui.button("Cancel").clicked() {
            out.go(Nav::Games);
        }
    });
}

impl GameForm {
    fn new(summary: GameSummary) -> Self {
        Self {
            name: summary.name.clone(),
            description: summary.description.clone(),
            summary,
            dirty: false,
            updated: false,
        }
    }

    fn apply(&mut self, gateway: &LocalGateway, update: GameUpdate, out: &mut Outbox) -> bool {
        match gateway.update_game(self.summary.id, update) {
            Ok(s) => {
                self.summary = s;
                true
            }
            Err(e) => {
                out.notify(format!("Something went wrong: {}", e), NoticeStyle::Error);
                false
            }
        }
    }

    fn show(&mut self, ui: &mut egui::Ui, gateway: &LocalGateway, out: &mut Outbox) {
        ui.horizontal(|ui| {
            ui.weak("Editing Game");
            if self.summary.is_public {
                ui.colored_label(GREEN, "Public");
            } else {
                ui.colored_label(AMBER, "Unpublished");
            }
        });
        if self.dirty {
            ui.colored_label(AMBER, "Unsaved Changes...");
        }
        if self.updated {
            ui.colored_label(GREEN, "Changes Saved.");
        }
        ui.label("Game Name");
        if ui.add(egui::TextEdit::singleline(&mut self.name).desired_width(400.0)).changed() {
            self.dirty = true;
            self.updated = false;
        }
        ui.label("Description");
        if ui.add(egui::TextEdit::multiline(&mut self.description).desired_width(400.0)).changed() {
            self.dirty = true;
            self.updated = false;
        }

        ui.label("Stats");
        egui::Frame::group(ui.style()).show(ui, |ui| {
            let stats = &self.summary.stats;
            match stats.average_rating {
                Some(r) => ui.label(format!("Rating: {:.1} ({} ratings)", r, stats.rating_count)),
                None => ui.label("Rating: UNRATED"),
            };
            ui.label(format!("Wins: {}", stats.wins));
            ui.label(format!("Losses: {}", stats.losses));
        });

        if ui.add_enabled(self.dirty, egui::Button::new("Save Changes")).clicked() {
            let update = GameUpdate {
                name: Some(self.name.clone()),
                description: Some(self.description.clone()),
                is_public: None,
            };
            if self.apply(gateway, update, out) {
                self.dirty = false;
                self.updated = true;
            }
        }
        let (label, publish) = if self.summary.is_public { ("Unpublish Game", false) } else { ("Publish Game", true) };
        if ui.button(label).clicked() {
            self.apply(gateway, GameUpdate { is_public: Some(publish), ..Default::default() }, out);
        }
        ui.horizontal(|ui| {
            if ui.button("Node Editor").clicked() {
                out.go(Nav::Editor(self.summary.id));
            }
            if ui.button("Play").clicked() {
                out.go(Nav::Play(self.summary.id));
            }
            if ui.button("Back").clicked() {
                out.go(Nav::Games);
            }
        });
    }
}

impl EditorView {
    fn new(session: EditorSession) -> Self {
        Self { session, drag: None, connecting: None, pending_save: None }
    }

    fn poll_save(&mut self, ctx: &egui::Context, out: &mut Outbox) {
        let Some((ticket, rx)) = self.pending_save.take() else { return };
        let outcome = match rx.try_recv() {
            Ok(outcome) => outcome,
            Err(TryRecvError::Empty) => {
                self.pending_save = Some((ticket, rx));
                ctx.request_repaint_after(Duration::from_millis(50));
                return;
            }
            Err(TryRecvError::Disconnected) => Err(GatewayError::Persistence("save worker stopped".into())),
        };
        match self.session.finish_save(&ticket, outcome) {
            Ok(()) => out.notify("Game saved.", NoticeStyle::Success),
            Err(_) => out.notify("Failed to save.", NoticeStyle::Error),
        }
    }

    fn start_save(&mut self, gateway: &LocalGateway, out: &mut Outbox) {
        match self.session.begin_save() {
            Ok(ticket) => {
                let (tx, rx) = mpsc::channel();
                let job = ticket.clone();
                let gw = gateway.clone();
                std::thread::spawn(move || {
                    let _ = tx.send(gw.save_nodes(job.game_id, job.nodes));
                });
                self.pending_save = Some((ticket, rx));
            }
            Err(e) => out.notify(e.to_string(), NoticeStyle::Error),
        }
    }

    fn show(&mut self, ui: &mut egui::Ui, gateway: &LocalGateway, settings: &AppSettings, out: &mut Outbox) {
        self.session.pump_keys();
        self.poll_save(ui.ctx(), out);

        ui.horizontal(|ui| {
            ui.weak("Editing");
            ui.label(self.session.game_name());
            ui.weak(format!("{} nodes", self.session.graph().node_count()));
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                let gate = self.session.save_gate();
                let text = RichText::new(gate.button().label()).color(GREEN).monospace();
                if ui.add_enabled(gate.enabled(), egui::Button::new(text)).clicked() {
                    self.start_save(gateway, out);
                }
                if ui.button("Back").clicked() {
                    out.go(Nav::Game(self.session.game_id()));
                }
            });
        });
        ui.horizontal(|ui| {
            for kind in NodeKind::ALL {
                let id = egui::Id::new((DROP_PAYLOAD_KEY, kind.as_str()));
                ui.dnd_drag_source(id, DropPayload(kind.as_str().to_string()), |ui| {
                    egui::Frame::group(ui.style()).show(ui, |ui| {
                        ui.label(RichText::new(format!("{} Node", kind)).monospace().color(kind_color(kind)));
                    });
                });
            }
        });

        let mut intents = self.canvas(ui, settings);
        intents.extend(self.flyouts(ui.ctx()));
        for intent in intents {
            if let Err(e) = self.session.apply(intent) {
                out.notify(e.to_string(), NoticeStyle::Error);
            }
        }
    }

    fn canvas(&mut self, ui: &mut egui::Ui, settings: &AppSettings) -> Vec<EditorIntent> {
        let mut intents = Vec::new();
        let (rect, bg) = ui.allocate_exact_size(ui.available_size(), Sense::click_and_drag());
        let painter = ui.painter_at(rect);
        painter.rect_filled(rect, 0.0, Color32::from_gray(10));

        let origin = rect.min;
        let viewport = self.session.viewport;
        let zoom = viewport.zoom;
        let to_screen = move |p: CanvasPos| -> Pos2 {
            let c = viewport.unproject(p);
            origin + Vec2::new(c.x, c.y)
        };
        let pointer = ui.input(|i| i.pointer.interact_pos());

        if let Some(payload) = bg.dnd_release_payload::<DropPayload>() {
            if let Some(p) = pointer {
                intents.push(EditorIntent::DropNode {
                    payload: payload.0.clone(),
                    at: CanvasPos::new(p.x - origin.x, p.y - origin.y),
                });
            }
        }

        let graph = self.session.visual();
        let mut rects: HashMap<NodeId, Rect> = HashMap::with_capacity(graph.nodes.len());
        for n in &graph.nodes {
            let mut p = n.position;
            if let Some((id, off)) = self.drag {
                if id == n.id {
                    p.x += off.x;
                    p.y += off.y;
                }
            }
            rects.insert(n.id, Rect::from_min_size(to_screen(p), Vec2::new(NODE_W, NODE_H) * zoom));
        }

        // Branches first so nodes draw over them
        let edge_stroke = Stroke::new(2.0, Color32::WHITE);
        for e in &graph.edges {
            let (Some(src), Some(dst)) = (rects.get(&e.source), rects.get(&e.target)) else { continue };
            let a = src.center_bottom();
            let b = dst.center_top();
            let mid_y = (a.y + b.y) * 0.5;
            painter.line_segment([a, Pos2::new(a.x, mid_y)], edge_stroke);
            painter.line_segment([Pos2::new(a.x, mid_y), Pos2::new(b.x, mid_y)], edge_stroke);
            painter.line_segment([Pos2::new(b.x, mid_y), b], edge_stroke);

            let at = Pos2::new((a.x + b.x) * 0.5, mid_y);
            let text = if e.label.is_empty() {
                RichText::new("No Text!").color(RED)
            } else {
                RichText::new(truncate(&e.label, 20))
            };
            let label_rect = Rect::from_center_size(at, Vec2::new(140.0, 20.0));
            if ui.put(label_rect, egui::Button::new(text.small())).clicked() {
                intents.push(EditorIntent::EditEdge(e.id.clone()));
            }
            let del_rect = Rect::from_center_size(at + Vec2::new(82.0, 0.0), Vec2::splat(20.0));
            if ui.put(del_rect, egui::Button::new("x").small()).on_hover_text("Delete branch").clicked() {
                intents.push(EditorIntent::DeleteEdge(e.id.clone()));
            }
        }

        let selection = self.session.selection();
        let title_font = FontId::monospace((13.0 * zoom).clamp(8.0, 20.0));
        let body_font = FontId::monospace((11.0 * zoom).clamp(7.0, 16.0));
        let mut released_link: Option<(NodeId, Pos2)> = None;
        for n in &graph.nodes {
            let Some(&r) = rects.get(&n.id) else { continue };
            let resp = ui.interact(r, egui::Id::new(("story_node", n.id)), Sense::click_and_drag());
            if resp.dragged() {
                let d = resp.drag_delta() / zoom;
                let off = match self.drag {
                    Some((id, off)) if id == n.id => off + d,
                    _ => d,
                };
                self.drag = Some((n.id, off));
            }
            if resp.drag_stopped() {
                if let Some((id, off)) = self.drag.take() {
                    if id == n.id {
                        let to = CanvasPos::new(
                            settings.snap(n.position.x + off.x),
                            settings.snap(n.position.y + off.y),
                        );
                        intents.push(EditorIntent::DragStop { id, to });
                    }
                }
            }

            let valid = !n.title.is_empty() && !n.body.is_empty();
            let selected = selection == Selection::Node(n.id);
            let border = if !valid { RED } else if selected { AMBER } else { Color32::WHITE };
            painter.rect_filled(r, 2.0, Color32::BLACK);
            painter.rect_stroke(r, 2.0, Stroke::new(if selected { 3.0 } else { 2.0 }, border), egui::StrokeKind::Inside);
            let (title, title_color) = if n.title.is_empty() {
                ("No Title!".to_string(), RED)
            } else {
                (truncate(&n.title, 22), Color32::WHITE)
            };
            painter.text(r.center_top() + Vec2::new(0.0, 6.0 * zoom), Align2::CENTER_TOP, title, title_font.clone(), title_color);
            let (body, body_color) = if n.body.is_empty() {
                ("No Text!".to_string(), RED)
            } else {
                (truncate(&n.body, 28), Color32::LIGHT_GRAY)
            };
            painter.text(r.left_top() + Vec2::new(8.0, 30.0) * zoom, Align2::LEFT_TOP, body, body_font.clone(), body_color);
            painter.text(r.right_top() + Vec2::new(-4.0, -4.0), Align2::RIGHT_BOTTOM, n.kind.as_str(), body_font.clone(), kind_color(n.kind));
            if n.is_root {
                painter.text(r.left_top() + Vec2::new(0.0, -4.0), Align2::LEFT_BOTTOM, "ROOT", body_font.clone(), Color32::GRAY);
            }

            let btn_w = (r.width() - 18.0) * 0.5;
            let row_y = r.bottom() - 26.0 * zoom.max(0.6);
            let remove_rect = Rect::from_min_size(Pos2::new(r.left() + 6.0, row_y), Vec2::new(btn_w, 20.0));
            let edit_rect = Rect::from_min_size(Pos2::new(r.center().x + 3.0, row_y), Vec2::new(btn_w, 20.0));
            if ui.put(remove_rect, egui::Button::new("Remove").small()).clicked() {
                intents.push(EditorIntent::RemoveNode(n.id));
            }
            if ui.put(edit_rect, egui::Button::new("Edit").small()).clicked() {
                intents.push(EditorIntent::EditNode(n.id));
            }

            if n.kind.accepts_parent() {
                painter.circle_filled(r.center_top(), HANDLE_R, kind_color(n.kind));
            }
            if n.kind.offers_branches() {
                let h = r.center_bottom();
                painter.circle_filled(h, HANDLE_R, if n.kind == NodeKind::Start { GREEN } else { Color32::WHITE });
                let handle = ui.interact(
                    Rect::from_center_size(h, Vec2::splat(HANDLE_R * 3.0)),
                    egui::Id::new(("branch_handle", n.id)),
                    Sense::drag(),
                );
                if handle.drag_started() {
                    self.connecting = Some(n.id);
                }
                if handle.drag_stopped() {
                    if let (Some(source), Some(p)) = (self.connecting.take(), pointer) {
                        released_link = Some((source, p));
                    }
                }
            }
        }

        if let Some((source, p)) = released_link {
            let target = graph.nodes.iter().find(|n| {
                n.id != source
                    && n.kind.accepts_parent()
                    && rects.get(&n.id).is_some_and(|r| {
                        Rect::from_center_size(r.center_top(), Vec2::splat(HANDLE_R * 5.0)).contains(p)
                    })
            });
            if let Some(target) = target {
                intents.push(EditorIntent::Connect { source, target: target.id });
            }
        } else if let Some(source) = self.connecting {
            match (rects.get(&source), pointer) {
                (Some(r), Some(p)) if ui.input(|i| i.pointer.primary_down()) => {
                    painter.line_segment([r.center_bottom(), p], Stroke::new(2.0, AMBER));
                }
                _ => self.connecting = None,
            }
        }

        if bg.dragged() && self.connecting.is_none() {
            let d = bg.drag_delta();
            self.session.viewport.pan_by(d.x, d.y);
        }
        if bg.hovered() {
            let scroll = ui.input(|i| i.raw_scroll_delta.y);
            if scroll != 0.0 {
                if let Some(p) = pointer {
                    let factor = (1.0 + scroll * 0.001).clamp(0.9, 1.1);
                    self.session.viewport.zoom_at(CanvasPos::new(p.x - origin.x, p.y - origin.y), factor);
                }
            }
        }
        if bg.clicked() {
            intents.push(EditorIntent::PaneClicked);
        }
        intents
    }

    fn flyouts(&mut self, ctx: &egui::Context) -> Vec<EditorIntent> {
        let mut intents = Vec::new();
        let mut close = false;
        if let Some(node) = self.session.editing_node() {
            let id = node.id;
            let mut title = node.title_text.clone();
            let mut body = node.body_text.clone();
            egui::Window::new("Editing Node")
                .id(egui::Id::new("node_flyout"))
                .anchor(Align2::RIGHT_TOP, [-16.0, 96.0])
                .collapsible(false)
                .resizable(false)
                .show(ctx, |ui| {
                    ui.label("Title");
                    if ui.add(egui::TextEdit::singleline(&mut title).desired_width(320.0)).changed() {
                        intents.push(EditorIntent::EditField { id, field: EditField::Title, value: title.clone() });
                    }
                    ui.label("Text");
                    if ui.add(egui::TextEdit::multiline(&mut body).desired_rows(10).desired_width(320.0)).changed() {
                        intents.push(EditorIntent::EditField { id, field: EditField::Body, value: body.clone() });
                    }
                    if ui.button("Close").clicked() {
                        close = true;
                    }
                });
        } else if let Some(node) = self.session.editing_edge() {
            let id = node.id;
            let mut text = node.parent_node_link_text.clone();
            egui::Window::new("Editing Branch")
                .id(egui::Id::new("edge_flyout"))
                .anchor(Align2::RIGHT_TOP, [-16.0, 96.0])
                .collapsible(false)
                .resizable(false)
                .show(ctx, |ui| {
                    ui.label("Choice text");
                    if ui.add(egui::TextEdit::singleline(&mut text).desired_width(320.0)).changed() {
                        intents.push(EditorIntent::EditField { id, field: EditField::LinkText, value: text.clone() });
                    }
                    if ui.button("Close").clicked() {
                        close = true;
                    }
                });
        }
        if close {
            self.session.deselect();
        }
        intents
    }
}

impl PlayView {
    fn show(&mut self, ui: &mut egui::Ui, gateway: &LocalGateway, out: &mut Outbox) {
        ui.heading(&self.summary.name);
        ui.horizontal(|ui| {
            ui.weak(&self.summary.description);
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                ui.weak(&self.summary.author_name);
            });
        });
        ui.separator();

        if self.engine.poll() {
            ui.ctx().request_repaint_after(Duration::from_millis(50));
        }
        if let Some(msg) = self.engine.take_notice() {
            out.notify(msg, NoticeStyle::Error);
        }

        let Some(node) = self.engine.current_node() else {
            ui.colored_label(RED, "Uh oh. We can't find any data.");
            if ui.button("Back").clicked() {
                out.go(Nav::Games);
            }
            return;
        };
        ui.label(RichText::new(&node.title_text).monospace().strong());
        ui.label(RichText::new(&node.body_text).monospace());
        ui.add_space(16.0);

        let choices: Vec<(NodeId, String)> = self
            .engine
            .branches()
            .iter()
            .map(|b| (b.id, b.parent_node_link_text.clone()))
            .collect();
        let mut picked = None;
        ui.horizontal_wrapped(|ui| {
            for (id, label) in &choices {
                if ui.button(RichText::new(label).monospace()).clicked() {
                    picked = Some(*id);
                }
            }
        });
        if let Some(id) = picked {
            if let Err(e) = self.engine.select_branch(id, gateway) {
                out.notify(e.to_string(), NoticeStyle::Error);
            }
        }

        if let Some(result) = self.engine.result() {
            ui.add_space(16.0);
            match result {
                PlayResult::Win => ui.colored_label(GREEN, "Congratulations, you've won."),
                PlayResult::Lose => ui.colored_label(RED, "Sorry, you've lost."),
            };
            if self.engine.can_rate() {
                ui.label("Do you want to rate this game?");
                ui.horizontal(|ui| {
                    for rating in 1..=5u8 {
                        if ui.button(rating.to_string()).clicked() {
                            match self.engine.rate(rating, gateway) {
                                Ok(RateOutcome::Submitted) | Ok(RateOutcome::AlreadyRated) => {}
                                Err(e) => out.notify(format!("Rating failed: {}", e), NoticeStyle::Error),
                            }
                        }
                    }
                });
            } else {
                ui.label("Thank you!");
            }
            if ui.button("Back to games").clicked() {
                out.go(Nav::Games);
            }
        }
    }
}

impl eframe::App for StoryApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if ctx.input(|i| i.key_pressed(egui::Key::Escape)) {
            self.keys.dispatch(EditorKey::Escape);
        }
        let mut out = Outbox::default();

        egui::TopBottomPanel::top("top_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.label(RichText::new("Story-Loom").strong());
                if ui.button("Games").clicked() {
                    out.go(Nav::Games);
                }
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    ui.weak(&self.settings.user_name);
                    if ui.checkbox(&mut self.settings.snap_to_grid, "Snap to grid").changed() {
                        if let Err(e) = self.settings.save() {
                            log::warn!("could not save settings: {}", e);
                        }
                    }
                    if api::server::is_running() {
                        ui.weak(format!("API on {}", self.settings.api_endpoint()));
                    }
                });
            });
        });

        egui::CentralPanel::default().show(ctx, |ui| match &mut self.screen {
            Screen::Games => self.games_screen(ui, &mut out),
            Screen::NewGame { name, description } => new_game_screen(ui, name, description, &self.gateway, &mut out),
            Screen::Game(form) => form.show(ui, &self.gateway, &mut out),
            Screen::Editor(view) => view.show(ui, &self.gateway, &self.settings, &mut out),
            Screen::Play(view) => view.show(ui, &self.gateway, &mut out),
        });

        if let Some((text, style)) = out.notice.take() {
            self.notify(text, style);
        }
        if let Some(nav) = out.nav.take() {
            self.navigate(nav);
        }
        self.show_notice(ctx);
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        if self.api_running {
            api::server::stop_server();
        }
    }
}
