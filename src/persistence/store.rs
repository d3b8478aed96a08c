use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::story::graph::{GameId, StoryGame, StoryGraph, StoryNode, UserId};
use super::gateway::GatewayError;
use super::persist::{self, StoreState};

pub const DEFAULT_PAGE_LIMIT: usize = 50;
pub const MAX_PAGE_LIMIT: usize = 100;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayResult {
    Win,
    Lose,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayRecord {
    pub id: Uuid,
    pub game_id: GameId,
    pub player_id: UserId,
    pub result: PlayResult,
    pub played_at: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRating {
    pub id: Uuid,
    pub game_id: GameId,
    pub player_id: UserId,
    pub rating: u8,
    pub rated_at: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStats {
    pub plays: usize,
    pub wins: usize,
    pub losses: usize,
    pub rating_count: usize,
    pub average_rating: Option<f32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSummary {
    pub id: GameId,
    pub name: String,
    pub description: String,
    pub is_public: bool,
    pub author_id: UserId,
    pub author_name: String,
    pub stats: GameStats,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_public: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub cursor: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<usize>,
}

fn now_unix() -> i64 { OffsetDateTime::now_utc().unix_timestamp() }

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Games, authors, play records and ratings. With a backing path every
/// mutation is written through to the state file before it becomes visible.
#[derive(Clone, Debug, Default)]
pub struct StoryStore {
    state: StoreState,
    path: Option<PathBuf>,
}

impl StoryStore {
    /// A store that never touches disk.
    pub fn in_memory() -> Self { Self::default() }

    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let state = persist::load_or_default(path)?;
        log::info!("opened story store {} ({} games)", path.display(), state.games.len());
        Ok(Self { state, path: Some(path.to_path_buf()) })
    }

    pub fn state(&self) -> &StoreState { &self.state }

    /// Apply `f` to a copy of the state, persist the copy, then swap it in.
    /// A failed write leaves the visible state untouched.
    fn mutate<T>(&mut self, f: impl FnOnce(&mut StoreState) -> Result<T, GatewayError>) -> Result<T, GatewayError> {
        let mut next = self.state.clone();
        let out = f(&mut next)?;
        if let Some(path) = &self.path {
            persist::save_to_path(&next, path)?;
        }
        self.state = next;
        Ok(out)
    }

    pub fn author_name(&self, user: &UserId) -> Option<&str> {
        self.state.authors.get(user).map(String::as_str)
    }

    pub fn upsert_author(&mut self, user: &UserId, name: &str) -> Result<(), GatewayError> {
        let (user, name) = (user.clone(), name.to_string());
        self.mutate(move |s| {
            s.authors.insert(user, name);
            Ok(())
        })
    }

    fn stats(state: &StoreState, id: GameId) -> GameStats {
        let mut stats = GameStats::default();
        for r in state.records.iter().filter(|r| r.game_id == id) {
            stats.plays += 1;
            match r.result {
                PlayResult::Win => stats.wins += 1,
                PlayResult::Lose => stats.losses += 1,
            }
        }
        let ratings: Vec<u8> = state.ratings.iter().filter(|r| r.game_id == id).map(|r| r.rating).collect();
        stats.rating_count = ratings.len();
        if !ratings.is_empty() {
            let sum: u32 = ratings.iter().map(|r| *r as u32).sum();
            stats.average_rating = Some(sum as f32 / ratings.len() as f32);
        }
        stats
    }

    fn summarize(state: &StoreState, game: &StoryGame) -> GameSummary {
        GameSummary {
            id: game.id,
            name: game.name.clone(),
            description: game.description.clone(),
            is_public: game.is_public,
            author_id: game.author_id.clone(),
            author_name: state.authors.get(&game.author_id).cloned().unwrap_or_default(),
            stats: Self::stats(state, game.id),
        }
    }

    pub fn find_game(&self, id: GameId) -> Result<GameSummary, GatewayError> {
        let game = self.state.games.get(&id).ok_or(GatewayError::NotFound(id))?;
        Ok(Self::summarize(&self.state, game))
    }

    pub fn game_with_nodes(&self, id: GameId) -> Result<StoryGame, GatewayError> {
        self.state.games.get(&id).cloned().ok_or(GatewayError::NotFound(id))
    }

    pub fn create_game(&mut self, author: &UserId, name: &str, description: &str) -> Result<StoryGame, GatewayError> {
        if name.trim().is_empty() || description.trim().is_empty() {
            return Err(GatewayError::InvalidInput("name and description are required".into()));
        }
        let game = StoryGame {
            id: Uuid::now_v7(),
            name: name.to_string(),
            description: description.to_string(),
            is_public: false,
            author_id: author.clone(),
            nodes: Vec::new(),
        };
        let created = game.clone();
        self.mutate(move |s| {
            s.authors.entry(game.author_id.clone()).or_default();
            s.games.insert(game.id, game);
            Ok(())
        })?;
        log::info!("game {} created by {}", created.id, author);
        Ok(created)
    }

    pub fn update_game(&mut self, actor: &UserId, id: GameId, update: GameUpdate) -> Result<GameSummary, GatewayError> {
        if let Some(name) = &update.name {
            if name.trim().is_empty() {
                return Err(GatewayError::InvalidInput("name must not be empty".into()));
            }
        }
        let actor = actor.clone();
        self.mutate(move |s| {
            let game = s.games.get_mut(&id).ok_or(GatewayError::NotFound(id))?;
            if game.author_id != actor {
                return Err(GatewayError::Forbidden);
            }
            if let Some(name) = update.name { game.name = name; }
            if let Some(description) = update.description { game.description = description; }
            if let Some(is_public) = update.is_public { game.is_public = is_public; }
            let game = game.clone();
            Ok(Self::summarize(s, &game))
        })
    }

    /// Replace the full node set of a game. Rejects duplicate ids, parents that
    /// are not in the submitted set, parent cycles, and ids that belong to
    /// another game. Link text on a parentless node is dropped.
    pub fn replace_nodes(&mut self, actor: &UserId, id: GameId, mut nodes: Vec<StoryNode>) -> Result<StoryGame, GatewayError> {
        for n in nodes.iter_mut().filter(|n| n.is_root() && !n.parent_node_link_text.is_empty()) {
            log::debug!("dropping link text of root node {}", n.id);
            n.parent_node_link_text.clear();
        }
        let actor = actor.clone();
        let saved = self.mutate(move |s| {
            let game = s.games.get(&id).ok_or(GatewayError::NotFound(id))?;
            if game.author_id != actor {
                return Err(GatewayError::Forbidden);
            }
            let mut ids = HashSet::with_capacity(nodes.len());
            for n in &nodes {
                if !ids.insert(n.id) {
                    return Err(GatewayError::InvalidInput(format!("duplicate node id {}", n.id)));
                }
            }
            for n in &nodes {
                if let Some(parent) = n.parent_node_id {
                    if !ids.contains(&parent) {
                        return Err(GatewayError::InvalidInput(format!(
                            "node {} has parent {} outside this game",
                            n.id, parent
                        )));
                    }
                }
            }
            let graph = StoryGraph::from_nodes(nodes.iter().cloned());
            if let Some(n) = nodes.iter().find(|n| graph.is_ancestor(n.id, n.id)) {
                return Err(GatewayError::InvalidInput(format!("node {} is its own ancestor", n.id)));
            }
            let foreign = s
                .games
                .values()
                .filter(|g| g.id != id)
                .flat_map(|g| g.nodes.iter())
                .find(|n| ids.contains(&n.id));
            if let Some(n) = foreign {
                return Err(GatewayError::InvalidInput(format!("node {} belongs to another game", n.id)));
            }
            let game = s.games.get_mut(&id).ok_or(GatewayError::NotFound(id))?;
            game.nodes = nodes;
            Ok(game.clone())
        })?;
        log::info!("game {} saved with {} nodes", saved.id, saved.nodes.len());
        Ok(saved)
    }

    pub fn create_play_record(&mut self, player: &UserId, id: GameId, result: PlayResult) -> Result<PlayRecord, GatewayError> {
        if !self.state.games.contains_key(&id) {
            return Err(GatewayError::NotFound(id));
        }
        let record = PlayRecord {
            id: Uuid::now_v7(),
            game_id: id,
            player_id: player.clone(),
            result,
            played_at: now_unix(),
        };
        let out = record.clone();
        self.mutate(move |s| {
            s.records.push(record);
            Ok(())
        })?;
        Ok(out)
    }

    pub fn create_rating(&mut self, player: &UserId, id: GameId, rating: u8) -> Result<GameRating, GatewayError> {
        let game = self.state.games.get(&id).ok_or(GatewayError::NotFound(id))?;
        if !(1..=5).contains(&rating) {
            return Err(GatewayError::InvalidInput(format!("rating must be 1-5, got {}", rating)));
        }
        if &game.author_id == player {
            return Err(GatewayError::Forbidden);
        }
        let entry = GameRating {
            id: Uuid::now_v7(),
            game_id: id,
            player_id: player.clone(),
            rating,
            rated_at: now_unix(),
        };
        let out = entry.clone();
        self.mutate(move |s| {
            s.ratings.push(entry);
            Ok(())
        })?;
        Ok(out)
    }

    /// Name/author substring search (case-insensitive), ordered by name.
    /// The cursor is the offset of the first item of the page.
    pub fn search(&self, query: &SearchQuery) -> Result<Page<GameSummary>, GatewayError> {
        let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        if limit == 0 || limit > MAX_PAGE_LIMIT {
            return Err(GatewayError::InvalidInput(format!("limit must be 1-{}", MAX_PAGE_LIMIT)));
        }
        let name_filter = query.name.as_deref().filter(|s| !s.is_empty());
        let author_filter = query.author.as_deref().filter(|s| !s.is_empty());

        let mut matches: Vec<GameSummary> = self
            .state
            .games
            .values()
            .map(|g| Self::summarize(&self.state, g))
            .filter(|g| name_filter.is_none_or(|f| contains_ci(&g.name, f)))
            .filter(|g| author_filter.is_none_or(|f| contains_ci(&g.author_name, f)))
            .collect();
        matches.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));

        let start = query.cursor.unwrap_or(0).min(matches.len());
        let end = (start + limit).min(matches.len());
        let next_cursor = if end < matches.len() { Some(end) } else { None };
        let items = matches.drain(start..end).collect();
        Ok(Page { items, next_cursor })
    }
}
