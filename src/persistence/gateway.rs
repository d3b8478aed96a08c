use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;

use crate::story::graph::{GameId, StoryGame, StoryNode, UserId};
use super::store::{
    GameRating, GameSummary, GameUpdate, Page, PlayRecord, PlayResult, SearchQuery, StoryStore,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("game {0} not found")]
    NotFound(GameId),
    #[error("not signed in")]
    Unauthorized,
    #[error("only the author may change this game")]
    Forbidden,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl From<anyhow::Error> for GatewayError {
    fn from(e: anyhow::Error) -> Self {
        GatewayError::Persistence(e.to_string())
    }
}

/// Who is calling. Supplied by the auth layer in front of the core.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    user_id: Option<UserId>,
    display_name: Option<String>,
}

impl Session {
    pub fn authenticated(user_id: impl Into<UserId>, display_name: Option<String>) -> Self {
        Self { user_id: Some(user_id.into()), display_name }
    }

    pub fn anonymous() -> Self { Self::default() }

    pub fn user_id(&self) -> Option<&UserId> { self.user_id.as_ref() }

    pub fn display_name(&self) -> Option<&str> { self.display_name.as_deref() }

    pub fn require_user(&self) -> Result<&UserId, GatewayError> {
        self.user_id.as_ref().ok_or(GatewayError::Unauthorized)
    }
}

/// Boundary between the editing/playing core and the backing store.
pub trait StoryGateway {
    fn current_user(&self) -> Option<UserId>;
    fn load_game(&self, id: GameId) -> Result<StoryGame, GatewayError>;
    /// Replaces the whole node collection of the game.
    fn save_nodes(&self, id: GameId, nodes: Vec<StoryNode>) -> Result<StoryGame, GatewayError>;
    fn record_play(&self, id: GameId, result: PlayResult) -> Result<PlayRecord, GatewayError>;
    fn rate_game(&self, id: GameId, rating: u8) -> Result<GameRating, GatewayError>;
    fn find_game(&self, id: GameId) -> Result<GameSummary, GatewayError>;
    fn create_game(&self, name: &str, description: &str) -> Result<StoryGame, GatewayError>;
    fn update_game(&self, id: GameId, update: GameUpdate) -> Result<GameSummary, GatewayError>;
    fn search_games(&self, query: &SearchQuery) -> Result<Page<GameSummary>, GatewayError>;
}

// lets a shared gateway be handed to worker threads
impl<T: StoryGateway + ?Sized> StoryGateway for Arc<T> {
    fn current_user(&self) -> Option<UserId> { (**self).current_user() }
    fn load_game(&self, id: GameId) -> Result<StoryGame, GatewayError> { (**self).load_game(id) }
    fn save_nodes(&self, id: GameId, nodes: Vec<StoryNode>) -> Result<StoryGame, GatewayError> {
        (**self).save_nodes(id, nodes)
    }
    fn record_play(&self, id: GameId, result: PlayResult) -> Result<PlayRecord, GatewayError> {
        (**self).record_play(id, result)
    }
    fn rate_game(&self, id: GameId, rating: u8) -> Result<GameRating, GatewayError> {
        (**self).rate_game(id, rating)
    }
    fn find_game(&self, id: GameId) -> Result<GameSummary, GatewayError> { (**self).find_game(id) }
    fn create_game(&self, name: &str, description: &str) -> Result<StoryGame, GatewayError> {
        (**self).create_game(name, description)
    }
    fn update_game(&self, id: GameId, update: GameUpdate) -> Result<GameSummary, GatewayError> {
        (**self).update_game(id, update)
    }
    fn search_games(&self, query: &SearchQuery) -> Result<Page<GameSummary>, GatewayError> {
        (**self).search_games(query)
    }
}

#[derive(Clone, Debug, Default)]
pub struct SharedStore(Arc<RwLock<StoryStore>>);

impl SharedStore {
    pub fn new(store: StoryStore) -> Self { SharedStore(Arc::new(RwLock::new(store))) }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, StoryStore>, GatewayError> {
        self.0.read().map_err(|_| GatewayError::Persistence("store lock poisoned".into()))
    }

    pub fn write(&self) -> Result<RwLockWriteGuard<'_, StoryStore>, GatewayError> {
        self.0.write().map_err(|_| GatewayError::Persistence("store lock poisoned".into()))
    }
}

/// Gateway over an in-process store, acting as one session.
#[derive(Clone, Debug)]
pub struct LocalGateway {
    store: SharedStore,
    session: Session,
}

impl LocalGateway {
    pub fn new(store: SharedStore, session: Session) -> Self {
        Self { store, session }
    }

    pub fn session(&self) -> &Session { &self.session }

    fn signed_in(&self) -> Result<UserId, GatewayError> {
        let user = self.session.require_user()?.clone();
        if let Some(name) = self.session.display_name() {
            let known = self.store.read()?.author_name(&user).map(str::to_string);
            if known.as_deref() != Some(name) {
                self.store.write()?.upsert_author(&user, name)?;
            }
        }
        Ok(user)
    }
}

impl StoryGateway for LocalGateway {
    fn current_user(&self) -> Option<UserId> { self.session.user_id().cloned() }

    fn load_game(&self, id: GameId) -> Result<StoryGame, GatewayError> {
        self.session.require_user()?;
        self.store.read()?.game_with_nodes(id)
    }

    fn save_nodes(&self, id: GameId, nodes: Vec<StoryNode>) -> Result<StoryGame, GatewayError> {
        let user = self.signed_in()?;
        self.store.write()?.replace_nodes(&user, id, nodes)
    }

    fn record_play(&self, id: GameId, result: PlayResult) -> Result<PlayRecord, GatewayError> {
        let user = self.signed_in()?;
        self.store.write()?.create_play_record(&user, id, result)
    }

    fn rate_game(&self, id: GameId, rating: u8) -> Result<GameRating, GatewayError> {
        let user = self.signed_in()?;
        self.store.write()?.create_rating(&user, id, rating)
    }

    fn find_game(&self, id: GameId) -> Result<GameSummary, GatewayError> {
        self.session.require_user()?;
        self.store.read()?.find_game(id)
    }

    fn create_game(&self, name: &str, description: &str) -> Result<StoryGame, GatewayError> {
        let user = self.signed_in()?;
        self.store.write()?.create_game(&user, name, description)
    }

    fn update_game(&self, id: GameId, update: GameUpdate) -> Result<GameSummary, GatewayError> {
        let user = self.signed_in()?;
        self.store.write()?.update_game(&user, id, update)
    }

    fn search_games(&self, query: &SearchQuery) -> Result<Page<GameSummary>, GatewayError> {
        self.session.require_user()?;
        self.store.read()?.search(query)
    }
}
