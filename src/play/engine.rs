use std::sync::mpsc::{self, Receiver, TryRecvError};

use thiserror::Error;

use crate::persistence::gateway::{GatewayError, StoryGateway};
use crate::persistence::store::PlayResult;
use crate::story::graph::{GameId, NodeId, NodeKind, StoryGame, StoryGraph, StoryNode, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlayError {
    #[error("this story has no starting node")]
    NotStarted,
    #[error("the game is already over")]
    AlreadyFinished,
    #[error("{0} is not a branch of the current node")]
    NotABranch(NodeId),
    #[error("a game can only be rated once it is over")]
    NotFinished,
    #[error("authors cannot rate their own game")]
    OwnGame,
    #[error("rating must be between 1 and 5, got {0}")]
    InvalidRating(u8),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PlayState {
    /// No parentless node: nothing to play.
    Empty,
    Playing(NodeId),
    Finished { node: NodeId, result: PlayResult },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RateOutcome {
    /// Handed to the gateway; [`PlayEngine::is_rated`] flips once it lands.
    Submitted,
    AlreadyRated,
}

#[derive(Copy, Clone, Debug)]
enum Job {
    Record(PlayResult),
    Rate(u8),
}

/// Walks one game from its root to a Win or Lose node. One engine per play
/// session; there is no restart.
///
/// Gateway writes run on worker threads. The engine never waits for them
/// while playing; call [`PlayEngine::poll`] each frame to pick up outcomes.
pub struct PlayEngine {
    game_id: GameId,
    graph: StoryGraph,
    state: PlayState,
    own_game: bool,
    rated: bool,
    rating_in_flight: bool,
    pending: Vec<(Job, Receiver<Result<(), GatewayError>>)>,
    notice: Option<String>,
}

impl PlayEngine {
    pub fn start(game: StoryGame, viewer: Option<&UserId>) -> Self {
        let own_game = viewer.is_some_and(|v| *v == game.author_id);
        let graph = StoryGraph::from_nodes(game.nodes);
        let state = match graph.root() {
            Some(root) => PlayState::Playing(root.id),
            None => {
                log::info!("game {} has no root node", game.id);
                PlayState::Empty
            }
        };
        Self {
            game_id: game.id,
            graph,
            state,
            own_game,
            rated: false,
            rating_in_flight: false,
            pending: Vec::new(),
            notice: None,
        }
    }

    pub fn game_id(&self) -> GameId { self.game_id }
    pub fn state(&self) -> PlayState { self.state }
    pub fn is_own_game(&self) -> bool { self.own_game }
    pub fn is_rated(&self) -> bool { self.rated }

    pub fn current_node(&self) -> Option<&StoryNode> {
        match self.state {
            PlayState::Playing(id) | PlayState::Finished { node: id, .. } => self.graph.get_node(id),
            PlayState::Empty => None,
        }
    }

    /// Choices offered at the current node. Empty once finished.
    pub fn branches(&self) -> Vec<&StoryNode> {
        match self.state {
            PlayState::Playing(id) => self.graph.children_of(id),
            _ => Vec::new(),
        }
    }

    pub fn result(&self) -> Option<PlayResult> {
        match self.state {
            PlayState::Finished { result, .. } => Some(result),
            _ => None,
        }
    }

    pub fn can_rate(&self) -> bool {
        self.result().is_some() && !self.rated && !self.rating_in_flight && !self.own_game
    }

    /// Last gateway failure worth showing to the player.
    pub fn take_notice(&mut self) -> Option<String> { self.notice.take() }

    fn spawn<G>(&mut self, job: Job, gateway: &G)
    where
        G: StoryGateway + Clone + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let gw = gateway.clone();
        let game = self.game_id;
        std::thread::spawn(move || {
            let outcome = match job {
                Job::Record(result) => gw.record_play(game, result).map(|_| ()),
                Job::Rate(rating) => gw.rate_game(game, rating).map(|_| ()),
            };
            let _ = tx.send(outcome);
        });
        self.pending.push((job, rx));
    }

    fn settle(&mut self, job: Job, outcome: Result<(), GatewayError>) {
        match (job, outcome) {
            (Job::Record(_), Ok(())) => {}
            (Job::Record(result), Err(e)) => {
                log::warn!("could not record {:?} for game {}: {}", result, self.game_id, e);
                self.notice = Some(format!("Could not record result: {}", e));
            }
            (Job::Rate(_), Ok(())) => {
                self.rating_in_flight = false;
                self.rated = true;
            }
            (Job::Rate(rating), Err(e)) => {
                log::warn!("could not store rating {} for game {}: {}", rating, self.game_id, e);
                self.rating_in_flight = false;
                self.notice = Some(format!("Could not save rating: {}", e));
            }
        }
    }

    /// Collect finished gateway writes without blocking. Returns true while
    /// some are still outstanding.
    pub fn poll(&mut self) -> bool {
        for (job, rx) in std::mem::take(&mut self.pending) {
            match rx.try_recv() {
                Ok(outcome) => self.settle(job, outcome),
                Err(TryRecvError::Empty) => self.pending.push((job, rx)),
                Err(TryRecvError::Disconnected) => {
                    self.settle(job, Err(GatewayError::Persistence("worker stopped".into())))
                }
            }
        }
        !self.pending.is_empty()
    }

    /// Block until every outstanding gateway write has finished.
    pub fn wait(&mut self) {
        for (job, rx) in std::mem::take(&mut self.pending) {
            let outcome = rx
                .recv()
                .unwrap_or_else(|_| Err(GatewayError::Persistence("worker stopped".into())));
            self.settle(job, outcome);
        }
    }

    /// Follow a branch. Reaching Win or Lose finishes the game and hands the
    /// result to the gateway in the background; a failed record shows up as a
    /// notice and does not undo the finish.
    pub fn select_branch<G>(&mut self, target: NodeId, gateway: &G) -> Result<PlayState, PlayError>
    where
        G: StoryGateway + Clone + Send + 'static,
    {
        let current = match self.state {
            PlayState::Playing(id) => id,
            PlayState::Empty => return Err(PlayError::NotStarted),
            PlayState::Finished { .. } => return Err(PlayError::AlreadyFinished),
        };
        let kind = match self.graph.get_node(target) {
            Some(n) if n.parent_node_id == Some(current) => n.kind,
            _ => return Err(PlayError::NotABranch(target)),
        };
        self.state = match kind {
            NodeKind::Win => PlayState::Finished { node: target, result: PlayResult::Win },
            NodeKind::Lose => PlayState::Finished { node: target, result: PlayResult::Lose },
            NodeKind::Start | NodeKind::Standard => PlayState::Playing(target),
        };
        if let PlayState::Finished { result, .. } = self.state {
            self.spawn(Job::Record(result), gateway);
        }
        Ok(self.state)
    }

    /// Submit a rating. Only one can be in flight or stored per engine; a
    /// failed submission can be retried.
    pub fn rate<G>(&mut self, rating: u8, gateway: &G) -> Result<RateOutcome, PlayError>
    where
        G: StoryGateway + Clone + Send + 'static,
    {
        if self.result().is_none() {
            return Err(PlayError::NotFinished);
        }
        if self.own_game {
            return Err(PlayError::OwnGame);
        }
        if self.rated || self.rating_in_flight {
            return Ok(RateOutcome::AlreadyRated);
        }
        if !(1..=5).contains(&rating) {
            return Err(PlayError::InvalidRating(rating));
        }
        self.rating_in_flight = true;
        self.spawn(Job::Rate(rating), gateway);
        Ok(RateOutcome::Submitted)
    }
}
