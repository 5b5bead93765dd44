//! Session Registry
//!
//! The shared table of live sessions and connected participants. Each session
//! sits behind its own lock; the tables themselves are separate locks, and no
//! table lock is held while a session lock is awaited or a message is sent.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use crate::game::session::{PlayerId, Session, SessionId, SessionState};
use crate::network::protocol::{PlayServerMessage, SessionSummary};

/// A session shared between relay, viewer and clock tasks.
pub type SharedSession = Arc<RwLock<Session>>;

/// Connected viewer identifier, unique among viewers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ViewerId(pub u64);

impl fmt::Display for ViewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connected player.
struct PlayerEntry {
    /// Session the player is seated in, once paired.
    session_id: Option<SessionId>,
    /// Feeds the task that owns this player's socket writer.
    sender: mpsc::Sender<PlayServerMessage>,
}

/// Connected viewer.
struct ViewerEntry {
    /// Watched session; `None` until one is chosen.
    session_id: Option<SessionId>,
}

/// Live sessions and participants.
pub struct SessionRegistry {
    sessions: RwLock<BTreeMap<SessionId, SharedSession>>,
    players: RwLock<BTreeMap<PlayerId, PlayerEntry>>,
    viewers: RwLock<BTreeMap<ViewerId, ViewerEntry>>,
    next_session_id: AtomicU64,
    next_player_id: AtomicU64,
    next_viewer_id: AtomicU64,
}

impl SessionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(BTreeMap::new()),
            players: RwLock::new(BTreeMap::new()),
            viewers: RwLock::new(BTreeMap::new()),
            next_session_id: AtomicU64::new(0),
            next_player_id: AtomicU64::new(0),
            next_viewer_id: AtomicU64::new(0),
        }
    }

    // =========================================================================
    // PLAYERS
    // =========================================================================

    /// Register a new player connection.
    pub async fn register_player(&self, sender: mpsc::Sender<PlayServerMessage>) -> PlayerId {
        let id = PlayerId(self.next_player_id.fetch_add(1, Ordering::Relaxed));
        let mut players = self.players.write().await;
        players.insert(id, PlayerEntry { session_id: None, sender });
        id
    }

    /// Remove a player. Returns the session it was seated in, if any.
    pub async fn unregister_player(&self, player_id: PlayerId) -> Option<SessionId> {
        let mut players = self.players.write().await;
        players.remove(&player_id).and_then(|entry| entry.session_id)
    }

    /// Seat both players in `session_id` if both are still connected.
    ///
    /// All-or-nothing: on `Err` nobody is seated and the error lists the
    /// players that are gone.
    pub async fn attach_pair(
        &self,
        white: PlayerId,
        black: PlayerId,
        session_id: SessionId,
    ) -> Result<(), Vec<PlayerId>> {
        let mut players = self.players.write().await;
        let missing: Vec<PlayerId> = [white, black]
            .into_iter()
            .filter(|id| !players.contains_key(id))
            .collect();
        if !missing.is_empty() {
            return Err(missing);
        }

        for id in [white, black] {
            if let Some(entry) = players.get_mut(&id) {
                entry.session_id = Some(session_id);
            }
        }
        Ok(())
    }

    /// Whether a player is still connected.
    pub async fn is_connected(&self, player_id: PlayerId) -> bool {
        self.players.read().await.contains_key(&player_id)
    }

    /// Session id a player is seated in.
    pub async fn player_session_id(&self, player_id: PlayerId) -> Option<SessionId> {
        let players = self.players.read().await;
        players.get(&player_id).and_then(|entry| entry.session_id)
    }

    /// Session a player is seated in.
    pub async fn player_session(&self, player_id: PlayerId) -> Option<SharedSession> {
        let session_id = self.player_session_id(player_id).await?;
        self.get_session(&session_id).await
    }

    /// Queue a message for a player's socket.
    ///
    /// Returns false if the player is gone or its writer has stopped.
    pub async fn send_to_player(&self, player_id: PlayerId, message: PlayServerMessage) -> bool {
        let sender = {
            let players = self.players.read().await;
            match players.get(&player_id) {
                Some(entry) => entry.sender.clone(),
                None => return false,
            }
        };
        sender.send(message).await.is_ok()
    }

    /// Connected player count.
    pub async fn player_count(&self) -> usize {
        self.players.read().await.len()
    }

    // =========================================================================
    // VIEWERS
    // =========================================================================

    /// Register a new viewer connection with no session chosen.
    pub async fn register_viewer(&self) -> ViewerId {
        let id = ViewerId(self.next_viewer_id.fetch_add(1, Ordering::Relaxed));
        let mut viewers = self.viewers.write().await;
        viewers.insert(id, ViewerEntry { session_id: None });
        id
    }

    /// Record which session a viewer watches.
    pub async fn set_viewer_session(&self, viewer_id: ViewerId, session_id: Option<SessionId>) {
        let mut viewers = self.viewers.write().await;
        if let Some(entry) = viewers.get_mut(&viewer_id) {
            entry.session_id = session_id;
        }
    }

    /// Remove a viewer.
    pub async fn unregister_viewer(&self, viewer_id: ViewerId) -> Option<SessionId> {
        let mut viewers = self.viewers.write().await;
        viewers.remove(&viewer_id).and_then(|entry| entry.session_id)
    }

    /// Connected viewer count.
    pub async fn viewer_count(&self) -> usize {
        self.viewers.read().await.len()
    }

    // =========================================================================
    // SESSIONS
    // =========================================================================

    /// Allocate the next session id.
    pub fn next_session_id(&self) -> SessionId {
        SessionId(self.next_session_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Add a session to the table.
    pub async fn insert_session(&self, session: Session) -> SharedSession {
        let id = session.id();
        let shared = Arc::new(RwLock::new(session));
        let mut sessions = self.sessions.write().await;
        sessions.insert(id, shared.clone());
        shared
    }

    /// Get a session by ID.
    pub async fn get_session(&self, id: &SessionId) -> Option<SharedSession> {
        let sessions = self.sessions.read().await;
        sessions.get(id).cloned()
    }

    /// Evict a session.
    pub async fn remove_session(&self, id: &SessionId) -> bool {
        let mut sessions = self.sessions.write().await;
        sessions.remove(id).is_some()
    }

    /// Session count, live and ended-but-not-evicted.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Every `READY` session with its viewer count, by id.
    pub async fn ready_sessions(&self) -> Vec<SessionSummary> {
        let shared: Vec<SharedSession> = {
            let sessions = self.sessions.read().await;
            sessions.values().cloned().collect()
        };

        let mut summaries = Vec::new();
        for session in shared {
            let session = session.read().await;
            if session.state() == SessionState::Ready {
                summaries.push(SessionSummary { id: session.id(), viewers: session.viewers() });
            }
        }
        summaries
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
