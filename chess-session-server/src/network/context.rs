//! Server Context
//!
//! Handles shared by every connection task, plus the one place sessions are
//! concluded: persisted, reported to the rating store and announced to both
//! players.

use std::sync::Arc;

use chrono::{Local, NaiveDateTime, Timelike};
use tracing::{debug, error, info, warn};

use crate::game::rules::RulesEngine;
use crate::game::session::{EndReason, PlayerId, SessionSnapshot};
use crate::network::matchmaking::MatchmakingQueue;
use crate::network::protocol::PlayServerMessage;
use crate::network::registry::{SessionRegistry, SharedSession};
use crate::network::server::ServerConfig;
use crate::ratings::{MatchOutcome, RatingStore};
use crate::replay::store::ReplayStore;

/// Shared server state.
pub struct ServerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Live sessions and participants.
    pub registry: SessionRegistry,
    /// Players waiting for an opponent.
    pub queue: MatchmakingQueue,
    /// Finished sessions.
    pub replays: ReplayStore,
    /// Board interpretation.
    pub rules: Arc<dyn RulesEngine>,
    /// Outcome reporting.
    pub ratings: Arc<dyn RatingStore>,
}

impl ServerContext {
    /// Build a context; replays go under `config.replay_dir`.
    pub fn new(
        config: ServerConfig,
        rules: Arc<dyn RulesEngine>,
        ratings: Arc<dyn RatingStore>,
    ) -> Self {
        let replays = ReplayStore::new(config.replay_dir.clone());
        Self {
            config,
            registry: SessionRegistry::new(),
            queue: MatchmakingQueue::new(),
            replays,
            rules,
            ratings,
        }
    }

    /// End `session` for `reason`. Returns false if it had already ended.
    pub async fn end_session(&self, session: &SharedSession, reason: EndReason) -> bool {
        let record = session.write().await.end(reason);
        match record {
            Some(record) => {
                self.finish(record).await;
                true
            }
            None => false,
        }
    }

    /// Conclude a session that has just ended, then tell both players.
    ///
    /// Only call with a record returned by the first `Session::end`.
    pub async fn finish(&self, record: SessionSnapshot) {
        self.finish_with_notice(&record, &record).await;
    }

    /// Persist and report `record`, but announce `notice` to the players.
    async fn finish_with_notice(&self, record: &SessionSnapshot, notice: &SessionSnapshot) {
        info!(
            session_id = %record.id,
            winner = ?record.winner,
            moves = record.moves.len(),
            "Session ended"
        );
        self.conclude(record).await;
        self.notify_players(notice).await;
    }

    /// Persist the replay and report the outcome.
    async fn conclude(&self, record: &SessionSnapshot) {
        match self.replays.save(record, ended_at()).await {
            Ok(key) => debug!(session_id = %record.id, key = %key, "Replay key assigned"),
            Err(e) => error!(session_id = %record.id, error = %e, "Failed to persist replay"),
        }

        if let Err(e) = self.ratings.record_outcome(&MatchOutcome::from_snapshot(record)) {
            warn!(session_id = %record.id, error = %e, "Failed to report outcome");
        }
    }

    /// Send `record` to whichever of its players are still connected.
    pub async fn notify_players(&self, record: &SessionSnapshot) {
        for player_id in [record.white, record.black].into_iter().flatten() {
            let message = PlayServerMessage::Session(record.clone());
            if !self.registry.send_to_player(player_id, message).await {
                debug!(player_id = %player_id, session_id = %record.id, "Player already gone");
            }
        }
    }

    /// Tear down everything a departing player holds.
    ///
    /// Queued players are simply dropped from the queue. Seated players end
    /// their session (the opponent wins if nothing was decided yet) and give
    /// up their seat; the session is evicted once both seats are empty.
    pub async fn disconnect_player(&self, player_id: PlayerId) {
        let Some(session_id) = self.registry.unregister_player(player_id).await else {
            if self.queue.remove(player_id).await {
                info!(player_id = %player_id, "Player left the queue");
            }
            return;
        };

        let Some(session) = self.registry.get_session(&session_id).await else {
            return;
        };

        // The stored record keeps both seats; the survivor's copy shows the
        // departed seat as empty.
        let (ended, empty) = {
            let mut session = session.write().await;
            let Some(color) = session.color_of(player_id) else {
                return;
            };
            let record = session.end(EndReason::PlayerLeft(color));
            let empty = session.release(color);
            (record.map(|record| (record, session.snapshot())), empty)
        };

        info!(player_id = %player_id, session_id = %session_id, "Player left session");
        if let Some((record, notice)) = ended {
            self.finish_with_notice(&record, &notice).await;
        }
        if empty && self.registry.remove_session(&session_id).await {
            debug!(session_id = %session_id, "Session evicted");
        }
    }
}

/// Replay timestamp: local time, whole seconds.
fn ended_at() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}
