//! Matchmaking
//!
//! Waiting players are paired first-come-first-served by a single background
//! task. Each pair gets a fresh session that only goes live once both players
//! are confirmed to still be connected.

use std::sync::Arc;

use tokio::sync::{broadcast, Mutex, Notify};
use tracing::{debug, info, warn};

use crate::game::clock::Clocks;
use crate::game::queue::PairingQueue;
use crate::game::rules::Color;
use crate::game::session::{EndReason, PlayerId, Session};
use crate::network::context::ServerContext;
use crate::network::protocol::PlayServerMessage;
use crate::network::registry::SharedSession;
use crate::network::timer;

/// FIFO of waiting players with a wake-up for the pairing task.
#[derive(Debug, Default)]
pub struct MatchmakingQueue {
    waiting: Mutex<PairingQueue>,
    notify: Notify,
}

impl MatchmakingQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a player at the back.
    pub async fn enqueue(&self, player_id: PlayerId) -> bool {
        let added = self.waiting.lock().await.enqueue(player_id);
        if added {
            debug!(player_id = %player_id, "Player queued");
            self.notify.notify_one();
        }
        added
    }

    /// Put a player back at the front.
    pub async fn requeue_front(&self, player_id: PlayerId) {
        self.waiting.lock().await.requeue_front(player_id);
        self.notify.notify_one();
    }

    /// Drop a player who left while waiting.
    pub async fn remove(&self, player_id: PlayerId) -> bool {
        self.waiting.lock().await.remove(player_id)
    }

    /// Next `(white, black)` pair.
    pub async fn pop_pair(&self) -> Option<(PlayerId, PlayerId)> {
        self.waiting.lock().await.pop_pair()
    }

    /// Waiting player count.
    pub async fn len(&self) -> usize {
        self.waiting.lock().await.len()
    }

    /// Whether nobody is waiting.
    pub async fn is_empty(&self) -> bool {
        self.waiting.lock().await.is_empty()
    }

    /// Wait until the queue changes.
    pub async fn changed(&self) {
        self.notify.notified().await;
    }
}

/// Pair players until shutdown.
pub async fn run_matchmaking_loop(ctx: Arc<ServerContext>, mut shutdown: broadcast::Receiver<()>) {
    loop {
        while let Some((white, black)) = ctx.queue.pop_pair().await {
            pair_players(&ctx, white, black).await;
        }

        tokio::select! {
            _ = ctx.queue.changed() => {}
            _ = shutdown.recv() => {
                debug!("Matchmaking stopped");
                break;
            }
        }
    }
}

/// Open a session for `white` and `black`.
///
/// Returns the live session, or `None` if the pairing fell through. A player
/// whose partner vanished before confirmation goes back to the front of the
/// queue and nothing is persisted. A partner lost after confirmation ends the
/// session like any other departure.
pub async fn pair_players(
    ctx: &Arc<ServerContext>,
    white: PlayerId,
    black: PlayerId,
) -> Option<SharedSession> {
    let session_id = ctx.registry.next_session_id();
    let board = ctx.rules.initial_board();
    let turn = ctx.rules.side_to_move(&board).unwrap_or(Color::White);
    let clocks = Clocks::new(ctx.config.game_clock_secs, ctx.config.player_clock_secs);
    let shared = ctx
        .registry
        .insert_session(Session::new(session_id, white, black, board, turn, clocks))
        .await;

    if let Err(missing) = ctx.registry.attach_pair(white, black, session_id).await {
        ctx.registry.remove_session(&session_id).await;
        for survivor in [white, black] {
            if !missing.contains(&survivor) {
                ctx.queue.requeue_front(survivor).await;
            }
        }
        warn!(session_id = %session_id, missing = ?missing, "Pairing abandoned, player gone");
        return None;
    }

    // The start records are queued under the session lock so that any end
    // record, which needs the same lock, reaches the players after them.
    let lost = {
        let mut session = shared.write().await;
        if let Err(e) = session.mark_ready() {
            // A player left between seating and confirmation; the disconnect
            // path has already ended the session.
            debug!(session_id = %session_id, error = %e, "Session not started");
            return None;
        }
        let record = session.snapshot();

        let mut lost = None;
        for (color, player_id) in [(Color::White, white), (Color::Black, black)] {
            let message = PlayServerMessage::Session(record.clone());
            if !ctx.registry.send_to_player(player_id, message).await {
                warn!(session_id = %session_id, player_id = %player_id, "Lost player at session start");
                if lost.is_none() {
                    lost = Some(color);
                }
            }
        }
        lost
    };

    if let Some(color) = lost {
        ctx.end_session(&shared, EndReason::PlayerLeft(color)).await;
        return None;
    }

    info!(session_id = %session_id, white = %white, black = %black, "Session started");
    timer::spawn_clocks(ctx.clone(), shared.clone());
    Some(shared)
}
