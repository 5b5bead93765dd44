//! Play Relay
//!
//! Owns one player connection from handshake to hang-up. Outbound messages go
//! through a channel to a dedicated writer task so that other tasks (the
//! opponent's relay, matchmaking, clocks) can reach this player without
//! touching its socket.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::game::session::{EndReason, PlayerId, SessionError, SessionState, UpdateOutcome};
use crate::network::codec::{read_frame, write_frame, TransportError};
use crate::network::context::ServerContext;
use crate::network::error::{ConnectionError, ProtocolError};
use crate::network::protocol::{BoardUpdate, PlayClientMessage, PlayServerMessage};

/// How long a departing player's queued messages may take to flush.
pub const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Serve one player until it leaves or its connection fails.
///
/// Whatever ends the loop, the player's queue slot or session seat is
/// released exactly once before returning.
pub async fn run_player<R, W>(
    mut reader: R,
    writer: W,
    ctx: Arc<ServerContext>,
) -> Result<(), ConnectionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(ctx.config.outbound_buffer);
    let player_id = ctx.registry.register_player(tx).await;
    let mut writer_task = tokio::spawn(write_loop(writer, rx));

    info!(player_id = %player_id, "Player connected");
    let welcome = PlayServerMessage::Welcome { player_id, state: SessionState::InQueue };
    let result = if ctx.registry.send_to_player(player_id, welcome).await {
        ctx.queue.enqueue(player_id).await;
        serve_player(&mut reader, player_id, &ctx).await
    } else {
        Err(TransportError::Closed.into())
    };

    // Unregistering drops the last sender; the writer flushes what is queued
    // and stops on its own.
    ctx.disconnect_player(player_id).await;
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer_task).await.is_err() {
        debug!(player_id = %player_id, "Writer did not drain in time");
        writer_task.abort();
    }
    result
}

async fn serve_player<R>(
    reader: &mut R,
    player_id: PlayerId,
    ctx: &ServerContext,
) -> Result<(), ConnectionError>
where
    R: AsyncRead + Unpin,
{
    loop {
        match read_frame::<_, PlayClientMessage>(reader).await? {
            PlayClientMessage::Update(update) => handle_update(ctx, player_id, update).await?,
            PlayClientMessage::Leave => {
                debug!(player_id = %player_id, "Player sent leave");
                return Ok(());
            }
        }
    }
}

/// Accept a board from `player_id` and pass it to the opponent.
async fn handle_update(
    ctx: &ServerContext,
    player_id: PlayerId,
    update: BoardUpdate,
) -> Result<(), ConnectionError> {
    let session = ctx
        .registry
        .player_session(player_id)
        .await
        .ok_or(ProtocolError::NotPaired)?;

    let mover = {
        let session = session.read().await;
        if session.state() == SessionState::Disconnect {
            debug!(player_id = %player_id, session_id = %session.id(), "Update after session end ignored");
            return Ok(());
        }
        session.color_of(player_id).ok_or(ProtocolError::NotPaired)?
    };

    let next_turn = ctx.rules.side_to_move(&update.board).map_err(ProtocolError::from)?;
    let checkmate = ctx.rules.is_checkmate(&update.board).map_err(ProtocolError::from)?;

    // The forward is queued before the session lock is released, so an end
    // record can never overtake it.
    let applied = {
        let mut guard = session.write().await;
        match guard.apply_update(mover, update.board, next_turn, update.annotation, checkmate) {
            Ok(UpdateOutcome::Applied) => {
                let delivered = match guard.player(mover.opponent()) {
                    Some(opponent) => {
                        let record = guard.snapshot();
                        ctx.registry.send_to_player(opponent, PlayServerMessage::Session(record)).await
                    }
                    None => false,
                };
                Ok((UpdateOutcome::Applied, delivered))
            }
            other => other.map(|outcome| (outcome, true)),
        }
    };

    match applied {
        Ok((UpdateOutcome::Finished(record), _)) => {
            ctx.finish(record).await;
        }
        Ok((UpdateOutcome::Applied, delivered)) => {
            if !delivered {
                warn!(player_id = %player_id, "Opponent unreachable, ending session");
                ctx.end_session(&session, EndReason::PlayerLeft(mover.opponent())).await;
            }
        }
        Err(SessionError::InvalidState(SessionState::Disconnect)) => {
            debug!(player_id = %player_id, "Session ended before update landed");
        }
        Err(SessionError::ClockExpired(color)) => {
            ctx.end_session(&session, EndReason::Flagged(color)).await;
        }
        Err(e) => return Err(ProtocolError::OutOfSequence(e).into()),
    }
    Ok(())
}

/// Drain `rx` onto the socket until the channel closes or a write fails.
async fn write_loop<W, T>(mut writer: W, mut rx: mpsc::Receiver<T>)
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    while let Some(message) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &message).await {
            debug!(error = %e, "Writer stopped");
            break;
        }
    }
}
