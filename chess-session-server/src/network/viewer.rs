//! Viewer Broadcast
//!
//! A viewer first lists live sessions and picks one, then polls it with
//! heartbeats; each heartbeat is answered with the current record. The viewer
//! is counted on the session from subscription until it stops or drops.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use crate::game::session::SessionState;
use crate::network::codec::{read_frame, write_frame};
use crate::network::context::ServerContext;
use crate::network::error::ConnectionError;
use crate::network::protocol::{ViewClientMessage, ViewServerMessage};
use crate::network::registry::{SharedSession, ViewerId};

/// Serve one viewer until it stops watching or its connection fails.
pub async fn run_viewer<R, W>(
    mut reader: R,
    mut writer: W,
    ctx: &ServerContext,
) -> Result<(), ConnectionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let viewer_id = ctx.registry.register_viewer().await;
    debug!(viewer_id = %viewer_id, "Viewer connected");

    let result = match select_session(&mut reader, &mut writer, ctx, viewer_id).await {
        Ok(Some(session)) => {
            let watched = watch(&mut reader, &mut writer, &session).await;
            let remaining = session.write().await.remove_viewer();
            debug!(viewer_id = %viewer_id, remaining, "Viewer unsubscribed");
            watched
        }
        Ok(None) => Ok(()),
        Err(e) => Err(e),
    };

    ctx.registry.unregister_viewer(viewer_id).await;
    result
}

/// Listing phase. Returns the session the viewer was admitted to, or `None`
/// if it stopped before choosing one.
async fn select_session<R, W>(
    reader: &mut R,
    writer: &mut W,
    ctx: &ServerContext,
    viewer_id: ViewerId,
) -> Result<Option<SharedSession>, ConnectionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        match read_frame::<_, ViewClientMessage>(reader).await? {
            ViewClientMessage::ListSessions => {
                let sessions = ctx.registry.ready_sessions().await;
                write_frame(writer, &ViewServerMessage::Sessions { sessions }).await?;
            }
            ViewClientMessage::Subscribe { session_id } => {
                let Some(session) = ctx.registry.get_session(&session_id).await else {
                    write_frame(writer, &ViewServerMessage::NotFound { session_id }).await?;
                    continue;
                };

                let admitted = {
                    let mut guard = session.write().await;
                    if guard.state() == SessionState::Ready {
                        guard.add_viewer(ctx.config.max_viewers).map(Some)
                    } else {
                        Ok(None)
                    }
                };

                match admitted {
                    Ok(Some(viewers)) => {
                        ctx.registry.set_viewer_session(viewer_id, Some(session_id)).await;
                        info!(viewer_id = %viewer_id, session_id = %session_id, viewers, "Viewer subscribed");
                        return Ok(Some(session));
                    }
                    Ok(None) => {
                        write_frame(writer, &ViewServerMessage::NotFound { session_id }).await?;
                    }
                    Err(_) => {
                        write_frame(writer, &ViewServerMessage::Full { session_id }).await?;
                    }
                }
            }
            ViewClientMessage::Viewing => {
                debug!(viewer_id = %viewer_id, "Heartbeat before subscribing ignored");
            }
            ViewClientMessage::StopViewing => return Ok(None),
        }
    }
}

/// Subscribed phase.
async fn watch<R, W>(reader: &mut R, writer: &mut W, session: &SharedSession) -> Result<(), ConnectionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        match read_frame::<_, ViewClientMessage>(reader).await? {
            ViewClientMessage::Viewing => {
                let snapshot = session.read().await.snapshot();
                write_frame(writer, &ViewServerMessage::Snapshot(snapshot)).await?;
            }
            ViewClientMessage::StopViewing => return Ok(()),
            other => {
                debug!(request = ?other, "Unexpected message while viewing");
                return Ok(());
            }
        }
    }
}
