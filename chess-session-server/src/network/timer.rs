//! Session Clocks
//!
//! Three tasks per live session, one per clock, each ticking once a second.
//! A task stops as soon as its session is no longer `READY`; the task whose
//! clock runs out ends the session.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info};

use crate::game::clock::{ClockKind, TickOutcome};
use crate::game::session::EndReason;
use crate::network::context::ServerContext;
use crate::network::registry::SharedSession;

/// Clock resolution.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Start the game clock and both side clocks for `session`.
pub fn spawn_clocks(ctx: Arc<ServerContext>, session: SharedSession) -> Vec<JoinHandle<()>> {
    ClockKind::ALL
        .into_iter()
        .map(|kind| tokio::spawn(run_clock(ctx.clone(), session.clone(), kind)))
        .collect()
}

async fn run_clock(ctx: Arc<ServerContext>, session: SharedSession, kind: ClockKind) {
    let mut ticker = interval(TICK_INTERVAL);
    // First tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let outcome = session.write().await.tick(kind);
        match outcome {
            None => break,
            Some(TickOutcome::Idle) | Some(TickOutcome::Running(_)) => {}
            Some(TickOutcome::Expired) => {
                let reason = match kind {
                    ClockKind::Game => EndReason::GameClockExpired,
                    ClockKind::Side(color) => EndReason::Flagged(color),
                };
                if ctx.end_session(&session, reason).await {
                    info!(clock = ?kind, "Clock expired");
                }
                break;
            }
        }
    }

    debug!(clock = ?kind, "Clock stopped");
}
