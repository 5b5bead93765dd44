//! Replay Browser
//!
//! Read-only access to stored replays: list every key, fetch one record.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::warn;

use crate::network::codec::{read_frame, write_frame};
use crate::network::error::ConnectionError;
use crate::network::protocol::{ReplayClientMessage, ReplayServerMessage};
use crate::replay::store::{ReplayError, ReplayStore};

/// Answer replay requests until the client disconnects.
pub async fn run_browser<R, W>(
    mut reader: R,
    mut writer: W,
    replays: &ReplayStore,
) -> Result<(), ConnectionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let reply = match read_frame::<_, ReplayClientMessage>(&mut reader).await? {
            ReplayClientMessage::ListAll => {
                let keys = replays.list().await.unwrap_or_else(|e| {
                    warn!(error = %e, "Failed to list replays");
                    Vec::new()
                });
                ReplayServerMessage::Keys { keys: keys.iter().map(ToString::to_string).collect() }
            }
            ReplayClientMessage::Fetch { key } => match replays.load(&key).await {
                Ok(record) => ReplayServerMessage::Record(record),
                Err(ReplayError::NotFound(_)) => ReplayServerMessage::NotFound { key },
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to load replay");
                    ReplayServerMessage::NotFound { key }
                }
            },
        };
        write_frame(&mut writer, &reply).await?;
    }
}
