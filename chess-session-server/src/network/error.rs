//! Connection Errors
//!
//! Everything that can end one connection's task. None of these reach past
//! the task that produced them.

use thiserror::Error;

use crate::game::rules::RulesError;
use crate::game::session::SessionError;
use crate::network::codec::TransportError;

/// Payload was well-formed JSON but wrong for the connection's state.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Client speaks another protocol version.
    #[error("unsupported protocol version {0}")]
    VersionMismatch(u16),

    /// Player sent a board before being paired.
    #[error("player is not in a session")]
    NotPaired,

    /// Board could not be understood by the rules engine.
    #[error("malformed board: {0}")]
    MalformedBoard(#[from] RulesError),

    /// Update violated turn order.
    #[error("out-of-sequence update: {0}")]
    OutOfSequence(#[from] SessionError),
}

/// Terminal failure of one connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Socket failed or peer went away.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Peer broke the protocol.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl ConnectionError {
    /// Whether this is an ordinary hang-up rather than a fault.
    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionError::Transport(TransportError::Closed))
    }
}
