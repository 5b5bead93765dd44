//! Game Model
//!
//! Synchronous session model: no sockets, no tasks, no clocks on the wall.
//!
//! ## Module Structure
//!
//! - `rules`: colors, boards and the rules engine seam
//! - `clock`: game and per-side clocks
//! - `session`: session state machine and its persisted record
//! - `queue`: first-come-first-served pairing

pub mod clock;
pub mod queue;
pub mod rules;
pub mod session;

// Re-export key types
pub use clock::{ClockKind, Clocks, TickOutcome};
pub use queue::PairingQueue;
pub use rules::{BoardState, Color, RulesEngine, RulesError, StandardRules};
pub use session::{
    EndReason, MoveRecord, PlayerId, Session, SessionError, SessionId, SessionSnapshot,
    SessionState, UpdateOutcome,
};
