//! # Chess Session Server
//!
//! Pairs waiting chess players, relays boards between them, lets others
//! watch, runs the clocks and keeps a replay of every finished game.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  CHESS SESSION SERVER                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  game/           - Session model (synchronous)               │
//! │  ├── rules.rs    - Colors, boards, rules engine seam         │
//! │  ├── clock.rs    - Game and per-side clocks                  │
//! │  ├── session.rs  - Session state machine                     │
//! │  └── queue.rs    - FIFO pairing                              │
//! │                                                              │
//! │  network/        - Networking (tokio)                        │
//! │  ├── codec.rs    - Length-prefixed JSON frames               │
//! │  ├── protocol.rs - Per-role message envelopes                │
//! │  ├── registry.rs - Live sessions and participants            │
//! │  ├── matchmaking.rs - Background pairing task                │
//! │  ├── relay.rs    - Player connections                        │
//! │  ├── viewer.rs   - Viewer connections                        │
//! │  ├── timer.rs    - Clock tasks                               │
//! │  ├── browser.rs  - Replay browsing connections               │
//! │  └── server.rs   - Accept loop, handshake, configuration     │
//! │                                                              │
//! │  replay/         - Finished-session storage                  │
//! │  ratings.rs      - Outcome reporting                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Session Lifecycle
//!
//! ```text
//! IN_QUEUE ──pair──▶ NOT_READY ──confirm──▶ READY ──end──▶ DISCONNECT
//! ```
//!
//! A session ends exactly once: on a player leaving, checkmate, a side clock
//! running out, or the game clock running out. That single transition is what
//! writes the replay and reports the result.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod game;
pub mod network;
pub mod ratings;
pub mod replay;

// Re-export commonly used types
pub use game::rules::{BoardState, Color, RulesEngine, StandardRules};
pub use game::session::{PlayerId, SessionId, SessionSnapshot, SessionState};
pub use network::server::{GameServer, GameServerError, ServerConfig};
pub use ratings::{InMemoryRatings, RatingStore};
pub use replay::store::ReplayStore;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
