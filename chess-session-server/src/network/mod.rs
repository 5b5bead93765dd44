//! Network Layer
//!
//! Everything that touches sockets, tasks or shared state. The rules of a
//! session live in `game/`; this layer decides who may apply them and when.

pub mod browser;
pub mod codec;
pub mod context;
pub mod error;
pub mod matchmaking;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod server;
pub mod timer;
pub mod viewer;

pub use codec::{read_frame, write_frame, TransportError, MAX_FRAME_LEN};
pub use context::ServerContext;
pub use error::{ConnectionError, ProtocolError};
pub use matchmaking::MatchmakingQueue;
pub use protocol::{
    Hello, PlayClientMessage, PlayServerMessage, ReplayClientMessage, ReplayServerMessage, Role,
    ViewClientMessage, ViewServerMessage, PROTOCOL_VERSION,
};
pub use registry::{SessionRegistry, SharedSession, ViewerId};
pub use server::{GameServer, GameServerError, ServerConfig};
