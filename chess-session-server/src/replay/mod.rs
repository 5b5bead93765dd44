//! Replays
//!
//! Finished sessions, stored once and read back on request.

pub mod store;

pub use store::{ReplayError, ReplayKey, ReplayRecord, ReplayStore};
