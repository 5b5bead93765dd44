//! Outcome Reporting
//!
//! The account/rating database is an external collaborator; the server only
//! reports each finished session to it once. [`InMemoryRatings`] is the
//! in-process stand-in used by the binary and the tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use thiserror::Error;

use crate::game::rules::Color;
use crate::game::session::{PlayerId, SessionId, SessionSnapshot};

/// Starting Elo for unseen players.
pub const INITIAL_ELO: i32 = 1200;

/// Elo K-factor.
pub const ELO_K: f64 = 32.0;

/// Result of one finished session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchOutcome {
    /// Finished session.
    pub session_id: SessionId,
    /// White player.
    pub white: Option<PlayerId>,
    /// Black player.
    pub black: Option<PlayerId>,
    /// Winner; `None` is a draw.
    pub winner: Option<Color>,
}

impl MatchOutcome {
    /// Outcome of a frozen session record.
    pub fn from_snapshot(snapshot: &SessionSnapshot) -> Self {
        Self {
            session_id: snapshot.id,
            white: snapshot.white,
            black: snapshot.black,
            winner: snapshot.winner,
        }
    }
}

/// Rating store errors.
#[derive(Debug, Error)]
pub enum RatingError {
    /// Outcome does not name both players.
    #[error("session {0} is missing a player")]
    IncompleteOutcome(SessionId),

    /// Backing store failed.
    #[error("rating store unavailable: {0}")]
    Unavailable(String),
}

/// Win/draw/loss record and rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerRecord {
    /// Games won.
    pub win: u32,
    /// Games drawn.
    pub draw: u32,
    /// Games lost.
    pub lose: u32,
    /// Current rating.
    pub elo: i32,
}

impl Default for PlayerRecord {
    fn default() -> Self {
        Self { win: 0, draw: 0, lose: 0, elo: INITIAL_ELO }
    }
}

/// External rating/account store.
pub trait RatingStore: Send + Sync {
    /// Record one finished session.
    fn record_outcome(&self, outcome: &MatchOutcome) -> Result<(), RatingError>;
}

/// Ratings held in memory for the life of the process.
#[derive(Debug, Default)]
pub struct InMemoryRatings {
    records: Mutex<BTreeMap<PlayerId, PlayerRecord>>,
}

impl InMemoryRatings {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current record for `player_id`.
    pub fn get(&self, player_id: PlayerId) -> Option<PlayerRecord> {
        self.records.lock().ok()?.get(&player_id).copied()
    }
}

/// Expected score of a player rated `rating` against `opponent`.
fn expected_score(rating: i32, opponent: i32) -> f64 {
    1.0 / (1.0 + 10f64.powf(f64::from(opponent - rating) / 400.0))
}

impl RatingStore for InMemoryRatings {
    fn record_outcome(&self, outcome: &MatchOutcome) -> Result<(), RatingError> {
        let (Some(white), Some(black)) = (outcome.white, outcome.black) else {
            return Err(RatingError::IncompleteOutcome(outcome.session_id));
        };

        let mut records = self
            .records
            .lock()
            .map_err(|_| RatingError::Unavailable("ratings lock poisoned".into()))?;

        let white_record = records.get(&white).copied().unwrap_or_default();
        let black_record = records.get(&black).copied().unwrap_or_default();

        let white_score = match outcome.winner {
            Some(Color::White) => 1.0,
            Some(Color::Black) => 0.0,
            None => 0.5,
        };
        let delta = (ELO_K * (white_score - expected_score(white_record.elo, black_record.elo))).round() as i32;

        let mut white_next = white_record;
        let mut black_next = black_record;
        white_next.elo += delta;
        black_next.elo -= delta;
        match outcome.winner {
            Some(Color::White) => {
                white_next.win += 1;
                black_next.lose += 1;
            }
            Some(Color::Black) => {
                white_next.lose += 1;
                black_next.win += 1;
            }
            None => {
                white_next.draw += 1;
                black_next.draw += 1;
            }
        }

        records.insert(white, white_next);
        records.insert(black, black_next);
        Ok(())
    }
}
