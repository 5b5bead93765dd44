//! Session State Machine
//!
//! One pairing of two players and their shared game record. All mutation goes
//! through [`Session`] methods; callers hold the per-session lock while they
//! call them, so every method here is a complete critical section.
//!
//! ```text
//! IN_QUEUE ──pair──▶ NOT_READY ──confirm──▶ READY ──end──▶ DISCONNECT
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::game::clock::{ClockKind, Clocks, TickOutcome};
use crate::game::rules::{BoardState, Color};

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Unique, monotonically assigned session identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connected player identifier, unique among players.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// STATE
// =============================================================================

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// Player is waiting for an opponent.
    InQueue,
    /// Paired, players not yet confirmed.
    NotReady,
    /// Game in progress.
    Ready,
    /// Terminal: a player left, was mated, or ran out of time.
    Disconnect,
}

impl SessionState {
    /// Numeric control code used by legacy clients.
    pub fn code(self) -> i8 {
        match self {
            SessionState::Disconnect => -1,
            SessionState::NotReady => 0,
            SessionState::Ready => 1,
            SessionState::InQueue => 2,
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The given side's connection was lost.
    PlayerLeft(Color),
    /// The given side delivered mate.
    Checkmate(Color),
    /// The given side's clock reached zero.
    Flagged(Color),
    /// The whole-game clock ran out.
    GameClockExpired,
}

impl EndReason {
    fn winner(self) -> Option<Color> {
        match self {
            EndReason::PlayerLeft(color) | EndReason::Flagged(color) => Some(color.opponent()),
            EndReason::Checkmate(winner) => Some(winner),
            EndReason::GameClockExpired => None,
        }
    }
}

/// One accepted move: seconds spent and the captured piece, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRecord {
    /// Seconds the mover spent on this move.
    pub time_spent: u32,
    /// Symbol of the captured piece.
    pub captured: Option<String>,
}

/// Full session record as sent to players and viewers and as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Session identifier.
    pub id: SessionId,
    /// Current board.
    pub board: BoardState,
    /// Side to move on `board`.
    pub turn: Color,
    /// Lifecycle state.
    pub state: SessionState,
    /// White player, absent once gone.
    pub white: Option<PlayerId>,
    /// Black player, absent once gone.
    pub black: Option<PlayerId>,
    /// Decided winner.
    pub winner: Option<Color>,
    /// Move history in application order.
    pub moves: Vec<MoveRecord>,
    /// Current subscribed viewer count.
    pub viewers: u32,
    /// Remaining time.
    pub time: Clocks,
}

/// What an accepted update did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Board replaced, game continues.
    Applied,
    /// Board replaced and it is mate; carries the frozen record.
    Finished(SessionSnapshot),
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Session is not in the state the operation needs.
    #[error("invalid session state: {0:?}")]
    InvalidState(SessionState),

    /// Update came from the side not to move.
    #[error("out of turn: {expected} to move")]
    OutOfTurn {
        /// Side that should have moved.
        expected: Color,
    },

    /// Update did not hand the move to the opponent.
    #[error("turn not passed after {0}'s move")]
    TurnNotPassed(Color),

    /// Mover's clock already reached zero.
    #[error("{0}'s clock has expired")]
    ClockExpired(Color),

    /// Viewer cap reached.
    #[error("viewer limit reached")]
    ViewerLimit,
}

// =============================================================================
// SESSION
// =============================================================================

/// One pairing.
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    board: BoardState,
    turn: Color,
    moves: Vec<MoveRecord>,
    state: SessionState,
    white: Option<PlayerId>,
    black: Option<PlayerId>,
    viewers: u32,
    clocks: Clocks,
    winner: Option<Color>,
}

impl Session {
    /// Create a session with both players assigned, not yet confirmed.
    pub fn new(
        id: SessionId,
        white: PlayerId,
        black: PlayerId,
        board: BoardState,
        turn: Color,
        clocks: Clocks,
    ) -> Self {
        Self {
            id,
            board,
            turn,
            moves: Vec::new(),
            state: SessionState::NotReady,
            white: Some(white),
            black: Some(black),
            viewers: 0,
            clocks,
            winner: None,
        }
    }

    /// Session identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Side to move.
    pub fn turn(&self) -> Color {
        self.turn
    }

    /// Decided winner.
    pub fn winner(&self) -> Option<Color> {
        self.winner
    }

    /// Remaining time.
    pub fn clocks(&self) -> Clocks {
        self.clocks
    }

    /// Accepted moves so far.
    pub fn moves(&self) -> &[MoveRecord] {
        &self.moves
    }

    /// Subscribed viewer count.
    pub fn viewers(&self) -> u32 {
        self.viewers
    }

    /// Player holding `color`, if still present.
    pub fn player(&self, color: Color) -> Option<PlayerId> {
        match color {
            Color::White => self.white,
            Color::Black => self.black,
        }
    }

    /// Color played by `player_id`.
    pub fn color_of(&self, player_id: PlayerId) -> Option<Color> {
        if self.white == Some(player_id) {
            Some(Color::White)
        } else if self.black == Some(player_id) {
            Some(Color::Black)
        } else {
            None
        }
    }

    /// `NOT_READY → READY` once both players are confirmed.
    pub fn mark_ready(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::NotReady {
            return Err(SessionError::InvalidState(self.state));
        }
        self.state = SessionState::Ready;
        Ok(())
    }

    /// Accept a board from `mover`.
    ///
    /// `next_turn` and `checkmate` describe the new board as reported by the
    /// rules engine. On mate the winner is the mover and the session ends.
    pub fn apply_update(
        &mut self,
        mover: Color,
        board: BoardState,
        next_turn: Color,
        annotation: Option<MoveRecord>,
        checkmate: bool,
    ) -> Result<UpdateOutcome, SessionError> {
        if self.state != SessionState::Ready {
            return Err(SessionError::InvalidState(self.state));
        }
        if self.turn != mover {
            return Err(SessionError::OutOfTurn { expected: self.turn });
        }
        if next_turn == mover {
            return Err(SessionError::TurnNotPassed(mover));
        }
        if self.clocks.remaining(mover) == 0 {
            return Err(SessionError::ClockExpired(mover));
        }

        self.board = board;
        self.turn = next_turn;
        if let Some(record) = annotation {
            self.moves.push(record);
        }

        if checkmate {
            // Side not to move delivered mate.
            let winner = next_turn.opponent();
            if let Some(record) = self.end(EndReason::Checkmate(winner)) {
                return Ok(UpdateOutcome::Finished(record));
            }
        }
        Ok(UpdateOutcome::Applied)
    }

    /// Transition to `DISCONNECT`.
    ///
    /// Returns the frozen record only on the first call; that return value is
    /// the signal to persist the session.
    pub fn end(&mut self, reason: EndReason) -> Option<SessionSnapshot> {
        if self.state == SessionState::Disconnect {
            return None;
        }
        self.state = SessionState::Disconnect;
        if self.winner.is_none() {
            self.winner = reason.winner();
        }
        Some(self.snapshot())
    }

    /// Remove a departed player. Returns true once both seats are empty.
    pub fn release(&mut self, color: Color) -> bool {
        match color {
            Color::White => self.white = None,
            Color::Black => self.black = None,
        }
        self.white.is_none() && self.black.is_none()
    }

    /// Apply one clock tick. `None` when the session is not live.
    pub fn tick(&mut self, kind: ClockKind) -> Option<TickOutcome> {
        if self.state != SessionState::Ready {
            return None;
        }
        Some(self.clocks.tick(kind, self.turn))
    }

    /// Add a viewer, refusing past `limit`.
    pub fn add_viewer(&mut self, limit: u32) -> Result<u32, SessionError> {
        if self.viewers >= limit {
            return Err(SessionError::ViewerLimit);
        }
        self.viewers += 1;
        Ok(self.viewers)
    }

    /// Remove a viewer.
    pub fn remove_viewer(&mut self) -> u32 {
        self.viewers = self.viewers.saturating_sub(1);
        self.viewers
    }

    /// Copy of the full record.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            board: self.board.clone(),
            turn: self.turn,
            state: self.state,
            white: self.white,
            black: self.black,
            winner: self.winner,
            moves: self.moves.clone(),
            viewers: self.viewers,
            time: self.clocks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::rules::{RulesEngine, StandardRules};

    const WHITE: PlayerId = PlayerId(1);
    const BLACK: PlayerId = PlayerId(2);

    fn ready_session() -> Session {
        let rules = StandardRules;
        let mut session = Session::new(
            SessionId(7),
            WHITE,
            BLACK,
            rules.initial_board(),
            Color::White,
            Clocks::new(600, 60),
        );
        session.mark_ready().unwrap();
        session
    }

    fn play(session: &mut Session, uci: &str) -> Result<UpdateOutcome, SessionError> {
        let rules = StandardRules;
        let mover = session.turn();
        let board = rules.apply_uci(&session.snapshot().board, uci).unwrap();
        let next = rules.side_to_move(&board).unwrap();
        let mate = rules.is_checkmate(&board).unwrap();
        session.apply_update(
            mover,
            board,
            next,
            Some(MoveRecord { time_spent: 1, captured: None }),
            mate,
        )
    }

    #[test]
    fn test_new_session_not_ready() {
        let rules = StandardRules;
        let mut session = Session::new(
            SessionId(1), WHITE, BLACK, rules.initial_board(), Color::White, Clocks::new(10, 10),
        );
        assert_eq!(session.state(), SessionState::NotReady);
        assert_eq!(session.color_of(BLACK), Some(Color::Black));
        session.mark_ready().unwrap();
        assert!(matches!(session.mark_ready(), Err(SessionError::InvalidState(SessionState::Ready))));
    }

    #[test]
    fn test_update_passes_turn_and_records_move() {
        let mut session = ready_session();
        assert_eq!(play(&mut session, "e2e4").unwrap(), UpdateOutcome::Applied);
        assert_eq!(session.turn(), Color::Black);
        assert_eq!(session.moves().len(), 1);
    }

    #[test]
    fn test_update_without_annotation_keeps_history() {
        let rules = StandardRules;
        let mut session = ready_session();
        let board = rules.apply_uci(&rules.initial_board(), "d2d4").unwrap();
        session.apply_update(Color::White, board, Color::Black, None, false).unwrap();
        assert!(session.moves().is_empty());
    }

    #[test]
    fn test_out_of_turn_rejected() {
        let rules = StandardRules;
        let mut session = ready_session();
        let board = rules.initial_board();
        let result = session.apply_update(Color::Black, board, Color::White, None, false);
        assert_eq!(result, Err(SessionError::OutOfTurn { expected: Color::White }));
    }

    #[test]
    fn test_turn_must_pass() {
        let rules = StandardRules;
        let mut session = ready_session();
        let result = session.apply_update(Color::White, rules.initial_board(), Color::White, None, false);
        assert_eq!(result, Err(SessionError::TurnNotPassed(Color::White)));
    }

    #[test]
    fn test_checkmate_ends_with_mover_winning() {
        let mut session = ready_session();
        for uci in ["f2f3", "e7e5", "g2g4"] {
            play(&mut session, uci).unwrap();
        }
        match play(&mut session, "d8h4").unwrap() {
            UpdateOutcome::Finished(record) => {
                assert_eq!(record.winner, Some(Color::Black));
                assert_eq!(record.state, SessionState::Disconnect);
                assert_eq!(record.moves.len(), 4);
            }
            other => panic!("expected finish, got {:?}", other),
        }
    }

    #[test]
    fn test_board_frozen_after_disconnect() {
        let mut session = ready_session();
        play(&mut session, "e2e4").unwrap();
        session.end(EndReason::PlayerLeft(Color::White)).unwrap();

        let before = session.snapshot();
        assert!(matches!(play(&mut session, "e7e5"), Err(SessionError::InvalidState(_))));
        assert_eq!(session.snapshot().board, before.board);
        assert_eq!(session.moves().len(), 1);
    }

    #[test]
    fn test_end_only_once() {
        let mut session = ready_session();
        let first = session.end(EndReason::PlayerLeft(Color::Black));
        assert_eq!(first.unwrap().winner, Some(Color::White));

        assert!(session.end(EndReason::PlayerLeft(Color::White)).is_none());
        assert_eq!(session.winner(), Some(Color::White));
    }

    #[test]
    fn test_flagged_and_game_clock_winners() {
        let mut flagged = ready_session();
        assert_eq!(flagged.end(EndReason::Flagged(Color::White)).unwrap().winner, Some(Color::Black));

        let mut expired = ready_session();
        assert_eq!(expired.end(EndReason::GameClockExpired).unwrap().winner, None);
    }

    #[test]
    fn test_expired_clock_blocks_update() {
        let mut session = ready_session();
        for _ in 0..60 {
            session.tick(ClockKind::Side(Color::White));
        }
        assert_eq!(session.clocks().white, 0);
        assert_eq!(play(&mut session, "e2e4"), Err(SessionError::ClockExpired(Color::White)));
    }

    #[test]
    fn test_tick_stops_after_disconnect() {
        let mut session = ready_session();
        assert_eq!(session.tick(ClockKind::Game), Some(TickOutcome::Running(599)));
        session.end(EndReason::GameClockExpired);
        assert_eq!(session.tick(ClockKind::Game), None);
        assert_eq!(session.clocks().game, 599);
    }

    #[test]
    fn test_release_both_players() {
        let mut session = ready_session();
        assert!(!session.release(Color::White));
        assert_eq!(session.player(Color::White), None);
        assert!(session.release(Color::Black));
    }

    #[test]
    fn test_viewer_count_never_negative() {
        let mut session = ready_session();
        assert_eq!(session.add_viewer(2).unwrap(), 1);
        assert_eq!(session.add_viewer(2).unwrap(), 2);
        assert_eq!(session.add_viewer(2), Err(SessionError::ViewerLimit));
        assert_eq!(session.remove_viewer(), 1);
        assert_eq!(session.remove_viewer(), 0);
        assert_eq!(session.remove_viewer(), 0);
    }

    #[test]
    fn test_snapshot_json_shape() {
        let session = ready_session();
        let json = serde_json::to_value(session.snapshot()).unwrap();
        assert_eq!(json["state"], "READY");
        assert_eq!(json["turn"], "WHITE");
        assert_eq!(json["white"], 1);
        assert_eq!(json["time"]["white"], 60);
        assert!(json["winner"].is_null());
    }

    #[test]
    fn test_state_codes() {
        assert_eq!(SessionState::Disconnect.code(), -1);
        assert_eq!(SessionState::NotReady.code(), 0);
        assert_eq!(SessionState::Ready.code(), 1);
        assert_eq!(SessionState::InQueue.code(), 2);
    }
}
