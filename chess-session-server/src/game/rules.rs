//! Rules Engine Seam
//!
//! The server never interprets a board beyond three questions: what the
//! starting position is, whose turn it is, and whether the position is mate.
//! Boards travel as opaque FEN strings so the wire format does not depend on
//! the engine behind [`RulesEngine`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// COLOR
// =============================================================================

/// Side of the board.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Color {
    /// Moves first.
    White,
    /// Moves second.
    Black,
}

impl Color {
    /// The other side.
    #[inline]
    pub fn opponent(self) -> Color {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::White => f.write_str("WHITE"),
            Color::Black => f.write_str("BLACK"),
        }
    }
}

impl From<chess::Color> for Color {
    fn from(color: chess::Color) -> Self {
        match color {
            chess::Color::White => Color::White,
            chess::Color::Black => Color::Black,
        }
    }
}

// =============================================================================
// BOARD STATE
// =============================================================================

/// Opaque, serializable board value (FEN text).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoardState(String);

impl BoardState {
    /// Wrap a FEN string without validating it.
    pub fn new(fen: impl Into<String>) -> Self {
        Self(fen.into())
    }

    /// Raw FEN text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BoardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rules engine errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RulesError {
    /// Board text could not be parsed.
    #[error("invalid board: {0}")]
    InvalidBoard(String),

    /// Move text could not be parsed or is illegal in the position.
    #[error("illegal move: {0}")]
    IllegalMove(String),
}

// =============================================================================
// RULES ENGINE
// =============================================================================

/// External rules engine as seen by the server.
pub trait RulesEngine: Send + Sync {
    /// Starting position for a new session.
    fn initial_board(&self) -> BoardState;

    /// Side to move on `board`.
    fn side_to_move(&self, board: &BoardState) -> Result<Color, RulesError>;

    /// Whether the side to move on `board` is checkmated.
    fn is_checkmate(&self, board: &BoardState) -> Result<bool, RulesError>;
}

/// Standard chess rules backed by the `chess` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardRules;

impl StandardRules {
    fn parse(board: &BoardState) -> Result<chess::Board, RulesError> {
        chess::Board::from_str(board.as_str())
            .map_err(|_| RulesError::InvalidBoard(board.as_str().to_string()))
    }

    /// Apply a UCI move (e.g. `e2e4`) and return the resulting board.
    ///
    /// Not used by the relay itself; clients and tests use it to produce
    /// successor boards.
    pub fn apply_uci(&self, board: &BoardState, uci: &str) -> Result<BoardState, RulesError> {
        let parsed = Self::parse(board)?;
        let mv: chess::ChessMove = uci
            .parse()
            .map_err(|_| RulesError::IllegalMove(uci.to_string()))?;
        if !parsed.legal(mv) {
            return Err(RulesError::IllegalMove(uci.to_string()));
        }
        Ok(BoardState(parsed.make_move_new(mv).to_string()))
    }
}

impl RulesEngine for StandardRules {
    fn initial_board(&self) -> BoardState {
        BoardState(chess::Board::default().to_string())
    }

    fn side_to_move(&self, board: &BoardState) -> Result<Color, RulesError> {
        Ok(Self::parse(board)?.side_to_move().into())
    }

    fn is_checkmate(&self, board: &BoardState) -> Result<bool, RulesError> {
        Ok(Self::parse(board)?.status() == chess::BoardStatus::Checkmate)
    }
}
