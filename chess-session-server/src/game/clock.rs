//! Session Clocks
//!
//! Whole-game clock plus one clock per side, all in whole seconds.
//! Ticking is driven from outside (one task per clock); this module only
//! decides what a single tick does.

use serde::{Deserialize, Serialize};

use crate::game::rules::Color;

/// Which of a session's three clocks a tick applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClockKind {
    /// Runs on every tick while the session is live.
    Game,
    /// Runs only while a given side is to move.
    Side(Color),
}

impl ClockKind {
    /// All clocks a session runs.
    pub const ALL: [ClockKind; 3] = [
        ClockKind::Game,
        ClockKind::Side(Color::White),
        ClockKind::Side(Color::Black),
    ];
}

/// Result of applying one tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Clock is not running this tick (other side to move).
    Idle,
    /// Clock lost a second and still has time left.
    Running(u32),
    /// Clock just reached zero (or already was).
    Expired,
}

/// Remaining time, serialized as `{game, white, black}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clocks {
    /// Whole-game clock.
    pub game: u32,
    /// White's clock.
    pub white: u32,
    /// Black's clock.
    pub black: u32,
}

impl Clocks {
    /// Fresh clocks for a new session.
    pub fn new(game_secs: u32, player_secs: u32) -> Self {
        Self {
            game: game_secs,
            white: player_secs,
            black: player_secs,
        }
    }

    /// Remaining time for one side.
    #[inline]
    pub fn remaining(&self, color: Color) -> u32 {
        match color {
            Color::White => self.white,
            Color::Black => self.black,
        }
    }

    fn slot(&mut self, kind: ClockKind) -> &mut u32 {
        match kind {
            ClockKind::Game => &mut self.game,
            ClockKind::Side(Color::White) => &mut self.white,
            ClockKind::Side(Color::Black) => &mut self.black,
        }
    }

    /// Apply one second to `kind` given the side currently to move.
    ///
    /// Never increases any clock.
    pub fn tick(&mut self, kind: ClockKind, turn: Color) -> TickOutcome {
        if let ClockKind::Side(color) = kind {
            if color != turn {
                return TickOutcome::Idle;
            }
        }

        let slot = self.slot(kind);
        *slot = slot.saturating_sub(1);
        if *slot == 0 {
            TickOutcome::Expired
        } else {
            TickOutcome::Running(*slot)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_clock_only_runs_on_turn() {
        let mut clocks = Clocks::new(100, 10);

        assert_eq!(clocks.tick(ClockKind::Side(Color::Black), Color::White), TickOutcome::Idle);
        assert_eq!(clocks.black, 10);

        assert_eq!(clocks.tick(ClockKind::Side(Color::White), Color::White), TickOutcome::Running(9));
        assert_eq!(clocks.white, 9);
    }

    #[test]
    fn test_game_clock_runs_every_tick() {
        let mut clocks = Clocks::new(3, 10);
        clocks.tick(ClockKind::Game, Color::White);
        clocks.tick(ClockKind::Game, Color::Black);
        assert_eq!(clocks.game, 1);
        assert_eq!(clocks.tick(ClockKind::Game, Color::White), TickOutcome::Expired);
    }

    #[test]
    fn test_expired_clock_stays_at_zero() {
        let mut clocks = Clocks::new(100, 1);
        assert_eq!(clocks.tick(ClockKind::Side(Color::White), Color::White), TickOutcome::Expired);
        assert_eq!(clocks.tick(ClockKind::Side(Color::White), Color::White), TickOutcome::Expired);
        assert_eq!(clocks.remaining(Color::White), 0);
    }
}
