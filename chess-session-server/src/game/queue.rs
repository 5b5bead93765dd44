//! FIFO Pairing
//!
//! Pure first-come-first-served pairing: the earliest waiting player gets
//! white, the next gets black. No rating-based matching.

use std::collections::VecDeque;

use crate::game::session::PlayerId;

/// Waiting players in arrival order.
#[derive(Debug, Default, Clone)]
pub struct PairingQueue {
    waiting: VecDeque<PlayerId>,
}

impl PairingQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a player at the back. Returns false if already queued.
    pub fn enqueue(&mut self, player_id: PlayerId) -> bool {
        if self.waiting.contains(&player_id) {
            return false;
        }
        self.waiting.push_back(player_id);
        true
    }

    /// Put a player back at the front, ahead of later arrivals.
    pub fn requeue_front(&mut self, player_id: PlayerId) {
        if !self.waiting.contains(&player_id) {
            self.waiting.push_front(player_id);
        }
    }

    /// Drop a player who left before pairing.
    pub fn remove(&mut self, player_id: PlayerId) -> bool {
        let before = self.waiting.len();
        self.waiting.retain(|id| *id != player_id);
        self.waiting.len() != before
    }

    /// Pop the next `(white, black)` pair, if two are waiting.
    pub fn pop_pair(&mut self) -> Option<(PlayerId, PlayerId)> {
        if self.waiting.len() < 2 {
            return None;
        }
        let white = self.waiting.pop_front()?;
        let black = self.waiting.pop_front()?;
        Some((white, black))
    }

    /// Number of waiting players.
    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    /// Whether nobody is waiting.
    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }
}
