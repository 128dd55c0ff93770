use crate::report_violation;
use crate::telemetry::{InvariantChecker, InvariantViolation, ViolationKind, ViolationSeverity};
use crate::{Cycle, Slot, MAX_PLAYERS};

/// Tracks which cycles are final, in both directions.
///
/// `highest_confirmed[p]` is the last cycle for which we hold slot `p`'s final
/// input. For the local slot it advances with every sampled frame; for remote
/// slots it is set by accepted packets. `remote_highest_confirmed[p]` is what
/// peer `p` last told us about its own view, i.e. how much of our input it
/// already has.
///
/// Both start one cycle before the level's starting cycle, meaning "nothing yet".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationTracker {
    highest_confirmed: [Cycle; MAX_PLAYERS],
    remote_highest_confirmed: [Cycle; MAX_PLAYERS],
    num_players: usize,
    local_slot: Slot,
}

impl ConfirmationTracker {
    /// Creates a tracker for a level that begins at `starting_cycle`.
    #[must_use]
    pub fn new(starting_cycle: Cycle, num_players: usize, local_slot: Slot) -> Self {
        let nothing = starting_cycle - 1;
        Self {
            highest_confirmed: [nothing; MAX_PLAYERS],
            remote_highest_confirmed: [nothing; MAX_PLAYERS],
            num_players: num_players.min(MAX_PLAYERS),
            local_slot,
        }
    }

    /// Number of active slots.
    #[must_use]
    pub const fn num_players(&self) -> usize {
        self.num_players
    }

    /// The local slot.
    #[must_use]
    pub const fn local_slot(&self) -> Slot {
        self.local_slot
    }

    /// One more local cycle is final.
    pub fn advance_local(&mut self) {
        self.highest_confirmed[self.local_slot.as_usize()] += 1;
    }

    /// One local cycle was taken back.
    pub fn retreat_local(&mut self) {
        self.highest_confirmed[self.local_slot.as_usize()] -= 1;
    }

    /// Highest final cycle we hold for `slot`.
    #[must_use]
    pub fn highest_confirmed(&self, slot: Slot) -> Cycle {
        self.highest_confirmed[slot.as_usize()]
    }

    /// Highest cycle of our input that peer `slot` reported holding.
    #[must_use]
    pub fn remote_highest_confirmed(&self, slot: Slot) -> Cycle {
        self.remote_highest_confirmed[slot.as_usize()]
    }

    /// Sets the highest final cycle for `slot`.
    ///
    /// Remote slots never move backwards: the packet decoder rejects stale
    /// packets first, and a regression that slips through is reported and ignored.
    pub fn set_confirmed(&mut self, slot: Slot, cycle: Cycle) {
        let current = self.highest_confirmed[slot.as_usize()];
        if slot != self.local_slot && cycle < current {
            report_violation!(
                ViolationSeverity::Error,
                ViolationKind::Confirmation,
                "Confirmation of slot {} would regress from {} to {}",
                slot,
                current,
                cycle
            );
            return;
        }
        self.highest_confirmed[slot.as_usize()] = cycle;
    }

    /// Records what peer `slot` reports having of our input. Never moves backwards.
    pub fn record_remote_highest(&mut self, slot: Slot, cycle: Cycle) {
        let current = &mut self.remote_highest_confirmed[slot.as_usize()];
        if cycle > *current {
            *current = cycle;
        }
    }

    /// The last cycle for which every slot's input is final, or [`Cycle::NULL`]
    /// for a session without players.
    ///
    /// Everything up to here can be simulated without fear of later corrections.
    #[must_use]
    pub fn our_highest_confirmed(&self) -> Cycle {
        self.highest_confirmed[..self.num_players]
            .iter()
            .copied()
            .min()
            .unwrap_or(Cycle::NULL)
    }

    /// The last cycle of our input that every peer already holds.
    ///
    /// Without remote peers this is our own confirmed local cycle, so nothing
    /// is ever retransmitted.
    #[must_use]
    pub fn their_highest_confirmed(&self) -> Cycle {
        self.remote_slots()
            .map(|slot| self.remote_highest_confirmed[slot.as_usize()])
            .min()
            .unwrap_or_else(|| self.highest_confirmed(self.local_slot))
    }

    /// Iterates every active slot except the local one.
    pub fn remote_slots(&self) -> impl Iterator<Item = Slot> + '_ {
        (0..self.num_players)
            .map(Slot::new)
            .filter(move |&slot| slot != self.local_slot)
    }
}

impl InvariantChecker for ConfirmationTracker {
    /// # Invariants
    ///
    /// 1. At most [`MAX_PLAYERS`] slots are active
    /// 2. The local slot is active
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        if self.num_players > MAX_PLAYERS {
            return Err(
                InvariantViolation::new("ConfirmationTracker", "too many players")
                    .with_details(format!("num_players={}", self.num_players)),
            );
        }
        if !self.local_slot.is_active_for(self.num_players) {
            return Err(InvariantViolation::new(
                "ConfirmationTracker",
                "local slot is not active",
            )
            .with_details(format!(
                "local_slot={}, num_players={}",
                self.local_slot, self.num_players
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn starts_one_before_level_start() {
        let tracker = ConfirmationTracker::new(Cycle::new(100), 3, Slot::new(1));
        for slot in 0..3 {
            assert_eq!(tracker.highest_confirmed(Slot::new(slot)), Cycle::new(99));
            assert_eq!(
                tracker.remote_highest_confirmed(Slot::new(slot)),
                Cycle::new(99)
            );
        }
    }

    #[test]
    fn our_highest_is_minimum_over_active_slots() {
        let mut tracker = ConfirmationTracker::new(Cycle::new(0), 3, Slot::new(0));
        for _ in 0..10 {
            tracker.advance_local();
        }
        tracker.set_confirmed(Slot::new(1), Cycle::new(7));
        tracker.set_confirmed(Slot::new(2), Cycle::new(4));
        assert_eq!(tracker.our_highest_confirmed(), Cycle::new(4));
    }

    #[test]
    fn our_highest_without_players_is_null() {
        let tracker = ConfirmationTracker::new(Cycle::new(0), 0, Slot::new(0));
        assert_eq!(tracker.our_highest_confirmed(), Cycle::NULL);
    }

    #[test]
    fn their_highest_ignores_local_slot() {
        let mut tracker = ConfirmationTracker::new(Cycle::new(0), 3, Slot::new(2));
        tracker.record_remote_highest(Slot::new(0), Cycle::new(8));
        tracker.record_remote_highest(Slot::new(1), Cycle::new(5));
        assert_eq!(tracker.their_highest_confirmed(), Cycle::new(5));
    }

    #[test]
    fn their_highest_without_peers_follows_local() {
        let mut tracker = ConfirmationTracker::new(Cycle::new(0), 1, Slot::new(0));
        tracker.advance_local();
        tracker.advance_local();
        assert_eq!(tracker.their_highest_confirmed(), Cycle::new(1));
    }

    #[test]
    fn remote_highest_never_moves_back() {
        let mut tracker = ConfirmationTracker::new(Cycle::new(0), 2, Slot::new(0));
        tracker.record_remote_highest(Slot::new(1), Cycle::new(9));
        tracker.record_remote_highest(Slot::new(1), Cycle::new(3));
        assert_eq!(tracker.remote_highest_confirmed(Slot::new(1)), Cycle::new(9));
    }

    #[test]
    fn remote_confirmation_regression_is_ignored() {
        let mut tracker = ConfirmationTracker::new(Cycle::new(0), 2, Slot::new(0));
        tracker.set_confirmed(Slot::new(1), Cycle::new(6));
        tracker.set_confirmed(Slot::new(1), Cycle::new(2));
        assert_eq!(tracker.highest_confirmed(Slot::new(1)), Cycle::new(6));
        tracker.set_confirmed(Slot::new(1), Cycle::new(6));
        assert_eq!(tracker.highest_confirmed(Slot::new(1)), Cycle::new(6));
    }

    #[test]
    fn local_advance_and_retreat() {
        let mut tracker = ConfirmationTracker::new(Cycle::new(0), 2, Slot::new(1));
        tracker.advance_local();
        tracker.advance_local();
        tracker.retreat_local();
        assert_eq!(tracker.highest_confirmed(Slot::new(1)), Cycle::new(0));
    }

    #[test]
    fn remote_slots_skip_local() {
        let tracker = ConfirmationTracker::new(Cycle::new(0), 4, Slot::new(2));
        let slots: Vec<usize> = tracker.remote_slots().map(Slot::as_usize).collect();
        assert_eq!(slots, vec![0, 1, 3]);
        assert!(tracker.check_invariants().is_ok());
    }
}
