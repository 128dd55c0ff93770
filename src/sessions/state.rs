use crate::checksum::DesyncChecksum;
use crate::confirmation::ConfirmationTracker;
use crate::frame::InputFrame;
use crate::history::HistoryStore;
use crate::replay::ReplayController;
use crate::telemetry::{InvariantChecker, InvariantViolation};
use crate::{Cycle, Slot};

/// Everything a session knows about one level: input histories, confirmation
/// counters, recorded checksums, the pending resimulation marker and the local
/// input lock stack.
///
/// Owned by a [`LockstepSession`](crate::LockstepSession); many sessions can
/// coexist in one process.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub(crate) history: HistoryStore,
    pub(crate) confirmation: ConfirmationTracker,
    pub(crate) checksums: DesyncChecksum,
    pub(crate) replay: ReplayController,
    pub(crate) lock_stack: Vec<InputFrame>,
}

impl SessionState {
    /// Creates the state of a fresh level.
    #[must_use]
    pub fn new(
        starting_cycle: Cycle,
        num_players: usize,
        local_slot: Slot,
        max_history: usize,
        checksum_history: usize,
    ) -> Self {
        Self {
            history: HistoryStore::new(starting_cycle, num_players, local_slot, max_history),
            confirmation: ConfirmationTracker::new(starting_cycle, num_players, local_slot),
            checksums: DesyncChecksum::with_capacity(checksum_history),
            replay: ReplayController::new(),
            lock_stack: Vec::new(),
        }
    }

    /// The input histories.
    #[must_use]
    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// The confirmation counters.
    #[must_use]
    pub fn confirmation(&self) -> &ConfirmationTracker {
        &self.confirmation
    }

    /// The recorded checksums.
    #[must_use]
    pub fn checksums(&self) -> &DesyncChecksum {
        &self.checksums
    }

    /// The pending resimulation marker.
    #[must_use]
    pub fn replay(&self) -> &ReplayController {
        &self.replay
    }

    /// Forced local frames, top last.
    #[must_use]
    pub fn lock_stack(&self) -> &[InputFrame] {
        &self.lock_stack
    }

    /// The local slot.
    #[must_use]
    pub fn local_slot(&self) -> Slot {
        self.history.local_slot()
    }

    /// Number of active slots.
    #[must_use]
    pub fn num_players(&self) -> usize {
        self.history.num_players()
    }

    /// The cycle the next local frame will be recorded for.
    #[must_use]
    pub fn next_local_cycle(&self) -> Cycle {
        self.history.last_cycle(self.local_slot()) + 1
    }

    /// Records the local frame of the next cycle.
    ///
    /// Remote slots that have not reached that cycle yet are first extended by
    /// repeating their newest frame, so the simulation can proceed on a guess
    /// that later packets correct. Returns the number of cycles compacted away.
    pub(crate) fn record_local(&mut self, frame: InputFrame) -> usize {
        let cycle = self.next_local_cycle();
        let remotes: Vec<Slot> = self.confirmation.remote_slots().collect();
        for slot in remotes {
            self.history.grow_to_include(slot, cycle, None);
        }
        let compacted = self.history.append(self.local_slot(), frame);
        self.confirmation.advance_local();
        compacted
    }

    /// Takes back the newest local frame. Returns it, or `None` if there was none.
    pub(crate) fn unrecord_local(&mut self) -> Option<InputFrame> {
        let frame = self.history.remove_last(self.local_slot())?;
        self.confirmation.retreat_local();
        Some(frame)
    }
}

impl InvariantChecker for SessionState {
    /// # Invariants
    ///
    /// 1. The history store and the tracker are individually consistent
    /// 2. Both agree on the player count and the local slot
    /// 3. Local confirmation matches the newest local frame
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        self.history.check_invariants()?;
        self.confirmation.check_invariants()?;

        if self.history.num_players() != self.confirmation.num_players()
            || self.history.local_slot() != self.confirmation.local_slot()
        {
            return Err(InvariantViolation::new(
                "SessionState",
                "history and confirmation disagree on the session layout",
            ));
        }

        let local = self.local_slot();
        let last = self.history.last_cycle(local);
        let confirmed = self.confirmation.highest_confirmed(local);
        if last != confirmed {
            return Err(InvariantViolation::new(
                "SessionState",
                "local confirmation does not match local history",
            )
            .with_details(format!("last_cycle={}, confirmed={}", last, confirmed)));
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
    use crate::frame::ControlKeys;

    fn frame(bits: u8) -> InputFrame {
        InputFrame::new(ControlKeys::from_bits(bits))
    }

    #[test]
    fn recording_local_fills_remote_speculatively() {
        let mut state = SessionState::new(Cycle::new(0), 3, Slot::new(1), 64, 64);
        state.record_local(frame(1));
        state.record_local(frame(2));
        for slot in [0, 2] {
            assert_eq!(state.history.len(Slot::new(slot)), 2);
            assert_eq!(
                state.history.get(Slot::new(slot), Cycle::new(1)),
                &InputFrame::default()
            );
        }
        assert_eq!(state.confirmation.highest_confirmed(Slot::new(1)), Cycle::new(1));
        assert!(state.check_invariants().is_ok());
    }

    #[test]
    fn speculation_repeats_last_known_remote_frame() {
        let mut state = SessionState::new(Cycle::new(0), 2, Slot::new(0), 64, 64);
        state
            .history
            .grow_to_include(Slot::new(1), Cycle::new(0), Some(&frame(5)));
        state.record_local(frame(1));
        state.record_local(frame(1));
        assert_eq!(state.history.get(Slot::new(1), Cycle::new(1)), &frame(5));
    }

    #[test]
    fn unrecord_rewinds_confirmation() {
        let mut state = SessionState::new(Cycle::new(10), 2, Slot::new(0), 64, 64);
        assert!(state.unrecord_local().is_none());
        state.record_local(frame(3));
        assert_eq!(state.unrecord_local(), Some(frame(3)));
        assert_eq!(
            state.confirmation.highest_confirmed(Slot::new(0)),
            Cycle::new(9)
        );
        assert_eq!(state.next_local_cycle(), Cycle::new(10));
        assert!(state.check_invariants().is_ok());
    }
}
