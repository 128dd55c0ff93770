use crate::confirmation::ConfirmationTracker;
use crate::frame::InputFrame;
use crate::history::HistoryStore;
use crate::sessions::state::SessionState;

/// Deep copy of a session's input state: every slot's history (including its
/// starting cycle), the confirmation counters and the local input lock stack.
///
/// Recorded checksums and the pending resimulation marker are not part of the
/// snapshot; they describe the simulation rather than the input.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a snapshot does nothing unless restored"]
pub struct SessionSnapshot {
    history: HistoryStore,
    confirmation: ConfirmationTracker,
    lock_stack: Vec<InputFrame>,
}

impl SessionSnapshot {
    pub(crate) fn capture(state: &SessionState) -> Self {
        Self {
            history: state.history.clone(),
            confirmation: state.confirmation.clone(),
            lock_stack: state.lock_stack.clone(),
        }
    }

    pub(crate) fn restore_into(&self, state: &mut SessionState) {
        state.history.clone_from(&self.history);
        state.confirmation.clone_from(&self.confirmation);
        state.lock_stack.clone_from(&self.lock_stack);
    }

    /// The captured histories.
    #[must_use]
    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// The captured confirmation counters.
    #[must_use]
    pub fn confirmation(&self) -> &ConfirmationTracker {
        &self.confirmation
    }

    /// The captured lock stack, top last.
    #[must_use]
    pub fn lock_stack(&self) -> &[InputFrame] {
        &self.lock_stack
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
    use crate::{Cycle, Slot};

    #[test]
    fn restore_undoes_every_input_change() {
        let mut state = SessionState::new(Cycle::new(0), 2, Slot::new(0), 8, 8);
        state.record_local(InputFrame::new(ControlKeys::from_bits(1)));
        let snapshot = SessionSnapshot::capture(&state);

        for _ in 0..10 {
            state.record_local(InputFrame::new(ControlKeys::from_bits(2)));
        }
        state.lock_stack.push(InputFrame::default());
        assert_ne!(state.history.starting_cycle(Slot::new(0)), Cycle::new(0));

        snapshot.restore_into(&mut state);
        assert_eq!(state.history, *snapshot.history());
        assert_eq!(state.history.starting_cycle(Slot::new(0)), Cycle::new(0));
        assert_eq!(state.history.len(Slot::new(0)), 1);
        assert_eq!(state.confirmation.highest_confirmed(Slot::new(0)), Cycle::new(0));
        assert!(state.lock_stack.is_empty());
    }

    #[test]
    fn snapshot_is_independent_of_later_changes() {
        let mut state = SessionState::new(Cycle::new(0), 1, Slot::new(0), 64, 8);
        let snapshot = SessionSnapshot::capture(&state);
        state.record_local(InputFrame::default());
        assert_eq!(snapshot.history().len(Slot::new(0)), 0);
        assert_eq!(snapshot.confirmation().highest_confirmed(Slot::new(0)), Cycle::new(-1));
    }
}
