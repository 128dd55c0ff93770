use crate::Cycle;

/// Remembers the earliest cycle whose input changed after it was used.
///
/// The packet decoder marks every cycle it corrects. Once per tick the outer
/// simulation asks for [`first_invalid_cycle`](Self::first_invalid_cycle),
/// rewinds to the state before it, resimulates and calls
/// [`clear`](Self::clear). While invalid, the marker only ever moves earlier.
///
/// ```
/// use lockstep_sync::{Cycle, ReplayController};
///
/// let mut replay = ReplayController::new();
/// assert!(replay.mark_invalid(Cycle::new(7)));
/// assert!(!replay.mark_invalid(Cycle::new(9)));
/// assert!(replay.mark_invalid(Cycle::new(3)));
/// assert_eq!(replay.first_invalid_cycle(), Some(Cycle::new(3)));
/// replay.clear();
/// assert_eq!(replay.first_invalid_cycle(), None);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayController {
    first_invalid: Option<Cycle>,
}

impl ReplayController {
    /// Creates a clean controller.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            first_invalid: None,
        }
    }

    /// Marks `cycle` as needing resimulation.
    ///
    /// Returns `true` if the marker moved, i.e. `cycle` is earlier than anything
    /// already pending.
    pub fn mark_invalid(&mut self, cycle: Cycle) -> bool {
        match self.first_invalid {
            Some(pending) if pending <= cycle => false,
            _ => {
                tracing::trace!(%cycle, "Marked cycle for resimulation");
                self.first_invalid = Some(cycle);
                true
            },
        }
    }

    /// The earliest cycle that needs resimulation, if any.
    #[must_use]
    pub const fn first_invalid_cycle(&self) -> Option<Cycle> {
        self.first_invalid
    }

    /// Returns `true` while a resimulation is pending.
    #[must_use]
    pub const fn is_invalid(&self) -> bool {
        self.first_invalid.is_some()
    }

    /// Forgets the pending cycle after the simulation caught up.
    pub fn clear(&mut self) {
        self.first_invalid = None;
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
    fn starts_clean() {
        let replay = ReplayController::new();
        assert!(!replay.is_invalid());
        assert_eq!(replay.first_invalid_cycle(), None);
    }

    #[test]
    fn marker_only_moves_earlier() {
        let mut replay = ReplayController::new();
        assert!(replay.mark_invalid(Cycle::new(10)));
        assert!(!replay.mark_invalid(Cycle::new(10)));
        assert!(!replay.mark_invalid(Cycle::new(12)));
        assert_eq!(replay.first_invalid_cycle(), Some(Cycle::new(10)));
        assert!(replay.mark_invalid(Cycle::new(4)));
        assert_eq!(replay.first_invalid_cycle(), Some(Cycle::new(4)));
    }

    #[test]
    fn clear_returns_to_clean() {
        let mut replay = ReplayController::new();
        replay.mark_invalid(Cycle::new(2));
        replay.clear();
        assert!(!replay.is_invalid());
        assert!(replay.mark_invalid(Cycle::new(50)));
    }
}
