use std::collections::VecDeque;

use crate::frame::InputFrame;
use crate::report_violation;
use crate::telemetry::{InvariantChecker, InvariantViolation, ViolationKind, ViolationSeverity};
use crate::{Cycle, Slot};

/// Default number of local frames kept before the oldest half is compacted away.
/// At 50 cycles per second this is about 20 seconds of input.
pub const DEFAULT_MAX_HISTORY: usize = 1024;

/// Input history of a single slot.
///
/// The frame of absolute cycle `c` lives at `frames[c - starting_cycle]`.
/// `starting_cycle` only ever grows; cycles below it are gone for good.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotHistory {
    starting_cycle: Cycle,
    frames: VecDeque<InputFrame>,
}

impl SlotHistory {
    fn new(starting_cycle: Cycle) -> Self {
        Self {
            starting_cycle,
            frames: VecDeque::new(),
        }
    }

    /// The first cycle still held.
    #[must_use]
    pub const fn starting_cycle(&self) -> Cycle {
        self.starting_cycle
    }

    /// Number of frames held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns `true` if no frame is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// The last cycle held, or `starting_cycle - 1` when empty.
    #[must_use]
    pub fn last_cycle(&self) -> Cycle {
        self.starting_cycle + self.frames.len() as i32 - 1
    }

    /// The newest frame.
    #[must_use]
    pub fn tail(&self) -> Option<&InputFrame> {
        self.frames.back()
    }

    /// Iterates `(cycle, frame)` pairs from oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (Cycle, &InputFrame)> + '_ {
        let start = self.starting_cycle;
        self.frames
            .iter()
            .enumerate()
            .map(move |(i, frame)| (start + i as i32, frame))
    }

    /// Index of `cycle` inside `frames`, if it is held.
    fn index_of(&self, cycle: i64) -> Option<usize> {
        let offset = cycle - self.starting_cycle.as_i64();
        if offset >= 0 && (offset as usize) < self.frames.len() {
            Some(offset as usize)
        } else {
            None
        }
    }

    fn frame_at(&self, cycle: Cycle) -> Option<&InputFrame> {
        self.index_of(cycle.as_i64()).map(|i| &self.frames[i])
    }
}

/// Input history of every slot in a session.
///
/// Local input is appended once per cycle; remote input is written by the packet
/// decoder, possibly overwriting speculative frames. When the local history
/// reaches `max_history` frames, the oldest half of every slot is dropped at once
/// so that all slots keep the same `starting_cycle`.
///
/// Out-of-range reads through [`HistoryStore::get`] are caller bugs and panic.
/// Use [`HistoryStore::try_get`] where a missing cycle is expected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryStore {
    slots: Vec<SlotHistory>,
    local_slot: Slot,
    max_history: usize,
}

impl HistoryStore {
    /// Creates empty histories for `num_players` slots, all starting at `starting_cycle`.
    ///
    /// `max_history` is clamped to at least 2 so compaction always frees something.
    #[must_use]
    pub fn new(
        starting_cycle: Cycle,
        num_players: usize,
        local_slot: Slot,
        max_history: usize,
    ) -> Self {
        Self {
            slots: vec![SlotHistory::new(starting_cycle); num_players],
            local_slot,
            max_history: max_history.max(2),
        }
    }

    /// Number of slots.
    #[must_use]
    pub fn num_players(&self) -> usize {
        self.slots.len()
    }

    /// The local slot.
    #[must_use]
    pub const fn local_slot(&self) -> Slot {
        self.local_slot
    }

    /// Local history length that triggers compaction.
    #[must_use]
    pub const fn max_history(&self) -> usize {
        self.max_history
    }

    /// The history of one slot.
    #[must_use]
    pub fn slot(&self, slot: Slot) -> &SlotHistory {
        &self.slots[slot.as_usize()]
    }

    /// The first cycle still held for `slot`.
    #[must_use]
    pub fn starting_cycle(&self, slot: Slot) -> Cycle {
        self.slot(slot).starting_cycle
    }

    /// Number of frames held for `slot`.
    #[must_use]
    pub fn len(&self, slot: Slot) -> usize {
        self.slot(slot).len()
    }

    /// The last cycle held for `slot`.
    #[must_use]
    pub fn last_cycle(&self, slot: Slot) -> Cycle {
        self.slot(slot).last_cycle()
    }

    /// Appends `frame` at the tail of `slot`.
    ///
    /// Returns the number of frames compacted away from every slot, which is
    /// non-zero only when the local history just reached `max_history`.
    ///
    /// # Panics
    /// Panics if compaction is due while a remote slot holds fewer frames than
    /// are about to be dropped. Remote histories are kept at least as long as the
    /// local one by speculative filling, so this signals a broken caller.
    pub fn append(&mut self, slot: Slot, frame: InputFrame) -> usize {
        self.slots[slot.as_usize()].frames.push_back(frame);
        if slot == self.local_slot && self.len(slot) >= self.max_history {
            let nerase = self.len(slot) / 2;
            self.compact(nerase);
            return nerase;
        }
        0
    }

    #[allow(clippy::panic)]
    fn compact(&mut self, nerase: usize) {
        for (index, history) in self.slots.iter().enumerate() {
            if index != self.local_slot.as_usize() && history.len() < nerase {
                report_violation!(
                    ViolationSeverity::Critical,
                    ViolationKind::History,
                    "Cannot compact {} cycles: slot {} only holds {} frames",
                    nerase,
                    index,
                    history.len()
                );
                panic!(
                    "history compaction of {} cycles with slot {} holding only {} frames",
                    nerase,
                    index,
                    history.len()
                );
            }
        }

        for history in &mut self.slots {
            history.frames.drain(..nerase);
            history.starting_cycle += nerase as i32;
        }
        tracing::debug!(
            nerase,
            starting_cycle = %self.starting_cycle(self.local_slot),
            "Compacted input history"
        );
        crate::debug_check_invariants!(self, "after compaction");
    }

    /// Removes and returns the newest frame of `slot`.
    pub fn remove_last(&mut self, slot: Slot) -> Option<InputFrame> {
        self.slots[slot.as_usize()].frames.pop_back()
    }

    /// Returns the frame of `slot` at `cycle`.
    ///
    /// # Panics
    /// Panics if `cycle` is not held: it was compacted away or has not been
    /// recorded yet.
    #[allow(clippy::panic)]
    #[must_use]
    pub fn get(&self, slot: Slot, cycle: Cycle) -> &InputFrame {
        let history = self.slot(slot);
        match history.frame_at(cycle) {
            Some(frame) => frame,
            None => {
                report_violation!(
                    ViolationSeverity::Critical,
                    ViolationKind::History,
                    "Cycle {} of slot {} is outside held history [{}, {}]",
                    cycle,
                    slot,
                    history.starting_cycle,
                    history.last_cycle()
                );
                panic!(
                    "cycle {} of slot {} is outside held history [{}, {}]",
                    cycle,
                    slot,
                    history.starting_cycle,
                    history.last_cycle()
                );
            },
        }
    }

    /// Returns the frame of `slot` at `cycle`, or `None` if it is not held.
    #[must_use]
    pub fn try_get(&self, slot: Slot, cycle: Cycle) -> Option<&InputFrame> {
        self.slots.get(slot.as_usize())?.frame_at(cycle)
    }

    /// Overwrites the held frame of `slot` at `cycle`.
    ///
    /// Returns `true` if the stored frame changed. Cycles that are not held are
    /// left alone and report `false`.
    pub fn replace(&mut self, slot: Slot, cycle: Cycle, frame: &InputFrame) -> bool {
        let history = &mut self.slots[slot.as_usize()];
        match history.index_of(cycle.as_i64()) {
            Some(i) if history.frames[i] != *frame => {
                history.frames[i] = frame.clone();
                true
            },
            _ => false,
        }
    }

    /// Overwrites every held frame of `slot` from `from_cycle` to the tail with `frame`.
    ///
    /// Speculative frames past a newly confirmed cycle assume nothing changed
    /// since then. Returns the first cycle whose frame actually changed.
    pub fn extend_forward(
        &mut self,
        slot: Slot,
        from_cycle: Cycle,
        frame: &InputFrame,
    ) -> Option<Cycle> {
        let history = &mut self.slots[slot.as_usize()];
        let start = history.starting_cycle;
        let first = (from_cycle - start).max(0) as usize;
        let mut first_changed = None;
        for (i, stored) in history.frames.iter_mut().enumerate().skip(first) {
            if stored != frame {
                *stored = frame.clone();
                first_changed.get_or_insert(start + i as i32);
            }
        }
        first_changed
    }

    /// Grows `slot` until it holds `cycle`.
    ///
    /// New frames are copies of `frame`, or of the current tail when `frame` is
    /// `None` ("assume same as last input"), or empty frames on an empty history.
    /// Returns the number of frames added.
    pub fn grow_to_include(
        &mut self,
        slot: Slot,
        cycle: Cycle,
        frame: Option<&InputFrame>,
    ) -> usize {
        let history = &mut self.slots[slot.as_usize()];
        let wanted = cycle.as_i64() - history.starting_cycle.as_i64() + 1;
        if wanted <= history.frames.len() as i64 {
            return 0;
        }
        let fill = match frame {
            Some(frame) => frame.clone(),
            None => history.frames.back().cloned().unwrap_or_default(),
        };
        let added = wanted as usize - history.frames.len();
        history.frames.resize(wanted as usize, fill);
        added
    }
}

impl InvariantChecker for HistoryStore {
    /// # Invariants
    ///
    /// 1. The local slot is one of the session's slots
    /// 2. The local history is shorter than `max_history` (compaction ran)
    /// 3. Every slot shares the local slot's `starting_cycle`
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        if self.local_slot.as_usize() >= self.slots.len() {
            return Err(
                InvariantViolation::new("HistoryStore", "local slot out of range").with_details(
                    format!(
                        "local_slot={}, num_players={}",
                        self.local_slot,
                        self.slots.len()
                    ),
                ),
            );
        }

        let local = self.slot(self.local_slot);
        if local.len() >= self.max_history {
            return Err(InvariantViolation::new(
                "HistoryStore",
                "local history reached max_history without compaction",
            )
            .with_details(format!(
                "len={}, max_history={}",
                local.len(),
                self.max_history
            )));
        }

        for (index, history) in self.slots.iter().enumerate() {
            if history.starting_cycle != local.starting_cycle {
                return Err(InvariantViolation::new(
                    "HistoryStore",
                    "slots disagree on starting cycle",
                )
                .with_details(format!(
                    "slot={}, starting_cycle={}, local_starting_cycle={}",
                    index, history.starting_cycle, local.starting_cycle
                )));
            }
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

    fn store(num_players: usize, max_history: usize) -> HistoryStore {
        HistoryStore::new(Cycle::new(0), num_players, Slot::new(0), max_history)
    }

    #[test]
    fn append_and_get_by_absolute_cycle() {
        let mut history = store(2, 64);
        for i in 0..5u8 {
            history.append(Slot::new(0), frame(i));
        }
        assert_eq!(history.len(Slot::new(0)), 5);
        assert_eq!(history.last_cycle(Slot::new(0)), Cycle::new(4));
        assert_eq!(history.get(Slot::new(0), Cycle::new(3)), &frame(3));
        assert!(history.try_get(Slot::new(0), Cycle::new(5)).is_none());
        assert!(history.try_get(Slot::new(1), Cycle::new(0)).is_none());
    }

    #[test]
    fn empty_history_last_cycle_precedes_start() {
        let history = HistoryStore::new(Cycle::new(100), 2, Slot::new(1), 64);
        assert_eq!(history.last_cycle(Slot::new(0)), Cycle::new(99));
    }

    #[test]
    fn remove_last_pops_tail_and_tolerates_empty() {
        let mut history = store(1, 64);
        assert!(history.remove_last(Slot::new(0)).is_none());
        history.append(Slot::new(0), frame(1));
        history.append(Slot::new(0), frame(2));
        assert_eq!(history.remove_last(Slot::new(0)), Some(frame(2)));
        assert_eq!(history.len(Slot::new(0)), 1);
    }

    #[test]
    fn compaction_drops_half_of_every_slot() {
        let mut history = store(2, 8);
        for i in 0..8u8 {
            history.grow_to_include(Slot::new(1), Cycle::new(i32::from(i)), Some(&frame(i)));
        }
        let mut erased = 0;
        for i in 0..8u8 {
            erased += history.append(Slot::new(0), frame(i));
        }
        assert_eq!(erased, 4);
        for slot in [Slot::new(0), Slot::new(1)] {
            assert_eq!(history.starting_cycle(slot), Cycle::new(4));
            assert_eq!(history.len(slot), 4);
            assert_eq!(history.get(slot, Cycle::new(4)), &frame(4));
            assert!(history.try_get(slot, Cycle::new(3)).is_none());
        }
        assert!(history.check_invariants().is_ok());
    }

    #[test]
    #[should_panic(expected = "history compaction")]
    fn compaction_with_short_remote_history_panics() {
        let mut history = store(2, 4);
        for i in 0..4u8 {
            history.append(Slot::new(0), frame(i));
        }
    }

    #[test]
    #[should_panic(expected = "outside held history")]
    fn get_before_starting_cycle_panics() {
        let mut history = HistoryStore::new(Cycle::new(10), 1, Slot::new(0), 64);
        history.append(Slot::new(0), frame(1));
        let _ = history.get(Slot::new(0), Cycle::new(9));
    }

    #[test]
    fn replace_reports_changes_only() {
        let mut history = store(2, 64);
        history.grow_to_include(Slot::new(1), Cycle::new(2), Some(&frame(1)));
        assert!(!history.replace(Slot::new(1), Cycle::new(1), &frame(1)));
        assert!(history.replace(Slot::new(1), Cycle::new(1), &frame(3)));
        assert_eq!(history.get(Slot::new(1), Cycle::new(1)), &frame(3));
        assert!(!history.replace(Slot::new(1), Cycle::new(7), &frame(3)));
    }

    #[test]
    fn extend_forward_overwrites_speculation() {
        let mut history = store(2, 64);
        history.grow_to_include(Slot::new(1), Cycle::new(5), Some(&frame(1)));
        let changed = history.extend_forward(Slot::new(1), Cycle::new(3), &frame(2));
        assert_eq!(changed, Some(Cycle::new(3)));
        assert_eq!(history.get(Slot::new(1), Cycle::new(2)), &frame(1));
        for cycle in 3..=5 {
            assert_eq!(history.get(Slot::new(1), Cycle::new(cycle)), &frame(2));
        }
        assert_eq!(
            history.extend_forward(Slot::new(1), Cycle::new(3), &frame(2)),
            None
        );
    }

    #[test]
    fn grow_repeats_tail_when_no_frame_given() {
        let mut history = store(2, 64);
        assert_eq!(history.grow_to_include(Slot::new(1), Cycle::new(1), None), 2);
        assert_eq!(history.get(Slot::new(1), Cycle::new(1)), &InputFrame::default());
        history.replace(Slot::new(1), Cycle::new(1), &frame(6));
        assert_eq!(history.grow_to_include(Slot::new(1), Cycle::new(4), None), 3);
        assert_eq!(history.get(Slot::new(1), Cycle::new(4)), &frame(6));
        assert_eq!(history.grow_to_include(Slot::new(1), Cycle::new(2), None), 0);
    }

    #[test]
    fn iter_yields_absolute_cycles() {
        let mut history = HistoryStore::new(Cycle::new(20), 1, Slot::new(0), 64);
        history.append(Slot::new(0), frame(1));
        history.append(Slot::new(0), frame(2));
        let cycles: Vec<i32> = history
            .slot(Slot::new(0))
            .iter()
            .map(|(c, _)| c.as_i32())
            .collect();
        assert_eq!(cycles, vec![20, 21]);
    }

    #[test]
    fn invariant_checker_flags_diverging_starts() {
        let mut history = store(2, 64);
        history.slots[1].starting_cycle = Cycle::new(3);
        assert!(history.check_invariants().is_err());
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod property_tests {
    use super::*;
    use crate::frame::ControlKeys;
    use proptest::prelude::*;

    proptest! {
        /// Compaction keeps every slot's first retained cycle readable and the one before it gone.
        #[test]
        fn prop_compaction_keeps_slots_aligned(
            max_history in 2usize..64,
            ticks in 1usize..256,
            num_players in 1usize..=4,
        ) {
            let mut history = HistoryStore::new(Cycle::new(0), num_players, Slot::new(0), max_history);
            for tick in 0..ticks {
                let cycle = Cycle::new(tick as i32);
                for remote in 1..num_players {
                    history.grow_to_include(Slot::new(remote), cycle, None);
                }
                history.append(Slot::new(0), InputFrame::new(ControlKeys::from_bits(tick as u8)));
            }
            let start = history.starting_cycle(Slot::new(0));
            for slot in 0..num_players {
                let slot = Slot::new(slot);
                prop_assert_eq!(history.starting_cycle(slot), start);
                prop_assert!(history.try_get(slot, start).is_some());
                prop_assert!(history.try_get(slot, start - 1).is_none());
            }
            prop_assert!(history.len(Slot::new(0)) < max_history.max(2));
            prop_assert!(history.check_invariants().is_ok());
        }
    }
}
