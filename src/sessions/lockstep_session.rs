use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::frame::{Control, InputFrame};
use crate::network::codec::{self, DecodeOutcome};
use crate::network::inbox::PacketInbox;
use crate::sampler::{InputDevice, InputSampler};
use crate::sessions::config::SessionConfig;
use crate::sessions::snapshot::SessionSnapshot;
use crate::sessions::state::SessionState;
use crate::sessions::stats::SessionStats;
use crate::telemetry::{Violation, ViolationKind, ViolationObserver, ViolationSeverity};
use crate::{
    report_violation_to, Cycle, LockstepError, PacketError, PacketTransport, Slot, MAX_PLAYERS,
};

/// A [`LockstepSession`] holds the input state of one peer in a lockstep game.
///
/// Once per simulation tick the game:
/// 1. samples local input with [`sample_local`](Self::sample_local) (or records
///    a frame from its own sampler with [`add_local_input`](Self::add_local_input)),
/// 2. sends [`encode_packet`](Self::encode_packet) to every peer,
/// 3. feeds every received packet to [`handle_packet`](Self::handle_packet),
/// 4. checks [`first_invalid_cycle`](Self::first_invalid_cycle), rewinds and
///    resimulates from there if needed, then calls
///    [`clear_invalid`](Self::clear_invalid),
/// 5. reads every slot's input for the cycle it simulates through
///    [`input`](Self::input).
///
/// Remote input that has not arrived yet is guessed by repeating the last known
/// frame; packets that contradict a guess mark the cycle for resimulation.
pub struct LockstepSession {
    config: SessionConfig,
    state: SessionState,
    sampler: InputSampler,
    stats: SessionStats,
    violation_observer: Option<Arc<dyn ViolationObserver>>,
}

impl std::fmt::Debug for LockstepSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockstepSession")
            .field("num_players", &self.num_players())
            .field("local_slot", &self.local_slot())
            .field("starting_cycle", &self.starting_cycle())
            .field("current_cycle", &self.current_cycle())
            .field("our_highest_confirmed", &self.our_highest_confirmed())
            .field("first_invalid_cycle", &self.first_invalid_cycle())
            .finish_non_exhaustive()
    }
}

impl LockstepSession {
    pub(crate) fn new(
        config: SessionConfig,
        num_players: usize,
        local_slot: Slot,
        starting_cycle: Cycle,
        violation_observer: Option<Arc<dyn ViolationObserver>>,
    ) -> Self {
        let state = SessionState::new(
            starting_cycle,
            num_players,
            local_slot,
            config.max_history,
            config.checksum_history,
        );
        let sampler = InputSampler::new(config.key_bindings.clone(), config.mouse_bindings.clone());
        tracing::debug!(num_players, %local_slot, %starting_cycle, "Created lockstep session");
        Self {
            config,
            state,
            sampler,
            stats: SessionStats::new(),
            violation_observer,
        }
    }

    /// Resets the session for a new level.
    ///
    /// Every history, confirmation counter, checksum, lock and statistic is
    /// discarded. Key bindings and the observer are kept.
    ///
    /// # Errors
    /// Returns [`LockstepError::InvalidRequest`] for a player count outside
    /// `1..=MAX_PLAYERS` and [`LockstepError::InvalidSlot`] for an inactive local slot.
    pub fn new_level(
        &mut self,
        starting_cycle: Cycle,
        num_players: usize,
        local_slot: Slot,
    ) -> Result<(), LockstepError> {
        if num_players == 0 || num_players > MAX_PLAYERS {
            return Err(LockstepError::InvalidRequest {
                info: format!(
                    "Number of players must be between 1 and {}, got {}",
                    MAX_PLAYERS, num_players
                ),
            });
        }
        if !local_slot.is_active_for(num_players) {
            return Err(LockstepError::InvalidSlot {
                slot: local_slot,
                num_players,
            });
        }
        if starting_cycle.as_i32() == i32::MIN {
            return Err(LockstepError::InvalidRequest {
                info: "Starting cycle must be above i32::MIN".to_owned(),
            });
        }
        self.state = SessionState::new(
            starting_cycle,
            num_players,
            local_slot,
            self.config.max_history,
            self.config.checksum_history,
        );
        self.stats = SessionStats::new();
        tracing::debug!(num_players, %local_slot, %starting_cycle, "Started new level");
        Ok(())
    }

    /// The configuration the session was built with.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Read access to the whole input state.
    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Counters since the level started.
    #[must_use]
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Number of active slots.
    #[must_use]
    pub fn num_players(&self) -> usize {
        self.state.num_players()
    }

    /// The slot this peer controls.
    #[must_use]
    pub fn local_slot(&self) -> Slot {
        self.state.local_slot()
    }

    /// The oldest cycle still held in history.
    #[must_use]
    pub fn starting_cycle(&self) -> Cycle {
        self.state.history.starting_cycle(self.local_slot())
    }

    /// The newest local cycle, or `starting_cycle - 1` before the first sample.
    #[must_use]
    pub fn current_cycle(&self) -> Cycle {
        self.state.history.last_cycle(self.local_slot())
    }

    /// Highest cycle whose input of `slot` is final.
    #[must_use]
    pub fn highest_confirmed(&self, slot: Slot) -> Cycle {
        self.state.confirmation.highest_confirmed(slot)
    }

    /// Highest cycle whose input of every slot is final.
    #[must_use]
    pub fn our_highest_confirmed(&self) -> Cycle {
        self.state.confirmation.our_highest_confirmed()
    }

    /// Highest cycle of our input that every peer holds.
    #[must_use]
    pub fn their_highest_confirmed(&self) -> Cycle {
        self.state.confirmation.their_highest_confirmed()
    }

    // ---------------------------------------------------------------------
    // Local input
    // ---------------------------------------------------------------------

    /// Samples `device` for the next cycle and records the result.
    ///
    /// A pushed input lock replaces the device reading. Returns the recorded cycle.
    pub fn sample_local<D: InputDevice + ?Sized>(&mut self, device: &mut D) -> Cycle {
        let frame = self.sampler.sample(device, self.state.lock_stack.last());
        self.add_local_input(frame)
    }

    /// Records `frame` as the local input of the next cycle and returns that cycle.
    pub fn add_local_input(&mut self, frame: InputFrame) -> Cycle {
        let compacted = self.state.record_local(frame);
        if compacted > 0 {
            self.after_compaction(compacted);
        }
        crate::debug_check_invariants!(self.state, "after recording local input");
        self.current_cycle()
    }

    /// Samples until the local history contains `cycle`. Returns the number of
    /// frames sampled.
    pub fn read_until<D: InputDevice + ?Sized>(&mut self, device: &mut D, cycle: Cycle) -> usize {
        let mut sampled = 0;
        while self.current_cycle() < cycle {
            self.sample_local(device);
            sampled += 1;
        }
        sampled
    }

    /// Takes back the newest local frame, e.g. when a tick is abandoned.
    pub fn unread_local(&mut self) -> Option<InputFrame> {
        let frame = self.state.unrecord_local();
        if frame.is_some() {
            let cycle = self.current_cycle() + 1;
            tracing::trace!(%cycle, "Unread local input");
        }
        frame
    }

    /// Attaches `payload` to the next sampled local frame.
    ///
    /// # Errors
    /// Returns [`LockstepError::InvalidUserPayload`] if `payload` contains a NUL byte.
    pub fn set_user_output(&mut self, payload: &[u8]) -> Result<(), LockstepError> {
        self.sampler.set_user_output(payload)
    }

    /// Forces every sampled local frame to `frame` until the lock is popped.
    pub fn push_input_lock(&mut self, frame: InputFrame) {
        self.state.lock_stack.push(frame);
    }

    /// Removes the innermost input lock.
    pub fn pop_input_lock(&mut self) -> Option<InputFrame> {
        self.state.lock_stack.pop()
    }

    /// The frame currently forced on local input, if any.
    #[must_use]
    pub fn input_lock(&self) -> Option<&InputFrame> {
        self.state.lock_stack.last()
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    /// The input of `slot` at `cycle`.
    ///
    /// # Panics
    /// Panics if `cycle` is outside the held history of `slot`. Use
    /// [`try_input`](Self::try_input) where that is expected.
    #[must_use]
    pub fn input(&self, slot: Slot, cycle: Cycle) -> &InputFrame {
        self.state.history.get(slot, cycle)
    }

    /// The input of `slot` at `cycle`, if held.
    #[must_use]
    pub fn try_input(&self, slot: Slot, cycle: Cycle) -> Option<&InputFrame> {
        self.state.history.try_get(slot, cycle)
    }

    /// Whether `control` is held by `slot` at `cycle`.
    ///
    /// # Panics
    /// Panics under the same conditions as [`input`](Self::input).
    #[must_use]
    pub fn control_status(&self, cycle: Cycle, slot: Slot, control: Control) -> bool {
        self.input(slot, cycle).is_pressed(control)
    }

    /// The user payload of `slot` at `cycle`.
    ///
    /// # Panics
    /// Panics under the same conditions as [`input`](Self::input).
    #[must_use]
    pub fn user_input(&self, cycle: Cycle, slot: Slot) -> &[u8] {
        self.input(slot, cycle).user()
    }

    // ---------------------------------------------------------------------
    // Checksums and resimulation
    // ---------------------------------------------------------------------

    /// Records our checksum of the simulation state at `cycle`. `0` means unknown.
    pub fn record_checksum(&mut self, cycle: Cycle, checksum: i32) {
        self.state.checksums.record(cycle, checksum);
    }

    /// Our recorded checksum of `cycle`.
    #[must_use]
    pub fn checksum(&self, cycle: Cycle) -> Option<i32> {
        self.state.checksums.get(cycle)
    }

    /// The earliest cycle whose input changed after it was handed out.
    #[must_use]
    pub fn first_invalid_cycle(&self) -> Option<Cycle> {
        self.state.replay.first_invalid_cycle()
    }

    /// Acknowledges that the simulation has been replayed.
    pub fn clear_invalid(&mut self) {
        self.state.replay.clear();
    }

    // ---------------------------------------------------------------------
    // Network
    // ---------------------------------------------------------------------

    /// Builds the packet for all peers: our recent input plus confirmation state.
    #[must_use]
    pub fn encode_packet(&mut self) -> Vec<u8> {
        self.stats.packets_sent += 1;
        codec::encode_packet(&self.state)
    }

    /// Applies a packet received from a peer.
    ///
    /// Malformed packets are dropped as a whole, reported to the observer and
    /// counted; stale packets are dropped quietly.
    ///
    /// # Errors
    /// Returns the reason the packet was dropped. The session is unchanged then.
    pub fn handle_packet(&mut self, bytes: &[u8]) -> Result<DecodeOutcome, PacketError> {
        self.stats.packets_received += 1;
        match codec::decode_packet(bytes, &mut self.state, self.config.max_lead) {
            Ok(outcome) => {
                self.stats.packets_accepted += 1;
                self.stats.corrections += outcome.corrections as u64;
                if let Some(report) = outcome.desync {
                    self.stats.desyncs_detected += 1;
                    self.stats.last_desync_cycle = Some(report.cycle);
                    let violation = Violation::new(
                        ViolationSeverity::Warning,
                        ViolationKind::ChecksumMismatch,
                        format!(
                            "Checksum mismatch with slot {}: local {:#010x}, remote {:#010x}",
                            report.slot, report.local_checksum, report.remote_checksum
                        ),
                        concat!(file!(), ":", line!()),
                    )
                    .with_cycle(report.cycle)
                    .with_context("slot", report.slot.to_string());
                    report_violation_to!(self.violation_observer, violation);
                }
                if let Some(cycle) = outcome.first_correction {
                    tracing::trace!(
                        slot = %outcome.slot,
                        %cycle,
                        corrections = outcome.corrections,
                        "Remote input corrected"
                    );
                }
                Ok(outcome)
            },
            Err(err) => {
                self.stats.record_rejection(&err);
                if err.is_stale() {
                    tracing::trace!(reason = %err, "Dropped stale packet");
                } else {
                    let violation = Violation::new(
                        ViolationSeverity::Warning,
                        ViolationKind::NetworkProtocol,
                        format!("Dropped packet: {}", err),
                        concat!(file!(), ":", line!()),
                    )
                    .with_context("reason", err.as_str())
                    .with_context("len", bytes.len().to_string());
                    report_violation_to!(self.violation_observer, violation);
                }
                Err(err)
            },
        }
    }

    /// Encodes one packet and sends it to every address in `peers`.
    pub fn send_packets<A, T>(&mut self, transport: &mut T, peers: &[A])
    where
        A: Clone + PartialEq + Eq + std::hash::Hash,
        T: PacketTransport<A> + ?Sized,
    {
        let packet = self.encode_packet();
        for addr in peers {
            transport.send_to(&packet, addr);
        }
    }

    /// Handles every packet `transport` has received. Returns how many were accepted.
    pub fn poll_transport<A, T>(&mut self, transport: &mut T) -> usize
    where
        A: Clone + PartialEq + Eq + std::hash::Hash,
        T: PacketTransport<A> + ?Sized,
    {
        transport
            .receive_all_packets()
            .into_iter()
            .filter(|(_, packet)| self.handle_packet(packet).is_ok())
            .count()
    }

    /// Handles every packet queued by a background I/O thread. Returns how many
    /// were accepted.
    pub fn drain_inbox<A>(&mut self, inbox: &PacketInbox<A>) -> usize {
        inbox
            .drain()
            .into_iter()
            .filter(|(_, packet)| self.handle_packet(packet).is_ok())
            .count()
    }

    // ---------------------------------------------------------------------
    // Backup
    // ---------------------------------------------------------------------

    /// Captures the input state.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::capture(&self.state)
    }

    /// Returns to a captured input state.
    pub fn restore(&mut self, snapshot: &SessionSnapshot) {
        snapshot.restore_into(&mut self.state);
        tracing::debug!(current_cycle = %self.current_cycle(), "Restored input state");
    }

    /// Starts a scope whose input changes are undone when it ends.
    ///
    /// ```
    /// use lockstep_sync::{InputFrame, SessionBuilder};
    ///
    /// let mut session = SessionBuilder::new().build().expect("valid session");
    /// {
    ///     let mut scope = session.backup_scope();
    ///     scope.add_local_input(InputFrame::default());
    ///     assert_eq!(scope.current_cycle().as_i32(), 0);
    /// }
    /// assert_eq!(session.current_cycle().as_i32(), -1);
    /// ```
    pub fn backup_scope(&mut self) -> BackupScope<'_> {
        let snapshot = self.snapshot();
        BackupScope {
            session: self,
            snapshot: Some(snapshot),
        }
    }

    // ---------------------------------------------------------------------
    // Diagnostics
    // ---------------------------------------------------------------------

    /// Logs the last `cycles` frames of every slot at debug level.
    pub fn debug_dump(&self, cycles: usize) {
        tracing::debug!(
            current_cycle = %self.current_cycle(),
            our_highest_confirmed = %self.our_highest_confirmed(),
            their_highest_confirmed = %self.their_highest_confirmed(),
            stats = %self.stats,
            "Input state"
        );
        for index in 0..self.num_players() {
            let slot = Slot::new(index);
            let history = self.state.history.slot(slot);
            let frames: Vec<String> = history
                .iter()
                .rev()
                .take(cycles)
                .map(|(cycle, frame)| format!("{}:{:#04x}", cycle, frame.keys().bits()))
                .collect();
            tracing::debug!(
                %slot,
                starting_cycle = %history.starting_cycle(),
                last_cycle = %history.last_cycle(),
                highest_confirmed = %self.highest_confirmed(slot),
                frames = %frames.join(" "),
                "Slot history"
            );
        }
    }

    fn after_compaction(&mut self, compacted: usize) {
        self.stats.compactions += 1;
        let starting_cycle = self.starting_cycle();
        let confirmed = self.our_highest_confirmed();
        if starting_cycle > confirmed + 1 {
            let violation = Violation::new(
                ViolationSeverity::Warning,
                ViolationKind::History,
                format!(
                    "Compacted {} cycles past the confirmed cycle {}; lagging peers can no longer be served",
                    compacted, confirmed
                ),
                concat!(file!(), ":", line!()),
            )
            .with_cycle(starting_cycle);
            report_violation_to!(self.violation_observer, violation);
        }
    }
}

/// Undoes all input changes made through it when dropped, unless cancelled.
///
/// Dereferences to the [`LockstepSession`] it guards.
pub struct BackupScope<'a> {
    session: &'a mut LockstepSession,
    snapshot: Option<SessionSnapshot>,
}

impl BackupScope<'_> {
    /// Keeps the changes made in this scope.
    pub fn cancel(mut self) {
        self.snapshot = None;
    }
}

impl Deref for BackupScope<'_> {
    type Target = LockstepSession;

    fn deref(&self) -> &Self::Target {
        self.session
    }
}

impl DerefMut for BackupScope<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session
    }
}

impl Drop for BackupScope<'_> {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            self.session.restore(&snapshot);
        }
    }
}

impl std::fmt::Debug for BackupScope<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupScope")
            .field("session", &self.session)
            .field("armed", &self.snapshot.is_some())
            .finish()
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
    use crate::network::inbox::packet_channel;
    use crate::sampler::{KeyCode, RawInputState};
    use crate::telemetry::CollectingObserver;
    use crate::SessionBuilder;

    struct Keyboard(RawInputState);

    impl InputDevice for Keyboard {
        fn poll(&mut self) -> RawInputState {
            self.0.clone()
        }
    }

    fn frame(bits: u8) -> InputFrame {
        InputFrame::new(ControlKeys::from_bits(bits))
    }

    fn session(num_players: usize, local: usize) -> LockstepSession {
        SessionBuilder::new()
            .with_num_players(num_players)
            .with_local_slot(Slot::new(local))
            .build()
            .unwrap()
    }

    #[test]
    fn sampling_records_and_confirms_local_input() {
        let mut session = session(2, 0);
        let mut keyboard = Keyboard(RawInputState::new());
        keyboard.0.press(KeyCode::UP);
        assert_eq!(session.sample_local(&mut keyboard), Cycle::new(0));
        assert!(session.control_status(Cycle::new(0), Slot::new(0), Control::Up));
        assert_eq!(session.highest_confirmed(Slot::new(0)), Cycle::new(0));
        assert_eq!(session.our_highest_confirmed(), Cycle::new(-1));
    }

    #[test]
    fn input_lock_overrides_device() {
        let mut session = session(1, 0);
        let mut keyboard = Keyboard(RawInputState::new());
        keyboard.0.press(KeyCode::LEFT);
        session.push_input_lock(frame(0));
        session.sample_local(&mut keyboard);
        session.pop_input_lock();
        session.sample_local(&mut keyboard);
        assert!(!session.control_status(Cycle::new(0), Slot::new(0), Control::Left));
        assert!(session.control_status(Cycle::new(1), Slot::new(0), Control::Left));
    }

    #[test]
    fn read_until_samples_missing_cycles() {
        let mut session = session(2, 1);
        let mut keyboard = Keyboard(RawInputState::new());
        assert_eq!(session.read_until(&mut keyboard, Cycle::new(4)), 5);
        assert_eq!(session.read_until(&mut keyboard, Cycle::new(2)), 0);
        assert_eq!(session.current_cycle(), Cycle::new(4));
    }

    #[test]
    fn unread_local_rewinds() {
        let mut session = session(2, 0);
        session.add_local_input(frame(1));
        session.add_local_input(frame(2));
        assert_eq!(session.unread_local(), Some(frame(2)));
        assert_eq!(session.current_cycle(), Cycle::new(0));
        assert_eq!(session.highest_confirmed(Slot::new(0)), Cycle::new(0));
    }

    #[test]
    fn user_output_reaches_remote_peer() {
        let mut host = session(2, 0);
        let mut guest = session(2, 1);
        let keyboard = &mut Keyboard(RawInputState::new());
        host.set_user_output(b"chat:hi").unwrap();
        host.sample_local(keyboard);
        guest.handle_packet(&host.encode_packet()).unwrap();
        assert_eq!(guest.user_input(Cycle::new(0), Slot::new(0)), b"chat:hi");
    }

    #[test]
    fn rejected_packet_is_reported_and_counted() {
        let observer = Arc::new(CollectingObserver::new());
        let mut session = SessionBuilder::new()
            .with_observer(observer.clone())
            .build()
            .unwrap();
        assert_eq!(
            session.handle_packet(&[0; 4]),
            Err(PacketError::TooShort { len: 4 })
        );
        assert!(observer.has_violation(ViolationKind::NetworkProtocol));
        assert_eq!(session.stats().packets_dropped["too_short"], 1);
        assert_eq!(session.stats().packets_received, 1);
    }

    #[test]
    fn stale_packet_is_not_reported() {
        let observer = Arc::new(CollectingObserver::new());
        let mut guest = SessionBuilder::new()
            .with_local_slot(Slot::new(1))
            .with_observer(observer.clone())
            .build()
            .unwrap();
        let mut host = session(2, 0);
        host.add_local_input(frame(1));
        let old = host.encode_packet();
        host.add_local_input(frame(1));
        guest.handle_packet(&host.encode_packet()).unwrap();

        assert!(guest.handle_packet(&old).unwrap_err().is_stale());
        assert!(observer.is_empty());
        assert_eq!(guest.stats().packets_stale, 1);
    }

    #[test]
    fn desync_is_reported() {
        let observer = Arc::new(CollectingObserver::new());
        let mut guest = SessionBuilder::new()
            .with_local_slot(Slot::new(1))
            .with_observer(observer.clone())
            .build()
            .unwrap();
        let mut host = session(2, 0);
        host.add_local_input(frame(1));
        host.add_local_input(frame(1));
        host.record_checksum(Cycle::new(0), 1234);
        guest.record_checksum(Cycle::new(0), 4321);

        let outcome = guest.handle_packet(&host.encode_packet()).unwrap();
        assert!(outcome.desync.is_some());
        assert!(observer.has_violation(ViolationKind::ChecksumMismatch));
        assert_eq!(guest.stats().desyncs_detected, 1);
        assert_eq!(guest.stats().last_desync_cycle, Some(Cycle::new(0)));
    }

    #[test]
    fn backup_scope_restores_unless_cancelled() {
        let mut session = session(2, 0);
        session.add_local_input(frame(1));
        {
            let mut scope = session.backup_scope();
            scope.add_local_input(frame(2));
            scope.push_input_lock(frame(3));
        }
        assert_eq!(session.current_cycle(), Cycle::new(0));
        assert!(session.input_lock().is_none());

        {
            let mut scope = session.backup_scope();
            scope.add_local_input(frame(2));
            scope.cancel();
        }
        assert_eq!(session.current_cycle(), Cycle::new(1));
    }

    #[test]
    fn inbox_is_drained_on_simulation_thread() {
        let mut host = session(2, 0);
        let mut guest = session(2, 1);
        let (sender, inbox) = packet_channel::<u8>();
        host.add_local_input(frame(4));
        sender.push(0, host.encode_packet());
        sender.push(0, vec![0xff]);
        assert_eq!(guest.drain_inbox(&inbox), 1);
        assert_eq!(guest.input(Slot::new(0), Cycle::new(0)), &frame(4));
    }

    #[test]
    fn new_level_resets_everything() {
        let mut session = session(2, 0);
        session.add_local_input(frame(1));
        session.record_checksum(Cycle::new(0), 5);
        session
            .new_level(Cycle::new(50), 3, Slot::new(2))
            .unwrap();
        assert_eq!(session.num_players(), 3);
        assert_eq!(session.local_slot(), Slot::new(2));
        assert_eq!(session.starting_cycle(), Cycle::new(50));
        assert_eq!(session.current_cycle(), Cycle::new(49));
        assert_eq!(session.checksum(Cycle::new(0)), None);
        assert!(session.new_level(Cycle::new(0), 2, Slot::new(2)).is_err());
    }

    #[test]
    fn compaction_past_confirmation_warns() {
        let observer = Arc::new(CollectingObserver::new());
        let mut session = SessionBuilder::new()
            .with_config(SessionConfig::short_history())
            .with_observer(observer.clone())
            .build()
            .unwrap();
        for _ in 0..64 {
            session.add_local_input(frame(0));
        }
        assert_eq!(session.stats().compactions, 1);
        assert_eq!(session.starting_cycle(), Cycle::new(32));
        assert!(observer.has_violation(ViolationKind::History));
    }
}
