//! Every packet carries the sender's recent local input together with enough
//! confirmation state for the receiver to decide what it still needs:
//!
//! ```text
//! offset 0       : u8   sender slot
//! offset 1..4    : i32  current cycle (sender's newest local frame)
//! offset 5..8    : i32  sender's checksum of current cycle - 1, 0 if unknown
//! offset 9..12   : i32  sender's highest cycle confirmed for every slot
//! offset 13..16  : i32  number of records
//! offset 17..    : records, oldest first, each [u8 keys][user bytes][0x00]
//! ```
//!
//! All integers are big-endian. The last record ends in `0x00`, and so does an
//! empty record list, so every valid packet ends in a NUL byte.
//!
//! Decoding happens in two phases. [`parse_packet`] validates the whole packet
//! against the current state without touching it; only a packet that parses
//! cleanly is applied. A rejected packet therefore leaves no trace.

use crate::frame::InputFrame;
use crate::network::reader::PacketReader;
use crate::sessions::state::SessionState;
use crate::{Cycle, PacketError, Slot};

/// Length of the fixed header up to, but not including, the record count.
pub const MIN_PACKET_LEN: usize = 13;

/// Length of the complete fixed header.
pub const HEADER_LEN: usize = 17;

/// A packet that passed validation, holding only the records still needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPacket {
    /// The sender.
    pub slot: Slot,
    /// The sender's newest local cycle.
    pub current_cycle: Cycle,
    /// The sender's checksum of `current_cycle - 1`, `0` if unknown.
    pub checksum: i32,
    /// How far the sender holds final input of every slot.
    pub highest_confirmed: Cycle,
    /// Records at or above what we already confirmed for the sender, oldest first.
    pub records: Vec<(Cycle, InputFrame)>,
}

/// Two peers computed different checksums for the same cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DesyncReport {
    /// The peer whose checksum differs.
    pub slot: Slot,
    /// The cycle both checksums describe.
    pub cycle: Cycle,
    /// Our checksum.
    pub local_checksum: i32,
    /// The peer's checksum.
    pub remote_checksum: i32,
}

/// What an accepted packet changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOutcome {
    /// The sender.
    pub slot: Slot,
    /// The sender's newest cycle, now confirmed for that slot.
    pub current_cycle: Cycle,
    /// Earliest cycle whose stored input changed, if any did.
    pub first_correction: Option<Cycle>,
    /// Number of stored frames that were overwritten with different input.
    pub corrections: usize,
    /// Set when the sender's checksum disagrees with ours.
    pub desync: Option<DesyncReport>,
}

/// Serializes the local history window that peers may still be missing.
///
/// Sends the local frames after the lowest cycle every peer has acknowledged,
/// bounded by what is still held. Never fails.
#[must_use]
pub fn encode_packet(state: &SessionState) -> Vec<u8> {
    let local = state.local_slot();
    let history = state.history.slot(local);
    let size = history.len() as i64;
    let current = history.last_cycle();
    let their = state.confirmation.their_highest_confirmed();
    let ncycles = (1 + current.as_i64() - their.as_i64()).clamp(0, size);

    let mut out = Vec::with_capacity(HEADER_LEN + ncycles as usize * 2);
    out.push(local.as_usize() as u8);
    out.extend_from_slice(&current.as_i32().to_be_bytes());
    out.extend_from_slice(&state.checksums.wire_value(current - 1).to_be_bytes());
    out.extend_from_slice(
        &state
            .confirmation
            .our_highest_confirmed()
            .as_i32()
            .to_be_bytes(),
    );
    out.extend_from_slice(&(ncycles as i32).to_be_bytes());

    let skip = (size - ncycles) as usize;
    for (_, frame) in history.iter().skip(skip) {
        out.push(frame.keys().bits());
        out.extend_from_slice(frame.user());
        out.push(0);
    }
    out
}

/// Validates `bytes` against `state` without modifying anything.
///
/// `max_lead` bounds how many cycles past our newest local frame a packet may
/// reach, which bounds how far a remote history can grow.
///
/// # Errors
/// Returns the first [`PacketError`] found. [`PacketError::Stale`] marks a
/// packet that is merely older than what we already have.
pub fn parse_packet(
    bytes: &[u8],
    state: &SessionState,
    max_lead: usize,
) -> Result<ParsedPacket, PacketError> {
    if bytes.len() < MIN_PACKET_LEN {
        return Err(PacketError::TooShort { len: bytes.len() });
    }
    let mut reader = PacketReader::new(bytes);

    let raw_slot = reader.read_u8()?;
    let slot = Slot::new(raw_slot as usize);
    if !slot.is_active_for(state.num_players()) {
        return Err(PacketError::UnknownSlot {
            slot: raw_slot,
            num_players: state.num_players(),
        });
    }
    if slot == state.local_slot() {
        return Err(PacketError::LoopbackSlot { slot });
    }

    let current_cycle = Cycle::new(reader.read_i32_be()?);
    let highest = state.confirmation.highest_confirmed(slot);
    if current_cycle < highest {
        return Err(PacketError::Stale {
            slot,
            current_cycle,
            highest_confirmed: highest,
        });
    }
    // the newest cycle must leave room for the speculative cycle after it
    let limit = (state.history.last_cycle(state.local_slot()).as_i64() + max_lead as i64)
        .min(i64::from(i32::MAX) - 1);
    if current_cycle.as_i64() > limit {
        return Err(PacketError::TooFarAhead {
            current_cycle,
            limit,
        });
    }

    let checksum = reader.read_i32_be()?;
    let highest_confirmed = Cycle::new(reader.read_i32_be()?);
    let ncycles = reader.read_i32_be()?;

    if bytes.last() != Some(&0) {
        return Err(PacketError::MissingTerminator);
    }
    if ncycles < 0 {
        return Err(PacketError::NegativeRecordCount { ncycles });
    }

    let ncycles = i64::from(ncycles);
    let start_cycle = 1 + current_cycle.as_i64() - ncycles;
    let skipped = (highest.as_i64() - start_cycle).clamp(0, ncycles);
    for _ in 0..skipped {
        reader
            .skip_record()
            .map_err(|_| PacketError::SkipOverrun { skipped })?;
    }

    let starting_cycle = state.history.starting_cycle(slot);
    let wanted = (ncycles - skipped) as usize;
    let mut records = Vec::with_capacity(wanted.min(reader.remaining() / 2));
    for cycle in (start_cycle + skipped)..=current_cycle.as_i64() {
        let keys = reader.read_u8()?;
        let user = reader.read_cstr()?;
        if cycle < starting_cycle.as_i64() {
            return Err(PacketError::AncientCycle {
                cycle,
                starting_cycle,
            });
        }
        records.push((Cycle::new(cycle as i32), InputFrame::from_wire(keys, user)));
    }

    if !reader.is_empty() {
        return Err(PacketError::TrailingBytes {
            remaining: reader.remaining(),
        });
    }

    Ok(ParsedPacket {
        slot,
        current_cycle,
        checksum,
        highest_confirmed,
        records,
    })
}

/// Writes a validated packet into `state`.
///
/// Known frames that differ are overwritten and marked for resimulation; frames
/// past our history grow it. Speculative frames after the packet's current
/// cycle are replaced by its newest frame, since that is the best guess of what
/// the sender keeps doing.
pub fn apply_packet(packet: &ParsedPacket, state: &mut SessionState) -> DecodeOutcome {
    let slot = packet.slot;
    state
        .confirmation
        .record_remote_highest(slot, packet.highest_confirmed);

    let mut first_correction: Option<Cycle> = None;
    let mut corrections = 0;
    for (cycle, frame) in &packet.records {
        let cycle = *cycle;
        if cycle <= state.history.last_cycle(slot) {
            if state.history.replace(slot, cycle, frame) {
                corrections += 1;
                first_correction.get_or_insert(cycle);
                state.replay.mark_invalid(cycle);
            }
        } else {
            state.history.grow_to_include(slot, cycle, Some(frame));
        }
    }

    if let Some(newest) = state.history.try_get(slot, packet.current_cycle).cloned() {
        if let Some(cycle) = state
            .history
            .extend_forward(slot, packet.current_cycle + 1, &newest)
        {
            corrections += 1;
            first_correction = Some(first_correction.map_or(cycle, |c| c.min(cycle)));
            state.replay.mark_invalid(cycle);
        }
    }

    state.confirmation.set_confirmed(slot, packet.current_cycle);
    crate::debug_check_invariants!(state.confirmation, "after applying packet");

    let checked = packet.current_cycle - 1;
    let desync = match state.checksums.get(checked) {
        Some(local) if local != 0 && packet.checksum != 0 && local != packet.checksum => {
            Some(DesyncReport {
                slot,
                cycle: checked,
                local_checksum: local,
                remote_checksum: packet.checksum,
            })
        },
        _ => None,
    };

    DecodeOutcome {
        slot,
        current_cycle: packet.current_cycle,
        first_correction,
        corrections,
        desync,
    }
}

/// Parses and applies `bytes` in one step. See [`parse_packet`] and [`apply_packet`].
///
/// # Errors
/// Returns the [`PacketError`] that caused the packet to be dropped; `state` is
/// unchanged in that case.
pub fn decode_packet(
    bytes: &[u8],
    state: &mut SessionState,
    max_lead: usize,
) -> Result<DecodeOutcome, PacketError> {
    let packet = parse_packet(bytes, state, max_lead)?;
    Ok(apply_packet(&packet, state))
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
    use crate::sessions::snapshot::SessionSnapshot;

    const LEAD: usize = 1024;

    fn frame(bits: u8) -> InputFrame {
        InputFrame::new(ControlKeys::from_bits(bits))
    }

    fn state(num_players: usize, local: usize) -> SessionState {
        SessionState::new(Cycle::new(0), num_players, Slot::new(local), 1024, 1024)
    }

    fn header(slot: u8, current: i32, checksum: i32, highest: i32, ncycles: i32) -> Vec<u8> {
        let mut out = vec![slot];
        for value in [current, checksum, highest, ncycles] {
            out.extend_from_slice(&value.to_be_bytes());
        }
        out
    }

    #[test]
    fn encode_empty_history() {
        let sender = state(2, 0);
        let bytes = encode_packet(&sender);
        assert_eq!(bytes, header(0, -1, 0, -1, 0));
        assert_eq!(bytes.len(), HEADER_LEN);
    }

    #[test]
    fn encode_layout_is_big_endian() {
        let mut sender = state(2, 1);
        sender.record_local(InputFrame::with_user(ControlKeys::from_bits(3), b"hi").unwrap());
        sender.record_local(frame(4));
        sender.checksums.record(Cycle::new(0), 0x0102_0304);

        let bytes = encode_packet(&sender);
        let mut expected = header(1, 1, 0x0102_0304, -1, 2);
        expected.extend_from_slice(&[3, b'h', b'i', 0, 4, 0]);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn encode_only_sends_unacknowledged_frames() {
        let mut sender = state(2, 0);
        for i in 0..6 {
            sender.record_local(frame(i));
        }
        sender
            .confirmation
            .record_remote_highest(Slot::new(1), Cycle::new(3));
        let bytes = encode_packet(&sender);
        // cycles 3, 4 and 5
        assert_eq!(&bytes[13..17], &3i32.to_be_bytes());
        assert_eq!(&bytes[17..], &[3, 0, 4, 0, 5, 0]);
    }

    #[test]
    fn too_short_packets_are_rejected() {
        let receiver = state(2, 1);
        assert_eq!(
            parse_packet(&[0; 12], &receiver, LEAD),
            Err(PacketError::TooShort { len: 12 })
        );
        assert_eq!(
            parse_packet(&[0; 13], &receiver, LEAD),
            Err(PacketError::Truncated { offset: 13 })
        );
    }

    #[test]
    fn slot_checks() {
        let receiver = state(2, 1);
        assert_eq!(
            parse_packet(&header(2, 0, 0, 0, 0), &receiver, LEAD),
            Err(PacketError::UnknownSlot {
                slot: 2,
                num_players: 2
            })
        );
        assert_eq!(
            parse_packet(&header(1, 0, 0, 0, 0), &receiver, LEAD),
            Err(PacketError::LoopbackSlot { slot: Slot::new(1) })
        );
    }

    #[test]
    fn negative_record_count_is_rejected() {
        let receiver = state(2, 1);
        let mut bytes = header(0, 0, 0, 0, -1);
        bytes.push(0);
        assert_eq!(
            parse_packet(&bytes, &receiver, LEAD),
            Err(PacketError::NegativeRecordCount { ncycles: -1 })
        );
    }

    #[test]
    fn truncated_record_is_rejected() {
        let receiver = state(2, 1);
        // three records declared, two present
        let mut bytes = header(0, 2, 0, 0, 3);
        bytes.extend_from_slice(&[1, 0, 2, 0]);
        assert_eq!(
            parse_packet(&bytes, &receiver, LEAD),
            Err(PacketError::Truncated { offset: 21 })
        );
    }

    #[test]
    fn missing_terminator_is_rejected() {
        let receiver = state(2, 1);
        let mut bytes = header(0, 0, 0, 0, 1);
        bytes.extend_from_slice(&[1, b'x']);
        assert_eq!(
            parse_packet(&bytes, &receiver, LEAD),
            Err(PacketError::MissingTerminator)
        );
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let receiver = state(2, 1);
        let mut bytes = header(0, 0, 0, 0, 1);
        bytes.extend_from_slice(&[1, 0, 0]);
        assert_eq!(
            parse_packet(&bytes, &receiver, LEAD),
            Err(PacketError::TrailingBytes { remaining: 1 })
        );
    }

    #[test]
    fn skipped_records_must_exist() {
        let mut receiver = state(2, 1);
        receiver.confirmation.set_confirmed(Slot::new(0), Cycle::new(5));
        // claims 6 records ending at 5 but carries only one
        let mut bytes = header(0, 5, 0, 0, 6);
        bytes.extend_from_slice(&[1, 0]);
        assert_eq!(
            parse_packet(&bytes, &receiver, LEAD),
            Err(PacketError::SkipOverrun { skipped: 5 })
        );
    }

    #[test]
    fn records_below_confirmed_are_not_applied() {
        let mut sender = state(2, 0);
        for i in 0..4 {
            sender.record_local(frame(i + 1));
        }
        let mut receiver = state(2, 1);
        receiver.confirmation.set_confirmed(Slot::new(0), Cycle::new(2));
        let parsed = parse_packet(&encode_packet(&sender), &receiver, LEAD).unwrap();
        let cycles: Vec<i32> = parsed.records.iter().map(|(c, _)| c.as_i32()).collect();
        assert_eq!(cycles, vec![2, 3]);
    }

    #[test]
    fn packets_far_ahead_are_rejected() {
        let receiver = state(2, 1);
        let mut bytes = header(0, 50, 0, 0, 1);
        bytes.extend_from_slice(&[1, 0]);
        assert_eq!(
            parse_packet(&bytes, &receiver, 10),
            Err(PacketError::TooFarAhead {
                current_cycle: Cycle::new(50),
                limit: 9
            })
        );
    }

    #[test]
    fn lead_limit_never_reaches_i32_max() {
        let mut receiver =
            SessionState::new(Cycle::new(i32::MAX - 4), 2, Slot::new(1), 1024, 1024);
        receiver.record_local(frame(0));
        let mut bytes = header(0, i32::MAX, 0, 0, 1);
        bytes.extend_from_slice(&[1, 0]);
        assert_eq!(
            parse_packet(&bytes, &receiver, 65_536),
            Err(PacketError::TooFarAhead {
                current_cycle: Cycle::new(i32::MAX),
                limit: i64::from(i32::MAX) - 1,
            })
        );
    }

    #[test]
    fn records_compacted_away_are_ancient() {
        let mut sender = state(2, 0);
        for _ in 0..3 {
            sender.record_local(frame(1));
        }
        let mut receiver = SessionState::new(Cycle::new(0), 2, Slot::new(1), 8, 8);
        decode_packet(&encode_packet(&sender), &mut receiver, LEAD).unwrap();
        for _ in 0..8 {
            receiver.record_local(frame(0));
        }
        assert_eq!(receiver.history.starting_cycle(Slot::new(0)), Cycle::new(4));

        sender.record_local(frame(2));
        let before = SessionSnapshot::capture(&receiver);
        assert_eq!(
            decode_packet(&encode_packet(&sender), &mut receiver, LEAD),
            Err(PacketError::AncientCycle {
                cycle: 2,
                starting_cycle: Cycle::new(4),
            })
        );
        assert_eq!(SessionSnapshot::capture(&receiver), before);
    }

    #[test]
    fn decode_grows_remote_history() {
        let mut sender = state(2, 0);
        for _ in 0..5 {
            sender.record_local(frame(1));
        }
        let mut receiver = state(2, 1);
        let outcome = decode_packet(&encode_packet(&sender), &mut receiver, LEAD).unwrap();
        assert_eq!(outcome.current_cycle, Cycle::new(4));
        assert_eq!(outcome.corrections, 0);
        assert_eq!(receiver.history.len(Slot::new(0)), 5);
        assert_eq!(
            receiver.confirmation.highest_confirmed(Slot::new(0)),
            Cycle::new(4)
        );
        assert_eq!(
            receiver.confirmation.remote_highest_confirmed(Slot::new(0)),
            Cycle::new(-1)
        );
    }

    #[test]
    fn decode_corrects_speculation_and_marks_replay() {
        let mut receiver = state(2, 1);
        for _ in 0..6 {
            receiver.record_local(frame(0));
        }
        let mut sender = state(2, 0);
        sender.record_local(frame(0));
        sender.record_local(frame(0));
        sender.record_local(frame(9));

        let outcome = decode_packet(&encode_packet(&sender), &mut receiver, LEAD).unwrap();
        assert_eq!(outcome.first_correction, Some(Cycle::new(2)));
        assert_eq!(receiver.replay.first_invalid_cycle(), Some(Cycle::new(2)));
        for cycle in 2..6 {
            assert_eq!(receiver.history.get(Slot::new(0), Cycle::new(cycle)), &frame(9));
        }
    }

    #[test]
    fn checksum_mismatch_is_reported_only_when_both_known() {
        let mut sender = state(2, 0);
        sender.record_local(frame(1));
        sender.record_local(frame(1));
        sender.checksums.record(Cycle::new(0), 77);

        let mut receiver = state(2, 1);
        let outcome = decode_packet(&encode_packet(&sender), &mut receiver.clone(), LEAD).unwrap();
        assert_eq!(outcome.desync, None);

        receiver.checksums.record(Cycle::new(0), 78);
        let outcome = decode_packet(&encode_packet(&sender), &mut receiver, LEAD).unwrap();
        assert_eq!(
            outcome.desync,
            Some(DesyncReport {
                slot: Slot::new(0),
                cycle: Cycle::new(0),
                local_checksum: 78,
                remote_checksum: 77,
            })
        );
    }
}
