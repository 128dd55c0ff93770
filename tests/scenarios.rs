//! End-to-end protocol scenarios between sessions.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

mod common;

use std::sync::Arc;

use common::{frame, frames_of, init_tracing, session, session_with};
use lockstep_sync::telemetry::{CollectingObserver, ViolationKind};
use lockstep_sync::{Cycle, PacketError, SessionBuilder, SessionConfig, Slot};

#[test]
fn fresh_peer_receives_full_window() {
    init_tracing();
    let mut host = session(2, 0);
    for _ in 0..5 {
        host.add_local_input(frame(0b000_0001));
    }
    let packet = host.encode_packet();

    let mut guest = session(2, 1);
    let outcome = guest.handle_packet(&packet).expect("accepted");

    assert_eq!(outcome.current_cycle, Cycle::new(4));
    let received = frames_of(&guest, Slot::new(0));
    assert_eq!(received.len(), 5);
    for (i, (cycle, input)) in received.iter().enumerate() {
        assert_eq!(*cycle, Cycle::new(i as i32));
        assert_eq!(*input, frame(0b000_0001));
    }
    assert_eq!(guest.highest_confirmed(Slot::new(0)), Cycle::new(4));
    assert_eq!(guest.first_invalid_cycle(), None);
}

#[test]
fn stale_packet_changes_nothing() {
    init_tracing();
    let mut host = session(2, 0);
    let mut old_packet = Vec::new();
    for cycle in 0..=12 {
        host.add_local_input(frame(cycle as u8));
        if cycle == 10 {
            old_packet = host.encode_packet();
        }
    }
    let mut guest = session(2, 1);
    guest.handle_packet(&host.encode_packet()).expect("accepted");
    assert_eq!(guest.highest_confirmed(Slot::new(0)), Cycle::new(12));

    let before = guest.snapshot();
    let err = guest.handle_packet(&old_packet).unwrap_err();
    assert_eq!(
        err,
        PacketError::Stale {
            slot: Slot::new(0),
            current_cycle: Cycle::new(10),
            highest_confirmed: Cycle::new(12),
        }
    );
    assert_eq!(guest.snapshot(), before);
    assert_eq!(guest.stats().packets_stale, 1);
}

#[test]
fn packet_without_terminator_is_dropped_and_logged() {
    init_tracing();
    let observer = Arc::new(CollectingObserver::new());
    let mut guest = SessionBuilder::new()
        .with_local_slot(Slot::new(1))
        .with_observer(observer.clone())
        .build()
        .expect("valid session");
    let mut host = session(2, 0);
    host.add_local_input(frame(3));

    let mut packet = host.encode_packet();
    packet.pop();
    let before = guest.snapshot();

    assert_eq!(
        guest.handle_packet(&packet),
        Err(PacketError::MissingTerminator)
    );
    assert_eq!(guest.snapshot(), before);
    assert_eq!(observer.violations_of_kind(ViolationKind::NetworkProtocol).len(), 1);
}

#[test]
fn records_behind_compacted_history_are_rejected() {
    init_tracing();
    let mut host = session(2, 0);
    for _ in 0..3 {
        host.add_local_input(frame(1));
    }
    let mut guest = session_with(SessionConfig::short_history(), 2, 1);
    guest.handle_packet(&host.encode_packet()).expect("accepted");
    for _ in 0..64 {
        guest.add_local_input(frame(0));
    }
    assert_eq!(guest.starting_cycle(), Cycle::new(32));
    assert_eq!(guest.highest_confirmed(Slot::new(0)), Cycle::new(2));

    host.add_local_input(frame(2));
    let before = guest.snapshot();
    assert_eq!(
        guest.handle_packet(&host.encode_packet()),
        Err(PacketError::AncientCycle {
            cycle: 2,
            starting_cycle: Cycle::new(32),
        })
    );
    assert_eq!(guest.snapshot(), before);
    assert_eq!(guest.stats().packets_dropped["ancient_cycle"], 1);
}

#[test]
fn checksum_table_keeps_latest_1024_cycles() {
    let mut session = session(1, 0);
    for cycle in 0..=1030 {
        session.record_checksum(Cycle::new(cycle), cycle * 7 + 1);
    }
    for cycle in 0..=6 {
        assert_eq!(session.checksum(Cycle::new(cycle)), None, "cycle {}", cycle);
    }
    for cycle in 7..=1030 {
        assert_eq!(session.checksum(Cycle::new(cycle)), Some(cycle * 7 + 1));
    }
}

#[test]
fn corrections_move_replay_marker_earlier() {
    init_tracing();
    let mut guest = session(3, 2);
    for _ in 0..10 {
        guest.add_local_input(frame(0));
    }

    let mut first = session(3, 0);
    for _ in 0..7 {
        first.add_local_input(frame(0));
    }
    let outcome = guest.handle_packet(&first.encode_packet()).expect("accepted");
    assert_eq!(outcome.first_correction, None);
    assert_eq!(guest.first_invalid_cycle(), None);

    first.add_local_input(frame(1));
    first.add_local_input(frame(0));
    first.add_local_input(frame(0));
    let outcome = guest.handle_packet(&first.encode_packet()).expect("accepted");
    assert_eq!(outcome.first_correction, Some(Cycle::new(7)));
    assert_eq!(outcome.corrections, 1);
    assert_eq!(guest.first_invalid_cycle(), Some(Cycle::new(7)));

    let mut second = session(3, 1);
    for cycle in 0..5 {
        second.add_local_input(frame(if cycle == 3 { 4 } else { 0 }));
    }
    let outcome = guest.handle_packet(&second.encode_packet()).expect("accepted");
    assert_eq!(outcome.first_correction, Some(Cycle::new(3)));
    assert_eq!(guest.first_invalid_cycle(), Some(Cycle::new(3)));

    // slot 1 reverted to idle at cycle 4; the rest of its guesses follow
    assert_eq!(guest.input(Slot::new(1), Cycle::new(9)), &frame(0));

    guest.clear_invalid();
    assert_eq!(guest.first_invalid_cycle(), None);
}

#[test]
fn speculation_follows_latest_confirmed_frame() {
    let mut guest = session(2, 1);
    let mut host = session(2, 0);
    host.add_local_input(frame(5));
    guest.handle_packet(&host.encode_packet()).expect("accepted");

    for _ in 0..4 {
        guest.add_local_input(frame(0));
    }
    // guesses repeat the last frame received from the host
    for cycle in 1..4 {
        assert_eq!(guest.input(Slot::new(0), Cycle::new(cycle)), &frame(5));
    }
    assert_eq!(guest.highest_confirmed(Slot::new(0)), Cycle::new(0));
    assert_eq!(guest.our_highest_confirmed(), Cycle::new(0));
}

#[test]
fn acknowledgements_shrink_the_window() {
    let mut host = session(2, 0);
    let mut guest = session(2, 1);
    for _ in 0..20 {
        host.add_local_input(frame(1));
    }
    guest.add_local_input(frame(0));
    guest.handle_packet(&host.encode_packet()).expect("accepted");
    assert_eq!(guest.our_highest_confirmed(), Cycle::new(0));

    host.handle_packet(&guest.encode_packet()).expect("accepted");
    assert_eq!(host.their_highest_confirmed(), Cycle::new(0));

    // the host now only resends from the guest's acknowledged cycle on
    let packet = host.encode_packet();
    let ncycles = i32::from_be_bytes([packet[13], packet[14], packet[15], packet[16]]);
    assert_eq!(ncycles, 20);

    for _ in 0..20 {
        guest.add_local_input(frame(0));
    }
    guest.handle_packet(&host.encode_packet()).expect("accepted");
    host.handle_packet(&guest.encode_packet()).expect("accepted");
    assert_eq!(host.their_highest_confirmed(), Cycle::new(19));
    let packet = host.encode_packet();
    let ncycles = i32::from_be_bytes([packet[13], packet[14], packet[15], packet[16]]);
    assert_eq!(ncycles, 1);
}
