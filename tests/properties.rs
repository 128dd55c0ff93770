//! Property-based tests of the packet protocol between two sessions.
//!
//! - packets carry every frame losslessly, including user payloads
//! - handling the same packet twice changes nothing the second time
//! - a slot's confirmed cycle never moves backwards, whatever the delivery order
//! - confirmed remote input always equals what the sender recorded
//! - compaction under steady exchange never drops unconfirmed input

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

mod common;

use std::sync::Arc;

use common::{frames_of, session, session_with};
use lockstep_sync::telemetry::{CollectingObserver, ViolationKind};
use lockstep_sync::{
    ControlKeys, Cycle, InputFrame, PacketError, SessionBuilder, SessionConfig, Slot,
};
use proptest::prelude::*;

fn arb_frame() -> impl Strategy<Value = InputFrame> {
    (0u8..128, proptest::collection::vec(1u8..=255, 0..6)).prop_map(|(bits, user)| {
        InputFrame::with_user(ControlKeys::from_bits(bits), &user).expect("payload without NUL")
    })
}

fn arb_frames(max: usize) -> impl Strategy<Value = Vec<InputFrame>> {
    proptest::collection::vec(arb_frame(), 1..max)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_packet_round_trips_every_frame(frames in arb_frames(200)) {
        let mut host = session(2, 0);
        for frame in &frames {
            host.add_local_input(frame.clone());
        }
        let mut guest = session(2, 1);
        guest.handle_packet(&host.encode_packet()).unwrap();

        prop_assert_eq!(
            frames_of(&guest, Slot::new(0)),
            frames_of(&host, Slot::new(0))
        );
        prop_assert_eq!(
            guest.highest_confirmed(Slot::new(0)),
            Cycle::new(frames.len() as i32 - 1)
        );
    }

    #[test]
    fn prop_retransmission_is_idempotent(
        frames in arb_frames(40),
        local_frames in 0usize..60,
    ) {
        let mut host = session(2, 0);
        for frame in &frames {
            host.add_local_input(frame.clone());
        }
        let mut guest = session(2, 1);
        for _ in 0..local_frames {
            guest.add_local_input(InputFrame::default());
        }
        let packet = host.encode_packet();
        guest.handle_packet(&packet).unwrap();
        guest.clear_invalid();
        let after_first = guest.snapshot();

        let outcome = guest.handle_packet(&packet).unwrap();
        prop_assert_eq!(outcome.corrections, 0);
        prop_assert_eq!(outcome.first_correction, None);
        prop_assert_eq!(guest.first_invalid_cycle(), None);
        prop_assert_eq!(guest.snapshot(), after_first);
    }

    #[test]
    fn prop_confirmation_is_monotonic_under_reordering(
        (frames, order) in arb_frames(40).prop_flat_map(|frames| {
            let n = frames.len();
            (Just(frames), proptest::collection::vec(0..n, 1..80))
        })
    ) {
        let mut host = session(2, 0);
        let mut packets = Vec::with_capacity(frames.len());
        for frame in &frames {
            host.add_local_input(frame.clone());
            packets.push(host.encode_packet());
        }

        let mut guest = session(2, 1);
        let mut newest_delivered: Option<usize> = None;
        for index in order {
            let before = guest.highest_confirmed(Slot::new(0));
            let result = guest.handle_packet(&packets[index]);
            let after = guest.highest_confirmed(Slot::new(0));

            prop_assert!(after >= before);
            match newest_delivered {
                Some(newest) if index < newest => {
                    let is_stale = matches!(result, Err(PacketError::Stale { .. }));
                    prop_assert!(is_stale);
                },
                _ => {
                    prop_assert!(result.is_ok());
                    newest_delivered = Some(index);
                },
            }
            prop_assert_eq!(after, Cycle::new(newest_delivered.unwrap() as i32));

            // confirmed input is exactly what the host recorded
            for cycle in 0..=after.as_i32() {
                prop_assert_eq!(
                    guest.input(Slot::new(0), Cycle::new(cycle)),
                    &frames[cycle as usize]
                );
            }
        }
    }

    #[test]
    fn prop_steady_exchange_survives_compaction(
        ticks in 64usize..300,
        host_frames in arb_frames(8),
    ) {
        let observer = Arc::new(CollectingObserver::new());
        let mut host = SessionBuilder::new()
            .with_config(SessionConfig::short_history())
            .with_observer(observer.clone())
            .build()
            .unwrap();
        let mut guest = session_with(SessionConfig::short_history(), 2, 1);

        for tick in 0..ticks {
            host.add_local_input(host_frames[tick % host_frames.len()].clone());
            guest.add_local_input(InputFrame::default());
            guest.handle_packet(&host.encode_packet()).unwrap();
            host.handle_packet(&guest.encode_packet()).unwrap();

            prop_assert!(host.starting_cycle() <= host.our_highest_confirmed() + 1);
            prop_assert!(guest.starting_cycle() <= guest.our_highest_confirmed() + 1);
            prop_assert!(host.state().history().len(Slot::new(0)) < 64);
        }

        prop_assert!(host.stats().compactions > 0);
        prop_assert!(!observer.has_violation(ViolationKind::History));
        let newest = Cycle::new(ticks as i32 - 1);
        prop_assert_eq!(guest.highest_confirmed(Slot::new(0)), newest);
        prop_assert_eq!(
            guest.input(Slot::new(0), newest),
            &host_frames[(ticks - 1) % host_frames.len()]
        );
    }
}
