//! Fuzz target for packet decoding.
//!
//! Feeds arbitrary bytes to a session that already holds some history.
//!
//! # Safety Properties Tested
//! - No panics on arbitrary input
//! - A rejected packet leaves the session state untouched
//! - An accepted packet never moves a slot's confirmed cycle backwards

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use lockstep_sync::__internal::parse_packet;
use lockstep_sync::{ControlKeys, InputFrame, SessionBuilder, Slot};

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    /// Local frames recorded before the packet arrives (0-255)
    local_frames: u8,
    /// Receiver slot in a four player session
    local_slot: u8,
    /// The packet
    packet: Vec<u8>,
}

fuzz_target!(|input: FuzzInput| {
    let local_slot = Slot::new(usize::from(input.local_slot % 4));
    let Ok(mut session) = SessionBuilder::new()
        .with_num_players(4)
        .with_local_slot(local_slot)
        .build()
    else {
        return;
    };
    for i in 0..input.local_frames {
        session.add_local_input(InputFrame::new(ControlKeys::from_bits(i & 0x7f)));
    }

    let parsed = parse_packet(&input.packet, session.state(), session.config().max_lead);
    let before = session.snapshot();
    let confirmed_before: Vec<_> = (0..4)
        .map(|slot| session.highest_confirmed(Slot::new(slot)))
        .collect();

    match session.handle_packet(&input.packet) {
        Ok(outcome) => {
            assert!(parsed.is_ok());
            assert_eq!(
                session.highest_confirmed(outcome.slot),
                outcome.current_cycle
            );
            for (slot, before) in confirmed_before.iter().enumerate() {
                assert!(session.highest_confirmed(Slot::new(slot)) >= *before);
            }
        },
        Err(err) => {
            assert_eq!(parsed.err(), Some(err));
            assert_eq!(session.snapshot(), before);
        },
    }
});
