//! Fuzz target for sequences of session operations.
//!
//! Two sessions exchange packets while the fuzzer decides what each tick does.
//!
//! # Safety Properties Tested
//! - No panics for any interleaving of local input, packets and backups
//! - Confirmed remote input always equals what the sender recorded
//! - Backup scopes restore the exact input state

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use lockstep_sync::{ControlKeys, Cycle, InputFrame, LockstepSession, SessionBuilder, SessionConfig, Slot};

#[derive(Debug, Arbitrary)]
enum Op {
    /// Host records a frame
    HostInput(u8),
    /// Guest records a frame
    GuestInput(u8),
    /// Host sends; `true` delivers the packet
    HostSend(bool),
    /// Guest sends; `true` delivers the packet
    GuestSend(bool),
    /// Guest takes back its newest frame
    GuestUnread,
    /// Host runs some input inside a cancelled backup scope
    HostScoped(u8),
    /// A stored host packet is delivered late
    Replay(u8),
}

fn session(local: usize) -> Option<LockstepSession> {
    SessionBuilder::new()
        .with_config(SessionConfig::short_history())
        .with_local_slot(Slot::new(local))
        .build()
        .ok()
}

fn frame(bits: u8) -> InputFrame {
    InputFrame::new(ControlKeys::from_bits(bits & 0x7f))
}

fuzz_target!(|ops: Vec<Op>| {
    let (Some(mut host), Some(mut guest)) = (session(0), session(1)) else {
        return;
    };
    let mut recorded: Vec<InputFrame> = Vec::new();
    let mut sent: Vec<Vec<u8>> = Vec::new();

    for op in ops.into_iter().take(512) {
        // keep both peers close enough that compaction never outruns confirmation
        let lead = host.current_cycle() - guest.current_cycle();
        match op {
            Op::HostInput(bits) if lead < 16 && host.their_highest_confirmed() + 24 > host.current_cycle() => {
                host.add_local_input(frame(bits));
                recorded.push(frame(bits));
            },
            Op::GuestInput(bits) if lead > -16 && guest.their_highest_confirmed() + 24 > guest.current_cycle() => {
                guest.add_local_input(frame(bits));
            },
            Op::HostSend(deliver) => {
                let packet = host.encode_packet();
                if deliver {
                    let _ = guest.handle_packet(&packet);
                }
                sent.push(packet);
            },
            Op::GuestSend(deliver) => {
                let packet = guest.encode_packet();
                if deliver {
                    let _ = host.handle_packet(&packet);
                }
            },
            Op::GuestUnread => {
                let _ = guest.unread_local();
            },
            Op::HostScoped(bits) => {
                let before = host.snapshot();
                {
                    let mut scope = host.backup_scope();
                    scope.add_local_input(frame(bits));
                }
                assert_eq!(host.snapshot(), before);
            },
            Op::Replay(index) => {
                if let Some(packet) = sent.get(usize::from(index)) {
                    let _ = guest.handle_packet(packet);
                }
            },
            _ => {},
        }

        let confirmed = guest.highest_confirmed(Slot::new(0));
        let from = guest.starting_cycle().as_i32().max(0);
        for cycle in from..=confirmed.as_i32() {
            if let Some(input) = guest.try_input(Slot::new(0), Cycle::new(cycle)) {
                assert_eq!(input, &recorded[cycle as usize]);
            }
        }
    }
});
