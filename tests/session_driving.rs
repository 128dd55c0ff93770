//! Sessions driven through transports and input devices instead of raw packets.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

mod common;

use common::{frame, init_tracing, session, MemoryTransport, ScriptedDevice};
use lockstep_sync::{Control, Cycle, KeyCode, RawInputState, Slot};

#[test]
fn transports_carry_packets_between_sessions() {
    init_tracing();
    let mut host = session(2, 0);
    let mut guest = session(2, 1);
    let mut host_net = MemoryTransport::new(0);
    let mut guest_net = host_net.join(1);

    for bits in 1..=3 {
        host.add_local_input(frame(bits));
    }
    guest.add_local_input(frame(0));
    host.send_packets(&mut host_net, &[1u8]);
    guest.send_packets(&mut guest_net, &[0u8]);
    // garbage from a third party lands in the guest's mailbox too
    host_net.inject(7, 1, &[0xff; 4]);

    assert_eq!(guest.poll_transport::<u8, _>(&mut guest_net), 1);
    assert_eq!(guest.stats().packets_received, 2);
    assert_eq!(guest.stats().packets_accepted, 1);
    assert_eq!(guest.stats().packets_dropped["too_short"], 1);
    assert_eq!(guest.highest_confirmed(Slot::new(0)), Cycle::new(2));
    for bits in 1..=3u8 {
        let cycle = Cycle::new(i32::from(bits) - 1);
        assert_eq!(guest.input(Slot::new(0), cycle), &frame(bits));
    }

    assert_eq!(host.poll_transport::<u8, _>(&mut host_net), 1);
    assert_eq!(host.highest_confirmed(Slot::new(1)), Cycle::new(0));
    assert_eq!(host.stats().packets_sent, 1);

    // nothing left in either mailbox
    assert_eq!(guest.poll_transport::<u8, _>(&mut guest_net), 0);
    assert_eq!(host.poll_transport::<u8, _>(&mut host_net), 0);
}

#[test]
fn sampled_input_reaches_peer() {
    init_tracing();
    let mut up = RawInputState::new();
    up.press(KeyCode::UP);
    let mut up_and_jump = up.clone();
    up_and_jump.press(KeyCode::SPACE);
    let mut device = ScriptedDevice::new([up, up_and_jump, RawInputState::new()]);

    let mut host = session(2, 0);
    assert_eq!(host.read_until(&mut device, Cycle::new(4)), 5);
    assert_eq!(host.read_until(&mut device, Cycle::new(4)), 0);

    host.push_input_lock(frame(Control::Attack.mask()));
    assert_eq!(host.read_until(&mut device, Cycle::new(6)), 2);
    host.pop_input_lock();

    let mut guest = session(2, 1);
    let mut host_net = MemoryTransport::new(0);
    let mut guest_net = host_net.join(1);
    host.send_packets(&mut host_net, &[1u8]);
    assert_eq!(guest.poll_transport::<u8, _>(&mut guest_net), 1);

    let host_slot = Slot::new(0);
    assert!(guest.control_status(Cycle::new(0), host_slot, Control::Up));
    assert!(!guest.control_status(Cycle::new(0), host_slot, Control::Jump));
    assert!(guest.control_status(Cycle::new(1), host_slot, Control::Up));
    assert!(guest.control_status(Cycle::new(1), host_slot, Control::Jump));
    for cycle in 2..=4 {
        assert_eq!(guest.input(host_slot, Cycle::new(cycle)), &frame(0));
    }
    for cycle in 5..=6 {
        assert_eq!(
            guest.input(host_slot, Cycle::new(cycle)),
            &frame(Control::Attack.mask())
        );
    }
}
