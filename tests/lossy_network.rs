//! Sessions exchanging packets over links that drop, duplicate and reorder.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

mod common;

use common::{frame, init_tracing, session, Link};
use lockstep_sync::{Cycle, LockstepSession, Slot};
use proptest::prelude::*;

const PEERS: usize = 3;
const TICKS: usize = 30;

/// Links between every ordered pair of peers, indexed `[from][to]`.
fn mesh() -> Vec<Vec<Link>> {
    (0..PEERS)
        .map(|_| (0..PEERS).map(|_| Link::default()).collect())
        .collect()
}

/// Sends one packet from every peer to every other peer, deciding each
/// packet's fate with `fates`.
fn broadcast(
    peers: &mut [LockstepSession],
    links: &mut [Vec<Link>],
    fates: &mut impl Iterator<Item = u8>,
) {
    for (from, peer) in peers.iter_mut().enumerate() {
        let packet = peer.encode_packet();
        for to in (0..PEERS).filter(|&to| to != from) {
            links[from][to].send(packet.clone(), fates.next().unwrap_or(0));
        }
    }
}

/// Hands every packet in flight to its receiver. Stale packets are expected.
fn deliver(peers: &mut [LockstepSession], links: &mut [Vec<Link>]) {
    for from in 0..PEERS {
        for (to, peer) in peers.iter_mut().enumerate() {
            for packet in links[from][to].deliver() {
                if let Err(err) = peer.handle_packet(&packet) {
                    assert!(err.is_stale(), "unexpected rejection: {}", err);
                }
            }
        }
    }
}

fn assert_converged(peers: &[LockstepSession], inputs: &[Vec<u8>]) {
    let last = Cycle::new(TICKS as i32 - 1);
    for peer in peers {
        assert_eq!(peer.our_highest_confirmed(), last);
        for (slot, recorded) in inputs.iter().enumerate() {
            for (cycle, bits) in recorded.iter().enumerate() {
                assert_eq!(
                    peer.input(Slot::new(slot), Cycle::new(cycle as i32)),
                    &frame(*bits),
                    "peer {} disagrees on slot {} at cycle {}",
                    peer.local_slot(),
                    slot,
                    cycle
                );
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_peers_converge_after_lossy_exchange(
        inputs in proptest::collection::vec(
            proptest::collection::vec(0u8..128, TICKS),
            PEERS,
        ),
        fates in proptest::collection::vec(0u8..4, TICKS * PEERS * (PEERS - 1)),
    ) {
        init_tracing();
        let mut peers: Vec<LockstepSession> = (0..PEERS).map(|slot| session(PEERS, slot)).collect();
        let mut links = mesh();
        let mut fates = fates.into_iter();

        for tick in 0..TICKS {
            for (slot, peer) in peers.iter_mut().enumerate() {
                peer.add_local_input(frame(inputs[slot][tick]));
            }
            broadcast(&mut peers, &mut links, &mut fates);
            deliver(&mut peers, &mut links);
        }

        // links heal; anything still held back arrives with the next packet
        for _ in 0..2 {
            broadcast(&mut peers, &mut links, &mut std::iter::empty());
            deliver(&mut peers, &mut links);
        }

        assert_converged(&peers, &inputs);
        for peer in &peers {
            prop_assert_eq!(peer.their_highest_confirmed(), Cycle::new(TICKS as i32 - 1));
        }
    }
}

#[test]
fn dropped_packets_are_recovered_by_later_ones() {
    init_tracing();
    let mut host = session(2, 0);
    let mut guest = session(2, 1);
    let mut link = Link::default();

    for tick in 0..10u8 {
        host.add_local_input(frame(tick));
        guest.add_local_input(frame(0));
        // only every fourth packet gets through
        let fate = if tick % 4 == 3 { 0 } else { 1 };
        link.send(host.encode_packet(), fate);
        for packet in link.deliver() {
            guest.handle_packet(&packet).unwrap();
        }
    }

    assert_eq!(guest.highest_confirmed(Slot::new(0)), Cycle::new(7));
    for cycle in 0..=7u8 {
        assert_eq!(guest.input(Slot::new(0), Cycle::new(i32::from(cycle))), &frame(cycle));
    }
    // unconfirmed cycles repeat the newest confirmed frame
    assert_eq!(guest.input(Slot::new(0), Cycle::new(9)), &frame(7));
}

#[test]
fn reordered_packets_do_not_roll_back_confirmation() {
    let mut host = session(2, 0);
    let mut guest = session(2, 1);
    let mut link = Link::default();

    host.add_local_input(frame(1));
    link.send(host.encode_packet(), 3);
    host.add_local_input(frame(2));
    link.send(host.encode_packet(), 0);

    let delivered = link.deliver();
    assert_eq!(delivered.len(), 2);
    guest.handle_packet(&delivered[0]).unwrap();
    assert!(guest.handle_packet(&delivered[1]).unwrap_err().is_stale());
    assert_eq!(guest.highest_confirmed(Slot::new(0)), Cycle::new(1));
    assert_eq!(guest.input(Slot::new(0), Cycle::new(0)), &frame(1));
}
