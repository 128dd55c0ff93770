//! Common test infrastructure shared across integration tests.
//!
//! - session construction helpers
//! - a scripted [`InputDevice`]
//! - [`Link`], an in-memory lossy packet link between peers
//! - [`MemoryTransport`], an in-memory [`PacketTransport`] keyed by `u8` addresses
//! - tracing initialisation for readable failure output

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::Once;

use lockstep_sync::{
    ControlKeys, Cycle, InputDevice, InputFrame, LockstepSession, PacketTransport, RawInputState,
    SessionBuilder, SessionConfig, Slot,
};

static TRACING: Once = Once::new();

/// Routes `tracing` output through the test harness so it shows up on failure.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

/// A frame with the given key bits and no user payload.
pub fn frame(bits: u8) -> InputFrame {
    InputFrame::new(ControlKeys::from_bits(bits))
}

/// A default-configured session.
#[track_caller]
pub fn session(num_players: usize, local: usize) -> LockstepSession {
    session_with(SessionConfig::default(), num_players, local)
}

/// A session with a custom configuration.
#[track_caller]
pub fn session_with(config: SessionConfig, num_players: usize, local: usize) -> LockstepSession {
    SessionBuilder::new()
        .with_config(config)
        .with_num_players(num_players)
        .with_local_slot(Slot::new(local))
        .build()
        .expect("valid session")
}

/// Every held frame of `slot`, oldest first.
pub fn frames_of(session: &LockstepSession, slot: Slot) -> Vec<(Cycle, InputFrame)> {
    session
        .state()
        .history()
        .slot(slot)
        .iter()
        .map(|(cycle, frame)| (cycle, frame.clone()))
        .collect()
}

/// Replays a fixed script of device states, repeating the last one forever.
#[derive(Debug, Default)]
pub struct ScriptedDevice {
    script: VecDeque<RawInputState>,
    last: RawInputState,
}

impl ScriptedDevice {
    pub fn new(script: impl IntoIterator<Item = RawInputState>) -> Self {
        Self {
            script: script.into_iter().collect(),
            last: RawInputState::new(),
        }
    }
}

impl InputDevice for ScriptedDevice {
    fn poll(&mut self) -> RawInputState {
        if let Some(next) = self.script.pop_front() {
            self.last = next;
        }
        self.last.clone()
    }
}

/// One-directional in-memory link with scripted loss, duplication and reordering.
///
/// `fate` decides per packet: `0` delivers, `1` drops, `2` duplicates and
/// `3` holds the packet back until the next one has been delivered.
#[derive(Debug, Default)]
pub struct Link {
    in_flight: VecDeque<Vec<u8>>,
    held: Option<Vec<u8>>,
}

impl Link {
    pub fn send(&mut self, packet: Vec<u8>, fate: u8) {
        match fate % 4 {
            0 => self.in_flight.push_back(packet),
            1 => {},
            2 => {
                self.in_flight.push_back(packet.clone());
                self.in_flight.push_back(packet);
            },
            _ => {
                if let Some(previous) = self.held.replace(packet) {
                    self.in_flight.push_back(previous);
                }
                return;
            },
        }
        if let Some(previous) = self.held.take() {
            self.in_flight.push_back(previous);
        }
    }

    pub fn deliver(&mut self) -> Vec<Vec<u8>> {
        self.in_flight.drain(..).collect()
    }
}

type Mailboxes = Rc<RefCell<HashMap<u8, VecDeque<(u8, Vec<u8>)>>>>;

/// Endpoint on a lossless in-memory network. Endpoints created with
/// [`MemoryTransport::join`] share mailboxes; packets arrive in send order.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    addr: u8,
    mailboxes: Mailboxes,
}

impl MemoryTransport {
    /// Creates the first endpoint of a new network.
    pub fn new(addr: u8) -> Self {
        Self {
            addr,
            mailboxes: Rc::default(),
        }
    }

    /// Creates another endpoint on the same network.
    pub fn join(&self, addr: u8) -> Self {
        Self {
            addr,
            mailboxes: Rc::clone(&self.mailboxes),
        }
    }

    /// Queues raw bytes for `to` as if they came from `from`.
    pub fn inject(&self, from: u8, to: u8, bytes: &[u8]) {
        self.mailboxes
            .borrow_mut()
            .entry(to)
            .or_default()
            .push_back((from, bytes.to_vec()));
    }
}

impl PacketTransport<u8> for MemoryTransport {
    fn send_to(&mut self, packet: &[u8], addr: &u8) {
        self.inject(self.addr, *addr, packet);
    }

    fn receive_all_packets(&mut self) -> Vec<(u8, Vec<u8>)> {
        self.mailboxes
            .borrow_mut()
            .get_mut(&self.addr)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default()
    }
}
