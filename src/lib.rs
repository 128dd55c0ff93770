//! # lockstep-sync
//!
//! Deterministic lockstep input synchronization for fixed-tick multiplayer
//! simulations.
//!
//! Every peer records each player's input per simulation cycle, exchanges a
//! compact window of its own recent input with every other peer, and is told
//! the earliest cycle whose input changed after the fact so the simulation can
//! rewind and resimulate deterministically. Checksums of the simulation state
//! ride along with the input so diverging peers are noticed.
//!
//! The main entry point is [`LockstepSession`], usually built through
//! [`SessionBuilder`]:
//!
//! ```
//! use lockstep_sync::{ControlKeys, InputFrame, SessionBuilder, Slot};
//!
//! let mut host = SessionBuilder::new()
//!     .with_num_players(2)
//!     .with_local_slot(Slot::new(0))
//!     .build()
//!     .expect("valid session");
//! let mut guest = SessionBuilder::new()
//!     .with_num_players(2)
//!     .with_local_slot(Slot::new(1))
//!     .build()
//!     .expect("valid session");
//!
//! host.add_local_input(InputFrame::new(ControlKeys::from_bits(0b1)));
//! let packet = host.encode_packet();
//! let summary = guest.handle_packet(&packet).expect("well-formed packet");
//! assert_eq!(summary.current_cycle.as_i32(), 0);
//! assert!(guest.input(Slot::new(0), summary.current_cycle).keys().bits() == 0b1);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub use checksum::{compute_checksum, ChecksumError, DesyncChecksum, DEFAULT_CHECKSUM_HISTORY};
pub use confirmation::ConfirmationTracker;
pub use error::{LockstepError, PacketError};
pub use frame::{Control, ControlKeys, InputFrame, NUM_CONTROLS};
pub use history::{HistoryStore, SlotHistory, DEFAULT_MAX_HISTORY};
pub use network::codec::{DecodeOutcome, DesyncReport};
pub use network::inbox::{packet_channel, PacketInbox, PacketSender};
pub use network::udp_socket::UdpTransport;
pub use replay::ReplayController;
pub use sampler::{
    InputDevice, InputSampler, InputSource, KeyBindings, KeyCode, MouseBindings, RawInputState,
    MOUSE_BINDING_SLOTS,
};
pub use sessions::builder::SessionBuilder;
pub use sessions::config::SessionConfig;
pub use sessions::lockstep_session::{BackupScope, LockstepSession};
pub use sessions::snapshot::SessionSnapshot;
pub use sessions::state::SessionState;
pub use sessions::stats::SessionStats;

pub mod checksum;
#[doc(hidden)]
pub mod confirmation;
#[doc(hidden)]
pub mod error;
pub mod frame;
#[doc(hidden)]
pub mod history;
pub mod prelude;
#[doc(hidden)]
pub mod replay;
pub mod sampler;
pub mod telemetry;
#[doc(hidden)]
pub mod sessions {
    #[doc(hidden)]
    pub mod builder;
    #[doc(hidden)]
    pub mod config;
    #[doc(hidden)]
    pub mod lockstep_session;
    #[doc(hidden)]
    pub mod snapshot;
    #[doc(hidden)]
    pub mod state;
    #[doc(hidden)]
    pub mod stats;
}
#[doc(hidden)]
pub mod network {
    /// Wire format for input packets.
    ///
    /// Encodes a window of local input history with the confirmation header,
    /// and decodes peers' packets into the remote histories.
    pub mod codec;
    #[doc(hidden)]
    pub mod inbox;
    #[doc(hidden)]
    pub mod reader;
    #[doc(hidden)]
    pub mod udp_socket;
}

/// Internal module exposing implementation details for testing, fuzzing and benchmarks.
///
/// **This module is NOT part of the public API.** Nothing here is covered by
/// semver guarantees.
#[doc(hidden)]
pub mod __internal {
    pub use crate::network::codec::{decode_packet, encode_packet, parse_packet, ParsedPacket};
    pub use crate::network::reader::PacketReader;
}

// #############
// # CONSTANTS #
// #############

/// The maximum number of players (slots) in a session.
pub const MAX_PLAYERS: usize = 8;

/// Internally, -1 represents no cycle / nothing confirmed yet.
pub const NULL_CYCLE: i32 = -1;

/// A cycle is a single discrete tick of the simulation.
///
/// Cycles are the unit by which all input history is indexed. They are
/// absolute: the cycle number of an input never changes, even after old
/// history has been compacted away.
///
/// # Examples
///
/// ```
/// use lockstep_sync::Cycle;
///
/// let cycle = Cycle::new(0);
/// assert!(cycle.is_valid());
/// assert!(Cycle::NULL.is_null());
///
/// let next = cycle + 1;
/// assert_eq!(next - cycle, 1);
/// ```
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct Cycle(i32);

impl Cycle {
    /// The null cycle, meaning "no cycle".
    pub const NULL: Self = Self(NULL_CYCLE);

    /// Creates a new `Cycle`. The value is not validated.
    #[inline]
    #[must_use]
    pub const fn new(cycle: i32) -> Self {
        Self(cycle)
    }

    /// Returns the underlying `i32` value.
    #[inline]
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Returns `true` if this is [`Cycle::NULL`].
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == NULL_CYCLE
    }

    /// Returns `true` if the cycle is non-negative.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }

    /// Returns the cycle as `i64`, for overflow-free arithmetic on wire values.
    #[inline]
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0 as i64
    }
}

impl std::fmt::Display for Cycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            write!(f, "NULL_CYCLE")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl std::ops::Add<i32> for Cycle {
    type Output = Self;

    #[inline]
    fn add(self, rhs: i32) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl std::ops::AddAssign<i32> for Cycle {
    #[inline]
    fn add_assign(&mut self, rhs: i32) {
        self.0 += rhs;
    }
}

impl std::ops::Sub<i32> for Cycle {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: i32) -> Self::Output {
        Self(self.0 - rhs)
    }
}

impl std::ops::Sub<Self> for Cycle {
    type Output = i32;

    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        self.0 - rhs.0
    }
}

impl std::ops::SubAssign<i32> for Cycle {
    #[inline]
    fn sub_assign(&mut self, rhs: i32) {
        self.0 -= rhs;
    }
}

impl From<i32> for Cycle {
    #[inline]
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl From<Cycle> for i32 {
    #[inline]
    fn from(cycle: Cycle) -> Self {
        cycle.0
    }
}

impl PartialEq<i32> for Cycle {
    #[inline]
    fn eq(&self, other: &i32) -> bool {
        self.0 == *other
    }
}

impl PartialOrd<i32> for Cycle {
    #[inline]
    fn partial_cmp(&self, other: &i32) -> Option<std::cmp::Ordering> {
        self.0.partial_cmp(other)
    }
}

/// Identifies one of the (at most [`MAX_PLAYERS`]) participants of a session.
///
/// Exactly one slot of a session is local; every other active slot is remote.
///
/// ```
/// use lockstep_sync::Slot;
///
/// let slot = Slot::new(1);
/// assert!(slot.is_active_for(2));
/// assert!(!slot.is_active_for(1));
/// ```
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct Slot(usize);

impl Slot {
    /// Creates a new `Slot`. The value is not validated against a session.
    #[inline]
    #[must_use]
    pub const fn new(slot: usize) -> Self {
        Self(slot)
    }

    /// Returns the underlying index.
    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Returns `true` if this slot takes part in a session of `num_players`.
    #[inline]
    #[must_use]
    pub const fn is_active_for(self, num_players: usize) -> bool {
        self.0 < num_players
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<usize> for Slot {
    #[inline]
    fn from(value: usize) -> Self {
        Self(value)
    }
}

impl From<Slot> for usize {
    #[inline]
    fn from(slot: Slot) -> Self {
        slot.0
    }
}

/// Sends and receives opaque packets between peers.
///
/// Packets are treated UDP-style: unordered and unreliable. The protocol on
/// top tolerates loss, duplication and reordering.
pub trait PacketTransport<A>
where
    A: Clone + PartialEq + Eq + std::hash::Hash,
{
    /// Sends `packet` to the peer at `addr`.
    fn send_to(&mut self, packet: &[u8], addr: &A);

    /// Returns every packet received since the last call, with its sender address.
    fn receive_all_packets(&mut self) -> Vec<(A, Vec<u8>)>;
}

// ###################
// # UNIT TESTS      #
// ###################

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn null_cycle_is_not_valid() {
        assert!(Cycle::NULL.is_null());
        assert!(!Cycle::NULL.is_valid());
        assert_eq!(Cycle::NULL.as_i32(), NULL_CYCLE);
    }

    #[test]
    fn cycle_arithmetic() {
        let mut cycle = Cycle::new(10);
        cycle += 5;
        assert_eq!(cycle, 15);
        cycle -= 3;
        assert_eq!(cycle.as_i32(), 12);
        assert_eq!(Cycle::new(20) - Cycle::new(5), 15);
        assert_eq!(Cycle::new(3) + 1, Cycle::new(4));
    }

    #[test]
    fn cycle_display() {
        assert_eq!(Cycle::NULL.to_string(), "NULL_CYCLE");
        assert_eq!(Cycle::new(42).to_string(), "42");
    }

    #[test]
    fn cycle_orders_against_i32() {
        assert!(Cycle::new(5) > 4);
        assert!(Cycle::new(-1) < 0);
    }

    #[test]
    fn slot_activity() {
        assert!(Slot::new(0).is_active_for(1));
        assert!(!Slot::new(8).is_active_for(MAX_PLAYERS));
        assert_eq!(usize::from(Slot::new(3)), 3);
    }
}
