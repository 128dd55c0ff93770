use std::error::Error;
use std::fmt;
use std::fmt::Display;

use crate::{Cycle, Slot};

/// This enum contains all errors the session API can return when it is used incorrectly.
///
/// Network input never produces a `LockstepError` on its own; rejected packets are
/// reported as [`PacketError`]. Internal invariant violations panic instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockstepError {
    /// You made an invalid request, usually by using wrong parameters for function calls.
    InvalidRequest {
        /// Further specifies why the request was invalid.
        info: String,
    },
    /// A slot was outside the session's active range.
    InvalidSlot {
        /// The offending slot.
        slot: Slot,
        /// The number of active players in the session.
        num_players: usize,
    },
    /// A configuration value was rejected.
    InvalidConfig {
        /// The name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
    /// A user payload contained a NUL byte, which the wire format uses as terminator.
    InvalidUserPayload {
        /// Offset of the first NUL byte.
        position: usize,
    },
    /// A packet was rejected.
    Packet(PacketError),
}

impl Display for LockstepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRequest { info } => {
                write!(f, "Invalid Request: {}", info)
            },
            Self::InvalidSlot { slot, num_players } => {
                write!(
                    f,
                    "Invalid slot {}: session has {} players",
                    slot, num_players
                )
            },
            Self::InvalidConfig { field, reason } => {
                write!(f, "Invalid configuration for `{}`: {}", field, reason)
            },
            Self::InvalidUserPayload { position } => {
                write!(f, "User payload contains a NUL byte at offset {}", position)
            },
            Self::Packet(err) => write!(f, "Packet rejected: {}", err),
        }
    }
}

impl Error for LockstepError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Packet(err) => Some(err),
            _ => None,
        }
    }
}

impl From<PacketError> for LockstepError {
    fn from(err: PacketError) -> Self {
        Self::Packet(err)
    }
}

/// Why an inbound packet was dropped.
///
/// Every variant describes network input that was discarded as a whole; none of
/// them leave any trace in the session state. [`PacketError::Stale`] is routine on
/// lossy or reordering transports and is not logged as a problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum PacketError {
    /// The packet is shorter than the minimum header length.
    TooShort {
        /// The packet length.
        len: usize,
    },
    /// The sender slot is not an active player of this session.
    UnknownSlot {
        /// The slot byte found in the packet.
        slot: u8,
        /// The number of active players.
        num_players: usize,
    },
    /// The packet claims to come from our own slot.
    LoopbackSlot {
        /// The local slot.
        slot: Slot,
    },
    /// The packet is older than what we already confirmed for its sender.
    Stale {
        /// The sender.
        slot: Slot,
        /// The packet's current cycle.
        current_cycle: Cycle,
        /// What we already confirmed for the sender.
        highest_confirmed: Cycle,
    },
    /// The packet's last byte is not a NUL terminator.
    MissingTerminator,
    /// The packet ended in the middle of a field.
    Truncated {
        /// Byte offset at which reading stopped.
        offset: usize,
    },
    /// The record count is negative.
    NegativeRecordCount {
        /// The count found in the packet.
        ncycles: i32,
    },
    /// Skipping already-confirmed records ran past the end of the packet.
    SkipOverrun {
        /// Number of records that had to be skipped.
        skipped: i64,
    },
    /// A record refers to a cycle that has already been compacted away.
    AncientCycle {
        /// The record's cycle.
        cycle: i64,
        /// Our first retained cycle of the sender's slot.
        starting_cycle: Cycle,
    },
    /// The packet reaches further ahead of our own history than the session allows.
    TooFarAhead {
        /// The packet's current cycle.
        current_cycle: Cycle,
        /// The furthest cycle we accept.
        limit: i64,
    },
    /// Bytes remain after the last declared record.
    TrailingBytes {
        /// Number of unread bytes.
        remaining: usize,
    },
}

impl PacketError {
    /// Returns a short label suitable for logging and statistics keys.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TooShort { .. } => "too_short",
            Self::UnknownSlot { .. } => "unknown_slot",
            Self::LoopbackSlot { .. } => "loopback_slot",
            Self::Stale { .. } => "stale",
            Self::MissingTerminator => "missing_terminator",
            Self::Truncated { .. } => "truncated",
            Self::NegativeRecordCount { .. } => "negative_record_count",
            Self::SkipOverrun { .. } => "skip_overrun",
            Self::AncientCycle { .. } => "ancient_cycle",
            Self::TooFarAhead { .. } => "too_far_ahead",
            Self::TrailingBytes { .. } => "trailing_bytes",
        }
    }

    /// Returns `true` for packets that are merely out of date rather than malformed.
    #[must_use]
    pub const fn is_stale(&self) -> bool {
        matches!(self, Self::Stale { .. })
    }
}

impl Display for PacketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort { len } => write!(f, "packet too short ({} bytes)", len),
            Self::UnknownSlot { slot, num_players } => write!(
                f,
                "sender slot {} is not active in a {}-player session",
                slot, num_players
            ),
            Self::LoopbackSlot { slot } => {
                write!(f, "packet claims to come from our own slot {}", slot)
            },
            Self::Stale {
                slot,
                current_cycle,
                highest_confirmed,
            } => write!(
                f,
                "stale packet from slot {}: cycle {} is older than confirmed cycle {}",
                slot, current_cycle, highest_confirmed
            ),
            Self::MissingTerminator => write!(f, "packet does not end with a NUL byte"),
            Self::Truncated { offset } => write!(f, "packet truncated at offset {}", offset),
            Self::NegativeRecordCount { ncycles } => {
                write!(f, "negative record count {}", ncycles)
            },
            Self::SkipOverrun { skipped } => write!(
                f,
                "ran out of data while skipping {} already-confirmed records",
                skipped
            ),
            Self::AncientCycle {
                cycle,
                starting_cycle,
            } => write!(
                f,
                "record for cycle {} precedes retained history starting at {}",
                cycle, starting_cycle
            ),
            Self::TooFarAhead {
                current_cycle,
                limit,
            } => write!(
                f,
                "packet cycle {} is beyond the accepted limit {}",
                current_cycle, limit
            ),
            Self::TrailingBytes { remaining } => {
                write!(f, "{} unread bytes after the last record", remaining)
            },
        }
    }
}

impl Error for PacketError {}

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
    fn packet_error_wraps_into_lockstep_error() {
        let err: LockstepError = PacketError::MissingTerminator.into();
        assert_eq!(err, LockstepError::Packet(PacketError::MissingTerminator));
        assert!(err.source().is_some());
        assert!(err.to_string().contains("NUL"));
    }

    #[test]
    fn stale_is_distinguished() {
        let stale = PacketError::Stale {
            slot: Slot::new(1),
            current_cycle: Cycle::new(10),
            highest_confirmed: Cycle::new(12),
        };
        assert!(stale.is_stale());
        assert!(!PacketError::TooShort { len: 3 }.is_stale());
        assert_eq!(stale.as_str(), "stale");
    }

    #[test]
    fn display_mentions_details() {
        let err = LockstepError::InvalidSlot {
            slot: Slot::new(9),
            num_players: 2,
        };
        assert_eq!(err.to_string(), "Invalid slot 9: session has 2 players");
        let err = PacketError::TooShort { len: 4 };
        assert_eq!(err.to_string(), "packet too short (4 bytes)");
    }
}
