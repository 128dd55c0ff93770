use std::collections::BTreeMap;

use crate::{Cycle, PacketError};

/// Counters describing what a session has done since its level started.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
#[must_use = "SessionStats should be inspected or used after being queried"]
pub struct SessionStats {
    /// Packets produced by `encode_packet`.
    pub packets_sent: u64,
    /// Packets handed to `handle_packet`, accepted or not.
    pub packets_received: u64,
    /// Packets that were applied.
    pub packets_accepted: u64,
    /// Stale packets, dropped without complaint.
    pub packets_stale: u64,
    /// Malformed or out-of-range packets, keyed by [`PacketError::as_str`].
    pub packets_dropped: BTreeMap<&'static str, u64>,
    /// Stored remote frames that were overwritten with different input.
    pub corrections: u64,
    /// Checksum disagreements with peers.
    pub desyncs_detected: u64,
    /// The cycle of the most recent checksum disagreement.
    pub last_desync_cycle: Option<Cycle>,
    /// History compactions performed.
    pub compactions: u64,
}

impl SessionStats {
    /// Creates zeroed statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of packets dropped for being malformed or out of range.
    #[must_use]
    pub fn total_dropped(&self) -> u64 {
        self.packets_dropped.values().sum()
    }

    pub(crate) fn record_rejection(&mut self, err: &PacketError) {
        if err.is_stale() {
            self.packets_stale += 1;
        } else {
            *self.packets_dropped.entry(err.as_str()).or_insert(0) += 1;
        }
    }
}

impl std::fmt::Display for SessionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self {
            packets_sent,
            packets_received,
            packets_accepted,
            packets_stale,
            packets_dropped: _,
            corrections,
            desyncs_detected,
            last_desync_cycle,
            compactions,
        } = self;
        write!(
            f,
            "sent={} received={} accepted={} stale={} dropped={} corrections={} desyncs={} compactions={}",
            packets_sent,
            packets_received,
            packets_accepted,
            packets_stale,
            self.total_dropped(),
            corrections,
            desyncs_detected,
            compactions
        )?;
        if let Some(cycle) = last_desync_cycle {
            write!(f, " last_desync={}", cycle)?;
        }
        Ok(())
    }
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
    use crate::Slot;

    #[test]
    fn rejections_are_bucketed() {
        let mut stats = SessionStats::new();
        stats.record_rejection(&PacketError::MissingTerminator);
        stats.record_rejection(&PacketError::MissingTerminator);
        stats.record_rejection(&PacketError::TooShort { len: 1 });
        stats.record_rejection(&PacketError::Stale {
            slot: Slot::new(1),
            current_cycle: Cycle::new(1),
            highest_confirmed: Cycle::new(2),
        });
        assert_eq!(stats.packets_dropped["missing_terminator"], 2);
        assert_eq!(stats.total_dropped(), 3);
        assert_eq!(stats.packets_stale, 1);
    }

    #[test]
    fn display_is_one_line() {
        let mut stats = SessionStats::new();
        stats.last_desync_cycle = Some(Cycle::new(12));
        let text = stats.to_string();
        assert!(text.contains("dropped=0"));
        assert!(text.ends_with("last_desync=12"));
        assert!(!text.contains('\n'));
    }
}
