//! Simulation state checksums for desync detection.
//!
//! Each peer records a small integer digest of its simulation state per cycle in
//! a [`DesyncChecksum`] table. Outgoing packets carry the digest of the cycle
//! before their current cycle; on receipt it is compared with our own digest of
//! the same cycle. A checksum of `0` means "unknown" and never counts as a
//! mismatch, which lets peers that do not compute checksums interoperate.
//!
//! [`compute_checksum`] turns any serializable state into such a digest:
//!
//! ```
//! use lockstep_sync::{compute_checksum, Cycle, DesyncChecksum};
//! use serde::Serialize;
//!
//! #[derive(Serialize)]
//! struct World {
//!     tick: u32,
//!     positions: Vec<(i32, i32)>,
//! }
//!
//! let world = World { tick: 7, positions: vec![(1, 2), (3, 4)] };
//! let digest = compute_checksum(&world).expect("serializable state");
//! assert_ne!(digest, 0);
//!
//! let mut table = DesyncChecksum::default();
//! table.record(Cycle::new(7), digest);
//! assert_eq!(table.get(Cycle::new(7)), Some(digest));
//! ```

use std::collections::{HashMap, VecDeque};

use serde::Serialize;

use crate::Cycle;

/// Number of cycles whose checksum is remembered.
pub const DEFAULT_CHECKSUM_HISTORY: usize = 1024;

/// FNV-1a 64-bit offset basis.
const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;

/// FNV-1a 64-bit prime.
const FNV_PRIME: u64 = 0x0100_0000_01b3;

/// Bounded `cycle -> checksum` table.
///
/// Holds at most `capacity` entries. Inserting a new cycle into a full table
/// first evicts the entry that was inserted earliest, regardless of its cycle
/// number. Overwriting an existing cycle keeps its original insertion position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesyncChecksum {
    checksums: HashMap<Cycle, i32>,
    insertion_order: VecDeque<Cycle>,
    capacity: usize,
}

impl Default for DesyncChecksum {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CHECKSUM_HISTORY)
    }
}

impl DesyncChecksum {
    /// Creates an empty table holding at most `capacity` cycles (at least one).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            checksums: HashMap::with_capacity(capacity),
            insertion_order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Records the checksum of `cycle`, overwriting any previous value.
    pub fn record(&mut self, cycle: Cycle, checksum: i32) {
        if let Some(existing) = self.checksums.get_mut(&cycle) {
            *existing = checksum;
            return;
        }
        if self.insertion_order.len() >= self.capacity {
            if let Some(oldest) = self.insertion_order.pop_front() {
                self.checksums.remove(&oldest);
                tracing::trace!(cycle = %oldest, "Evicted checksum");
            }
        }
        self.insertion_order.push_back(cycle);
        self.checksums.insert(cycle, checksum);
    }

    /// The recorded checksum of `cycle`.
    #[must_use]
    pub fn get(&self, cycle: Cycle) -> Option<i32> {
        self.checksums.get(&cycle).copied()
    }

    /// The checksum of `cycle` as sent on the wire: `0` when unknown.
    #[must_use]
    pub fn wire_value(&self, cycle: Cycle) -> i32 {
        self.get(cycle).unwrap_or(0)
    }

    /// Number of cycles held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.insertion_order.len()
    }

    /// Returns `true` if nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.insertion_order.is_empty()
    }

    /// Maximum number of cycles held.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Forgets every checksum.
    pub fn clear(&mut self) {
        self.checksums.clear();
        self.insertion_order.clear();
    }
}

/// Computes a deterministic 32-bit digest of a serializable simulation state.
///
/// The state is serialized with `bincode` using fixed-width integers, hashed with
/// FNV-1a and folded to 32 bits. A digest that would be `0` is reported as `1`,
/// since `0` means "unknown" on the wire.
///
/// # Errors
/// Returns [`ChecksumError::SerializationFailed`] if the state cannot be serialized.
pub fn compute_checksum<T: Serialize>(state: &T) -> Result<i32, ChecksumError> {
    let bytes = bincode::serde::encode_to_vec(
        state,
        bincode::config::standard().with_fixed_int_encoding(),
    )
    .map_err(|e| ChecksumError::SerializationFailed(e.to_string()))?;
    Ok(fold_to_checksum(hash_bytes_fnv1a(&bytes)))
}

/// FNV-1a 64-bit hash of raw bytes.
#[inline]
#[must_use]
pub fn hash_bytes_fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, &byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

#[inline]
fn fold_to_checksum(hash: u64) -> i32 {
    let folded = ((hash >> 32) ^ (hash & 0xffff_ffff)) as u32 as i32;
    if folded == 0 {
        1
    } else {
        folded
    }
}

/// Errors that can occur during checksum computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksumError {
    /// Serialization of the state failed.
    SerializationFailed(String),
}

impl std::fmt::Display for ChecksumError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationFailed(msg) => write!(f, "checksum failed: {msg}"),
        }
    }
}

impl std::error::Error for ChecksumError {}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct TestState {
        tick: u32,
        position: (i32, i32),
        name: String,
    }

    fn sample_state() -> TestState {
        TestState {
            tick: 100,
            position: (15, -25),
            name: "frog".to_string(),
        }
    }

    #[test]
    fn checksum_is_deterministic() {
        let state = sample_state();
        assert_eq!(
            compute_checksum(&state).unwrap(),
            compute_checksum(&state).unwrap()
        );
    }

    #[test]
    fn checksum_differs_for_different_states() {
        let a = sample_state();
        let mut b = sample_state();
        b.tick = 101;
        assert_ne!(compute_checksum(&a).unwrap(), compute_checksum(&b).unwrap());
    }

    #[test]
    fn folded_zero_becomes_one() {
        assert_eq!(fold_to_checksum(0), 1);
        assert_eq!(fold_to_checksum(0x0000_0001_0000_0001), 1);
        assert_eq!(fold_to_checksum(0x0000_0000_0000_0002), 2);
    }

    #[test]
    fn known_fnv1a_values() {
        assert_eq!(hash_bytes_fnv1a(b""), FNV_OFFSET_BASIS);
        assert_eq!(hash_bytes_fnv1a(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn record_overwrites_in_place() {
        let mut table = DesyncChecksum::with_capacity(2);
        table.record(Cycle::new(1), 10);
        table.record(Cycle::new(2), 20);
        table.record(Cycle::new(1), 11);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(Cycle::new(1)), Some(11));

        // cycle 1 is still the oldest insertion
        table.record(Cycle::new(3), 30);
        assert_eq!(table.get(Cycle::new(1)), None);
        assert_eq!(table.get(Cycle::new(2)), Some(20));
        assert_eq!(table.get(Cycle::new(3)), Some(30));
    }

    #[test]
    fn eviction_follows_insertion_not_cycle_order() {
        let mut table = DesyncChecksum::with_capacity(2);
        table.record(Cycle::new(9), 1);
        table.record(Cycle::new(3), 2);
        table.record(Cycle::new(5), 3);
        assert_eq!(table.get(Cycle::new(9)), None);
        assert_eq!(table.get(Cycle::new(3)), Some(2));
    }

    #[test]
    fn default_table_keeps_most_recent_1024() {
        let mut table = DesyncChecksum::default();
        for cycle in 0..=1030 {
            table.record(Cycle::new(cycle), cycle + 1);
        }
        assert_eq!(table.len(), DEFAULT_CHECKSUM_HISTORY);
        for cycle in 0..=6 {
            assert_eq!(table.get(Cycle::new(cycle)), None);
        }
        for cycle in 7..=1030 {
            assert_eq!(table.get(Cycle::new(cycle)), Some(cycle + 1));
        }
    }

    #[test]
    fn wire_value_is_zero_when_unknown() {
        let mut table = DesyncChecksum::default();
        assert_eq!(table.wire_value(Cycle::new(4)), 0);
        table.record(Cycle::new(4), -7);
        assert_eq!(table.wire_value(Cycle::new(4)), -7);
        table.clear();
        assert!(table.is_empty());
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// After any sequence of inserts only the last `capacity` distinct cycles remain.
        #[test]
        fn prop_fifo_keeps_latest_insertions(
            cycles in prop::collection::vec(0i32..200, 1..400),
            capacity in 1usize..32,
        ) {
            let mut table = DesyncChecksum::with_capacity(capacity);
            let mut order: Vec<i32> = Vec::new();
            for &cycle in &cycles {
                table.record(Cycle::new(cycle), cycle);
                if !order.contains(&cycle) {
                    order.push(cycle);
                    if order.len() > capacity {
                        order.remove(0);
                    }
                }
            }
            prop_assert!(table.len() <= capacity);
            prop_assert_eq!(table.len(), order.len());
            for &cycle in &order {
                prop_assert_eq!(table.get(Cycle::new(cycle)), Some(cycle));
            }
        }
    }
}
