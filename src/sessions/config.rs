//! Configuration for lockstep sessions.
//!
//! | Field | Default | Purpose |
//! |-------|---------|---------|
//! | `max_history` | 1024 | local frames kept before the oldest half is compacted |
//! | `checksum_history` | 1024 | cycles whose checksum is remembered |
//! | `max_lead` | 1024 | how far past our newest frame a packet may reach |
//! | `key_bindings` | arrows, Z, space, X | key per control |
//! | `mouse_bindings` | left: attack, right: tongue | control per mouse button |
//!
//! ```
//! use lockstep_sync::{SessionBuilder, SessionConfig};
//!
//! let config = SessionConfig {
//!     max_history: 256,
//!     ..SessionConfig::default()
//! };
//! let session = SessionBuilder::new()
//!     .with_config(config)
//!     .with_num_players(2)
//!     .build()
//!     .expect("valid configuration");
//! assert_eq!(session.config().max_history, 256);
//! ```

use crate::checksum::DEFAULT_CHECKSUM_HISTORY;
use crate::history::DEFAULT_MAX_HISTORY;
use crate::sampler::{KeyBindings, MouseBindings};
use crate::LockstepError;

/// Upper bound for `max_history`, `checksum_history` and `max_lead`.
const MAX_TABLE_SIZE: usize = 1 << 16;

/// Default for [`SessionConfig::max_lead`].
pub const DEFAULT_MAX_LEAD: usize = 1024;

/// Session-wide settings, fixed at construction.
///
/// New fields may be added in future versions; construct with
/// `..SessionConfig::default()`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[must_use = "SessionConfig has no effect unless passed to SessionBuilder::with_config()"]
pub struct SessionConfig {
    /// Local history length that triggers compaction of the oldest half.
    ///
    /// Peers that fall further behind than half of this can no longer be served.
    ///
    /// Default: 1024 (about 20 seconds at 50 cycles per second)
    pub max_history: usize,

    /// Number of cycles whose checksum is kept for desync detection.
    ///
    /// Default: 1024
    pub checksum_history: usize,

    /// Packets whose current cycle is more than this many cycles past our newest
    /// local frame are dropped.
    ///
    /// Default: 1024
    pub max_lead: usize,

    /// Key bound to each control.
    pub key_bindings: KeyBindings,

    /// Control bound to each mouse button.
    pub mouse_bindings: MouseBindings,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_history: DEFAULT_MAX_HISTORY,
            checksum_history: DEFAULT_CHECKSUM_HISTORY,
            max_lead: DEFAULT_MAX_LEAD,
            key_bindings: KeyBindings::default(),
            mouse_bindings: MouseBindings::default(),
        }
    }
}

impl SessionConfig {
    /// Creates a `SessionConfig` with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Small tables for tests and tools that want to observe compaction and eviction.
    pub fn short_history() -> Self {
        Self {
            max_history: 64,
            checksum_history: 64,
            max_lead: 64,
            ..Self::default()
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`LockstepError::InvalidConfig`] if any value is out of range.
    pub fn validate(&self) -> Result<(), LockstepError> {
        if self.max_history < 2 || self.max_history > MAX_TABLE_SIZE {
            return Err(LockstepError::InvalidConfig {
                field: "max_history",
                reason: format!(
                    "must be between 2 and {}, got {}",
                    MAX_TABLE_SIZE, self.max_history
                ),
            });
        }
        if self.checksum_history < 1 || self.checksum_history > MAX_TABLE_SIZE {
            return Err(LockstepError::InvalidConfig {
                field: "checksum_history",
                reason: format!(
                    "must be between 1 and {}, got {}",
                    MAX_TABLE_SIZE, self.checksum_history
                ),
            });
        }
        if self.max_lead < 1 || self.max_lead > MAX_TABLE_SIZE {
            return Err(LockstepError::InvalidConfig {
                field: "max_lead",
                reason: format!(
                    "must be between 1 and {}, got {}",
                    MAX_TABLE_SIZE, self.max_lead
                ),
            });
        }
        if let Some((control, key)) = self.key_bindings.iter().find(|(_, k)| k.is_modifier()) {
            return Err(LockstepError::InvalidConfig {
                field: "key_bindings",
                reason: format!("modifier key {:?} cannot be bound to {:?}", key, control),
            });
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

    #[test]
    fn defaults_are_valid() {
        let config = SessionConfig::new();
        assert_eq!(config.max_history, 1024);
        assert_eq!(config.checksum_history, 1024);
        assert!(config.validate().is_ok());
        assert!(SessionConfig::short_history().validate().is_ok());
    }

    #[test]
    fn tiny_history_is_rejected() {
        let config = SessionConfig {
            max_history: 1,
            ..SessionConfig::default()
        };
        match config.validate() {
            Err(LockstepError::InvalidConfig { field, .. }) => assert_eq!(field, "max_history"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn zero_checksum_history_is_rejected() {
        let config = SessionConfig {
            checksum_history: 0,
            ..SessionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_lead_is_rejected() {
        let config = SessionConfig {
            max_lead: 0,
            ..SessionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn lead_is_bounded_like_the_tables() {
        let at_bound = SessionConfig {
            max_lead: MAX_TABLE_SIZE,
            ..SessionConfig::default()
        };
        assert!(at_bound.validate().is_ok());

        let config = SessionConfig {
            max_lead: i32::MAX as usize,
            ..SessionConfig::default()
        };
        match config.validate() {
            Err(LockstepError::InvalidConfig { field, .. }) => assert_eq!(field, "max_lead"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = SessionConfig::short_history();
        let json = serde_json::to_string(&config).unwrap();
        let back: SessionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
