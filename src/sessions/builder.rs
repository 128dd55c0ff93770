use std::sync::Arc;

use crate::sessions::config::SessionConfig;
use crate::sessions::lockstep_session::LockstepSession;
use crate::report_violation_to;
use crate::telemetry::{Violation, ViolationKind, ViolationObserver, ViolationSeverity};
use crate::{Cycle, LockstepError, Slot, MAX_PLAYERS};

const DEFAULT_PLAYERS: usize = 2;
const DEFAULT_STARTING_CYCLE: Cycle = Cycle::new(0);

/// The [`SessionBuilder`] collects all settings of a [`LockstepSession`].
///
/// Setters never fail; everything is checked once in [`build`](Self::build).
///
/// ```
/// use lockstep_sync::{Cycle, SessionBuilder, SessionConfig, Slot};
///
/// let session = SessionBuilder::new()
///     .with_config(SessionConfig::short_history())
///     .with_num_players(4)
///     .with_local_slot(Slot::new(2))
///     .with_starting_cycle(Cycle::new(100))
///     .build()
///     .expect("valid session");
/// assert_eq!(session.starting_cycle(), Cycle::new(100));
/// assert_eq!(session.highest_confirmed(Slot::new(2)), Cycle::new(99));
/// ```
#[derive(Clone)]
#[must_use = "SessionBuilder must be consumed by calling build()"]
pub struct SessionBuilder {
    config: SessionConfig,
    num_players: usize,
    local_slot: Slot,
    starting_cycle: Cycle,
    violation_observer: Option<Arc<dyn ViolationObserver>>,
}

impl std::fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("config", &self.config)
            .field("num_players", &self.num_players)
            .field("local_slot", &self.local_slot)
            .field("starting_cycle", &self.starting_cycle)
            .field("has_observer", &self.violation_observer.is_some())
            .finish()
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBuilder {
    /// Construct a new builder with all values set to their defaults.
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
            num_players: DEFAULT_PLAYERS,
            local_slot: Slot::new(0),
            starting_cycle: DEFAULT_STARTING_CYCLE,
            violation_observer: None,
        }
    }

    /// Replaces the whole [`SessionConfig`].
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the number of players. Must be between 1 and [`MAX_PLAYERS`].
    pub fn with_num_players(mut self, num_players: usize) -> Self {
        self.num_players = num_players;
        self
    }

    /// Sets which slot this peer controls. Must be below the number of players.
    pub fn with_local_slot(mut self, local_slot: Slot) -> Self {
        self.local_slot = local_slot;
        self
    }

    /// Sets the first cycle of the level. Defaults to 0.
    pub fn with_starting_cycle(mut self, starting_cycle: Cycle) -> Self {
        self.starting_cycle = starting_cycle;
        self
    }

    /// Routes violations to `observer` instead of only logging them.
    pub fn with_observer(mut self, observer: Arc<dyn ViolationObserver>) -> Self {
        self.violation_observer = Some(observer);
        self
    }

    /// Consumes the builder to construct a [`LockstepSession`].
    ///
    /// # Errors
    /// - [`LockstepError::InvalidConfig`] if the [`SessionConfig`] is out of range
    /// - [`LockstepError::InvalidRequest`] if the player count is 0 or above [`MAX_PLAYERS`]
    /// - [`LockstepError::InvalidSlot`] if the local slot is not a player slot
    pub fn build(self) -> Result<LockstepSession, LockstepError> {
        if let Err(err) = self.config.validate() {
            let violation = Violation::new(
                ViolationSeverity::Error,
                ViolationKind::Configuration,
                format!("Rejected session configuration: {}", err),
                concat!(file!(), ":", line!()),
            );
            report_violation_to!(self.violation_observer, violation);
            return Err(err);
        }
        if self.num_players == 0 || self.num_players > MAX_PLAYERS {
            return Err(LockstepError::InvalidRequest {
                info: format!(
                    "Number of players must be between 1 and {}, got {}",
                    MAX_PLAYERS, self.num_players
                ),
            });
        }
        if !self.local_slot.is_active_for(self.num_players) {
            return Err(LockstepError::InvalidSlot {
                slot: self.local_slot,
                num_players: self.num_players,
            });
        }
        if self.starting_cycle.as_i32() == i32::MIN {
            return Err(LockstepError::InvalidRequest {
                info: "Starting cycle must be above i32::MIN".to_owned(),
            });
        }
        Ok(LockstepSession::new(
            self.config,
            self.num_players,
            self.local_slot,
            self.starting_cycle,
            self.violation_observer,
        ))
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
    use crate::telemetry::CollectingObserver;

    #[test]
    fn defaults_build_two_player_session() {
        let session = SessionBuilder::new().build().unwrap();
        assert_eq!(session.num_players(), 2);
        assert_eq!(session.local_slot(), Slot::new(0));
        assert_eq!(session.starting_cycle(), Cycle::new(0));
    }

    #[test]
    fn player_count_bounds() {
        assert!(matches!(
            SessionBuilder::new().with_num_players(0).build(),
            Err(LockstepError::InvalidRequest { .. })
        ));
        assert!(matches!(
            SessionBuilder::new().with_num_players(MAX_PLAYERS + 1).build(),
            Err(LockstepError::InvalidRequest { .. })
        ));
        assert!(SessionBuilder::new()
            .with_num_players(MAX_PLAYERS)
            .with_local_slot(Slot::new(MAX_PLAYERS - 1))
            .build()
            .is_ok());
    }

    #[test]
    fn local_slot_must_be_active() {
        let err = SessionBuilder::new()
            .with_num_players(3)
            .with_local_slot(Slot::new(3))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            LockstepError::InvalidSlot {
                slot: Slot::new(3),
                num_players: 3
            }
        );
    }

    #[test]
    fn invalid_config_is_reported_to_observer() {
        let observer = Arc::new(CollectingObserver::new());
        let config = SessionConfig {
            max_lead: 0,
            ..SessionConfig::default()
        };
        let result = SessionBuilder::new()
            .with_config(config)
            .with_observer(observer.clone())
            .build();
        assert!(result.is_err());
        let violations = observer.violations_of_kind(ViolationKind::Configuration);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("max_lead"));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = SessionConfig {
            checksum_history: 0,
            ..SessionConfig::default()
        };
        assert!(matches!(
            SessionBuilder::new().with_config(config).build(),
            Err(LockstepError::InvalidConfig {
                field: "checksum_history",
                ..
            })
        ));
    }

    #[test]
    fn debug_hides_observer_internals() {
        let builder = SessionBuilder::new();
        let text = format!("{:?}", builder);
        assert!(text.contains("has_observer: false"));
    }
}
