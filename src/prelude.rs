//! Convenient re-exports for common usage.
//!
//! ```rust
//! use lockstep_sync::prelude::*;
//!
//! let mut session = SessionBuilder::new()
//!     .with_num_players(2)
//!     .with_local_slot(Slot::new(1))
//!     .build()
//!     .expect("valid session");
//! let cycle = session.add_local_input(InputFrame::new(
//!     [Control::Jump].into_iter().collect::<ControlKeys>(),
//! ));
//! assert!(session.control_status(cycle, Slot::new(1), Control::Jump));
//! ```

// Sessions
pub use crate::sessions::builder::SessionBuilder;
pub use crate::sessions::config::SessionConfig;
pub use crate::sessions::lockstep_session::{BackupScope, LockstepSession};
pub use crate::sessions::snapshot::SessionSnapshot;
pub use crate::sessions::stats::SessionStats;

// Fundamental types
pub use crate::frame::{Control, ControlKeys, InputFrame};
pub use crate::{Cycle, Slot, MAX_PLAYERS, NULL_CYCLE};

// Input sampling
pub use crate::sampler::{InputDevice, KeyBindings, KeyCode, MouseBindings, RawInputState};

// Networking
pub use crate::network::codec::{DecodeOutcome, DesyncReport};
pub use crate::network::inbox::{packet_channel, PacketInbox, PacketSender};
pub use crate::network::udp_socket::UdpTransport;
pub use crate::PacketTransport;

// Checksums
pub use crate::checksum::compute_checksum;

// Errors
pub use crate::error::{LockstepError, PacketError};
