//! Per-cycle input frames.
//!
//! An [`InputFrame`] is what one player did during one cycle: a bitmask of the
//! logical controls held down, plus an optional opaque user payload that game
//! logic can use for out-of-band commands. Frames are compared structurally and
//! never mutated once stored.

use smallvec::SmallVec;

use crate::LockstepError;

/// Number of logical controls. Each occupies one bit of [`ControlKeys`].
pub const NUM_CONTROLS: usize = 7;

/// Inline capacity of a frame's user payload before it spills to the heap.
const INLINE_USER_BYTES: usize = 16;

/// A logical game control.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum Control {
    /// Move up.
    Up,
    /// Move down.
    Down,
    /// Move left.
    Left,
    /// Move right.
    Right,
    /// Primary action.
    Attack,
    /// Jump.
    Jump,
    /// Secondary action.
    Tongue,
}

impl Control {
    /// Every control, in bit order.
    pub const ALL: [Self; NUM_CONTROLS] = [
        Self::Up,
        Self::Down,
        Self::Left,
        Self::Right,
        Self::Attack,
        Self::Jump,
        Self::Tongue,
    ];

    /// The bit index of this control inside [`ControlKeys`].
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The mask with only this control's bit set.
    #[inline]
    #[must_use]
    pub const fn mask(self) -> u8 {
        1 << self.index()
    }
}

/// Bitmask of pressed controls, one bit per [`Control`].
///
/// ```
/// use lockstep_sync::{Control, ControlKeys};
///
/// let mut keys = ControlKeys::empty();
/// keys.set(Control::Jump, true);
/// assert!(keys.contains(Control::Jump));
/// assert!(!keys.contains(Control::Up));
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
pub struct ControlKeys(u8);

impl ControlKeys {
    /// No control pressed.
    #[inline]
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Creates a mask from raw bits, as found on the wire.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Returns the raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Returns `true` if `control` is pressed.
    #[inline]
    #[must_use]
    pub const fn contains(self, control: Control) -> bool {
        self.0 & control.mask() != 0
    }

    /// Presses or releases `control`.
    #[inline]
    pub fn set(&mut self, control: Control, pressed: bool) {
        if pressed {
            self.0 |= control.mask();
        } else {
            self.0 &= !control.mask();
        }
    }

    /// Returns `true` if no control is pressed.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl FromIterator<Control> for ControlKeys {
    fn from_iter<I: IntoIterator<Item = Control>>(iter: I) -> Self {
        let mut keys = Self::empty();
        for control in iter {
            keys.set(control, true);
        }
        keys
    }
}

/// One player's input for one cycle.
///
/// The user payload never contains a NUL byte; the wire format relies on it as a
/// terminator. Use [`InputFrame::with_user`] to attach a payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub struct InputFrame {
    keys: ControlKeys,
    user: SmallVec<[u8; INLINE_USER_BYTES]>,
}

impl InputFrame {
    /// Creates a frame without a user payload.
    #[inline]
    #[must_use]
    pub fn new(keys: ControlKeys) -> Self {
        Self {
            keys,
            user: SmallVec::new(),
        }
    }

    /// Creates a frame carrying a user payload.
    ///
    /// # Errors
    /// Returns [`LockstepError::InvalidUserPayload`] if `user` contains a NUL byte.
    pub fn with_user(keys: ControlKeys, user: &[u8]) -> Result<Self, LockstepError> {
        if let Some(position) = user.iter().position(|&b| b == 0) {
            return Err(LockstepError::InvalidUserPayload { position });
        }
        Ok(Self {
            keys,
            user: SmallVec::from_slice(user),
        })
    }

    /// Builds a frame from wire data that is already known to be NUL-free.
    pub(crate) fn from_wire(keys: u8, user: &[u8]) -> Self {
        debug_assert!(!user.contains(&0));
        Self {
            keys: ControlKeys::from_bits(keys),
            user: SmallVec::from_slice(user),
        }
    }

    /// The pressed controls.
    #[inline]
    #[must_use]
    pub const fn keys(&self) -> ControlKeys {
        self.keys
    }

    /// The user payload, possibly empty.
    #[inline]
    #[must_use]
    pub fn user(&self) -> &[u8] {
        &self.user
    }

    /// Returns `true` if `control` is pressed in this frame.
    #[inline]
    #[must_use]
    pub const fn is_pressed(&self, control: Control) -> bool {
        self.keys.contains(control)
    }

    /// Number of bytes this frame occupies on the wire.
    #[inline]
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        self.user.len() + 2
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
    fn control_masks_are_distinct_bits() {
        let mut seen = 0u8;
        for control in Control::ALL {
            assert_eq!(seen & control.mask(), 0, "{:?} overlaps", control);
            seen |= control.mask();
        }
        assert_eq!(seen, 0b0111_1111);
    }

    #[test]
    fn keys_set_and_clear() {
        let mut keys = ControlKeys::empty();
        keys.set(Control::Left, true);
        keys.set(Control::Attack, true);
        assert_eq!(keys.bits(), Control::Left.mask() | Control::Attack.mask());
        keys.set(Control::Left, false);
        assert!(!keys.contains(Control::Left));
        assert!(keys.contains(Control::Attack));
    }

    #[test]
    fn keys_collect_from_controls() {
        let keys: ControlKeys = [Control::Up, Control::Jump].into_iter().collect();
        assert!(keys.contains(Control::Up));
        assert!(keys.contains(Control::Jump));
        assert!(!keys.contains(Control::Down));
    }

    #[test]
    fn user_payload_rejects_nul() {
        let err = InputFrame::with_user(ControlKeys::empty(), b"ab\0c").unwrap_err();
        assert_eq!(err, LockstepError::InvalidUserPayload { position: 2 });
    }

    #[test]
    fn equality_covers_keys_and_user() {
        let a = InputFrame::with_user(ControlKeys::from_bits(1), b"go").unwrap();
        let b = InputFrame::with_user(ControlKeys::from_bits(1), b"go").unwrap();
        let c = InputFrame::with_user(ControlKeys::from_bits(1), b"stop").unwrap();
        let d = InputFrame::with_user(ControlKeys::from_bits(2), b"go").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn encoded_len_counts_keys_and_terminator() {
        assert_eq!(InputFrame::default().encoded_len(), 2);
        let frame = InputFrame::with_user(ControlKeys::empty(), b"hello").unwrap();
        assert_eq!(frame.encoded_len(), 7);
    }
}
