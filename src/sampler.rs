//! Local input sampling.
//!
//! The [`InputSampler`] turns one reading of the raw input devices into the
//! [`InputFrame`] of the current cycle. Device access is abstracted behind
//! [`InputDevice`] so the sampler can be driven by a windowing backend in a game
//! and by a scripted device in tests.
//!
//! # Modifier suppression
//!
//! While ctrl or alt is held, every bound control reads as released: those
//! chords belong to the user interface, not to the simulation. Every bound
//! source that is held during such a chord is put on an ignore list and stays
//! ignored until it has been observed released at least once. Releasing ctrl
//! before the other key therefore does not leak a press into the game.
//!
//! ```
//! use lockstep_sync::{Control, InputDevice, InputSampler, KeyCode, RawInputState};
//!
//! struct Scripted(RawInputState);
//! impl InputDevice for Scripted {
//!     fn poll(&mut self) -> RawInputState {
//!         self.0.clone()
//!     }
//! }
//!
//! let mut sampler = InputSampler::default();
//! let mut device = Scripted(RawInputState::new());
//! device.0.press(KeyCode::LEFT_CTRL);
//! device.0.press(KeyCode::Z);
//! assert!(sampler.sample(&mut device, None).keys().is_empty());
//!
//! // ctrl released first: Z stays ignored until it is released too
//! device.0.release(KeyCode::LEFT_CTRL);
//! assert!(!sampler.sample(&mut device, None).is_pressed(Control::Attack));
//! device.0.release(KeyCode::Z);
//! sampler.sample(&mut device, None);
//! device.0.press(KeyCode::Z);
//! assert!(sampler.sample(&mut device, None).is_pressed(Control::Attack));
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::frame::{Control, ControlKeys, InputFrame, NUM_CONTROLS};
use crate::LockstepError;

/// Number of mouse buttons that can be bound to controls.
pub const MOUSE_BINDING_SLOTS: usize = 3;

/// A physical keyboard key, identified by the backend's scan code.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeyCode(pub u16);

impl KeyCode {
    /// Arrow up.
    pub const UP: Self = Self(0x100);
    /// Arrow down.
    pub const DOWN: Self = Self(0x101);
    /// Arrow left.
    pub const LEFT: Self = Self(0x102);
    /// Arrow right.
    pub const RIGHT: Self = Self(0x103);
    /// Left control.
    pub const LEFT_CTRL: Self = Self(0x110);
    /// Right control.
    pub const RIGHT_CTRL: Self = Self(0x111);
    /// Left alt.
    pub const LEFT_ALT: Self = Self(0x112);
    /// Right alt.
    pub const RIGHT_ALT: Self = Self(0x113);
    /// Space bar.
    pub const SPACE: Self = Self(0x20);
    /// Letter X.
    pub const X: Self = Self(0x58);
    /// Letter Z.
    pub const Z: Self = Self(0x5a);

    /// Keys that suppress every bound control while held.
    pub const MODIFIERS: [Self; 4] = [
        Self::LEFT_CTRL,
        Self::RIGHT_CTRL,
        Self::LEFT_ALT,
        Self::RIGHT_ALT,
    ];

    /// Returns `true` for ctrl and alt keys.
    #[must_use]
    pub fn is_modifier(self) -> bool {
        Self::MODIFIERS.contains(&self)
    }
}

/// One key per [`Control`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBindings {
    keys: [KeyCode; NUM_CONTROLS],
}

impl Default for KeyBindings {
    /// Arrows to move, Z to attack, space to jump, X for the tongue.
    fn default() -> Self {
        Self {
            keys: [
                KeyCode::UP,
                KeyCode::DOWN,
                KeyCode::LEFT,
                KeyCode::RIGHT,
                KeyCode::Z,
                KeyCode::SPACE,
                KeyCode::X,
            ],
        }
    }
}

impl KeyBindings {
    /// The key bound to `control`.
    #[must_use]
    pub fn key(&self, control: Control) -> KeyCode {
        self.keys[control.index()]
    }

    /// Binds `control` to `key`.
    ///
    /// # Errors
    /// Returns [`LockstepError::InvalidConfig`] for ctrl and alt keys, which
    /// would never read as pressed.
    pub fn bind(&mut self, control: Control, key: KeyCode) -> Result<(), LockstepError> {
        if key.is_modifier() {
            return Err(LockstepError::InvalidConfig {
                field: "key_bindings",
                reason: format!("modifier key {:?} cannot be bound to {:?}", key, control),
            });
        }
        self.keys[control.index()] = key;
        Ok(())
    }

    /// Iterates `(control, key)` pairs in control order.
    pub fn iter(&self) -> impl Iterator<Item = (Control, KeyCode)> + '_ {
        Control::ALL.iter().map(move |&c| (c, self.keys[c.index()]))
    }
}

/// Optional control per mouse button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MouseBindings {
    buttons: [Option<Control>; MOUSE_BINDING_SLOTS],
}

impl Default for MouseBindings {
    /// Left button attacks, right button uses the tongue, middle is unbound.
    fn default() -> Self {
        Self {
            buttons: [Some(Control::Attack), None, Some(Control::Tongue)],
        }
    }
}

impl MouseBindings {
    /// No button bound.
    #[must_use]
    pub const fn unbound() -> Self {
        Self {
            buttons: [None; MOUSE_BINDING_SLOTS],
        }
    }

    /// The control bound to `button`.
    #[must_use]
    pub fn control(&self, button: usize) -> Option<Control> {
        self.buttons.get(button).copied().flatten()
    }

    /// Binds `button` to `control`, or unbinds it with `None`.
    ///
    /// # Errors
    /// Returns [`LockstepError::InvalidConfig`] if `button` is not one of the
    /// [`MOUSE_BINDING_SLOTS`] bindable buttons.
    pub fn bind(&mut self, button: usize, control: Option<Control>) -> Result<(), LockstepError> {
        let slot = self
            .buttons
            .get_mut(button)
            .ok_or_else(|| LockstepError::InvalidConfig {
                field: "mouse_bindings",
                reason: format!(
                    "button {} is out of range, only {} buttons can be bound",
                    button, MOUSE_BINDING_SLOTS
                ),
            })?;
        *slot = control;
        Ok(())
    }
}

/// Snapshot of the raw device state for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawInputState {
    keys: HashSet<KeyCode>,
    mouse: [bool; MOUSE_BINDING_SLOTS],
}

impl RawInputState {
    /// Nothing pressed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `key` as held.
    pub fn press(&mut self, key: KeyCode) {
        self.keys.insert(key);
    }

    /// Marks `key` as released.
    pub fn release(&mut self, key: KeyCode) {
        self.keys.remove(&key);
    }

    /// Sets the state of mouse `button`. Buttons past the bindable ones are ignored.
    pub fn set_mouse(&mut self, button: usize, pressed: bool) {
        if let Some(state) = self.mouse.get_mut(button) {
            *state = pressed;
        }
    }

    /// Returns `true` if `key` is held.
    #[must_use]
    pub fn is_key_pressed(&self, key: KeyCode) -> bool {
        self.keys.contains(&key)
    }

    /// Returns `true` if mouse `button` is held.
    #[must_use]
    pub fn is_mouse_pressed(&self, button: usize) -> bool {
        self.mouse.get(button).copied().unwrap_or(false)
    }

    /// Returns `true` if ctrl or alt is held.
    #[must_use]
    pub fn modifier_held(&self) -> bool {
        KeyCode::MODIFIERS.iter().any(|k| self.keys.contains(k))
    }
}

/// A source of raw device state, read once per sampled cycle.
pub trait InputDevice {
    /// Reads the current state of every key and mouse button.
    fn poll(&mut self) -> RawInputState;
}

/// A physical input that can drive a control.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum InputSource {
    /// A keyboard key.
    Key(KeyCode),
    /// A mouse button by index.
    Mouse(usize),
}

/// Produces the local [`InputFrame`] of each cycle.
#[derive(Debug, Clone, Default)]
pub struct InputSampler {
    key_bindings: KeyBindings,
    mouse_bindings: MouseBindings,
    ignored: HashSet<InputSource>,
    user_output: Option<Vec<u8>>,
}

impl InputSampler {
    /// Creates a sampler with the given bindings.
    #[must_use]
    pub fn new(key_bindings: KeyBindings, mouse_bindings: MouseBindings) -> Self {
        Self {
            key_bindings,
            mouse_bindings,
            ignored: HashSet::new(),
            user_output: None,
        }
    }

    /// The active key bindings.
    #[must_use]
    pub fn key_bindings(&self) -> &KeyBindings {
        &self.key_bindings
    }

    /// The active mouse bindings.
    #[must_use]
    pub fn mouse_bindings(&self) -> &MouseBindings {
        &self.mouse_bindings
    }

    /// Queues a user payload for the next sampled frame.
    ///
    /// The payload is attached to exactly one frame. Setting it again before the
    /// next sample replaces it.
    ///
    /// # Errors
    /// Returns [`LockstepError::InvalidUserPayload`] if `payload` contains a NUL byte.
    pub fn set_user_output(&mut self, payload: &[u8]) -> Result<(), LockstepError> {
        if let Some(position) = payload.iter().position(|&b| b == 0) {
            return Err(LockstepError::InvalidUserPayload { position });
        }
        self.user_output = Some(payload.to_vec());
        Ok(())
    }

    /// Returns `true` if a user payload waits for the next frame.
    #[must_use]
    pub fn has_user_output(&self) -> bool {
        self.user_output.is_some()
    }

    /// Returns `true` if `source` is currently ignored.
    #[must_use]
    pub fn is_ignored(&self, source: InputSource) -> bool {
        self.ignored.contains(&source)
    }

    /// Samples the input of one cycle.
    ///
    /// With a locked frame the lock is returned unchanged and the device is not
    /// read. Otherwise the device is polled exactly once.
    pub fn sample<D: InputDevice + ?Sized>(
        &mut self,
        device: &mut D,
        locked: Option<&InputFrame>,
    ) -> InputFrame {
        if let Some(frame) = locked {
            return frame.clone();
        }

        let state = device.poll();
        let suppress = state.modifier_held();
        let mut keys = ControlKeys::empty();

        for (control, key) in self.key_bindings.iter() {
            let source = InputSource::Key(key);
            if Self::filter(&mut self.ignored, source, state.is_key_pressed(key), suppress) {
                keys.set(control, true);
            }
        }
        for button in 0..MOUSE_BINDING_SLOTS {
            if let Some(control) = self.mouse_bindings.control(button) {
                let source = InputSource::Mouse(button);
                if Self::filter(
                    &mut self.ignored,
                    source,
                    state.is_mouse_pressed(button),
                    suppress,
                ) {
                    keys.set(control, true);
                }
            }
        }

        match self.user_output.take() {
            Some(user) => InputFrame::from_wire(keys.bits(), &user),
            None => InputFrame::new(keys),
        }
    }

    /// Applies the ignore rule to one source and returns whether it counts as pressed.
    fn filter(
        ignored: &mut HashSet<InputSource>,
        source: InputSource,
        pressed: bool,
        suppress: bool,
    ) -> bool {
        if !pressed {
            ignored.remove(&source);
            return false;
        }
        if suppress {
            ignored.insert(source);
            return false;
        }
        !ignored.contains(&source)
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

    #[derive(Default)]
    struct FakeDevice {
        state: RawInputState,
        polls: usize,
    }

    impl InputDevice for FakeDevice {
        fn poll(&mut self) -> RawInputState {
            self.polls += 1;
            self.state.clone()
        }
    }

    #[test]
    fn default_bindings_map_arrows() {
        let mut sampler = InputSampler::default();
        let mut device = FakeDevice::default();
        device.state.press(KeyCode::LEFT);
        device.state.press(KeyCode::SPACE);
        let frame = sampler.sample(&mut device, None);
        assert!(frame.is_pressed(Control::Left));
        assert!(frame.is_pressed(Control::Jump));
        assert!(!frame.is_pressed(Control::Right));
        assert!(frame.user().is_empty());
    }

    #[test]
    fn locked_frame_is_returned_without_polling() {
        let mut sampler = InputSampler::default();
        let mut device = FakeDevice::default();
        device.state.press(KeyCode::UP);
        let lock = InputFrame::new(ControlKeys::from_bits(0b100_0000));
        let frame = sampler.sample(&mut device, Some(&lock));
        assert_eq!(frame, lock);
        assert_eq!(device.polls, 0);
    }

    #[test]
    fn modifier_suppresses_and_ignores_until_release() {
        let mut sampler = InputSampler::default();
        let mut device = FakeDevice::default();
        device.state.press(KeyCode::RIGHT_ALT);
        device.state.press(KeyCode::UP);
        assert!(sampler.sample(&mut device, None).keys().is_empty());
        assert!(sampler.is_ignored(InputSource::Key(KeyCode::UP)));

        device.state.release(KeyCode::RIGHT_ALT);
        assert!(sampler.sample(&mut device, None).keys().is_empty());

        device.state.release(KeyCode::UP);
        sampler.sample(&mut device, None);
        assert!(!sampler.is_ignored(InputSource::Key(KeyCode::UP)));

        device.state.press(KeyCode::UP);
        assert!(sampler.sample(&mut device, None).is_pressed(Control::Up));
    }

    #[test]
    fn keys_pressed_after_modifier_release_are_not_ignored() {
        let mut sampler = InputSampler::default();
        let mut device = FakeDevice::default();
        device.state.press(KeyCode::LEFT_CTRL);
        sampler.sample(&mut device, None);
        device.state.release(KeyCode::LEFT_CTRL);
        device.state.press(KeyCode::DOWN);
        assert!(sampler.sample(&mut device, None).is_pressed(Control::Down));
    }

    #[test]
    fn mouse_buttons_follow_bindings_and_ignore_rule() {
        let mut sampler = InputSampler::default();
        let mut device = FakeDevice::default();
        device.state.set_mouse(0, true);
        device.state.set_mouse(1, true);
        let frame = sampler.sample(&mut device, None);
        assert_eq!(frame.keys().bits(), Control::Attack.mask());

        device.state.press(KeyCode::LEFT_CTRL);
        assert!(sampler.sample(&mut device, None).keys().is_empty());
        assert!(sampler.is_ignored(InputSource::Mouse(0)));
        assert!(!sampler.is_ignored(InputSource::Mouse(1)));
    }

    #[test]
    fn filter_forgets_source_on_release() {
        let mut ignored = HashSet::new();
        let up = InputSource::Key(KeyCode::UP);
        assert!(!InputSampler::filter(&mut ignored, up, true, true));
        assert!(!InputSampler::filter(&mut ignored, up, true, false));
        assert!(!InputSampler::filter(&mut ignored, up, false, false));
        assert!(ignored.is_empty());
        assert!(InputSampler::filter(&mut ignored, up, true, false));
    }

    #[test]
    fn user_output_is_consumed_once() {
        let mut sampler = InputSampler::default();
        let mut device = FakeDevice::default();
        sampler.set_user_output(b"pause").unwrap();
        assert!(sampler.has_user_output());
        assert_eq!(sampler.sample(&mut device, None).user(), b"pause");
        assert!(sampler.sample(&mut device, None).user().is_empty());
    }

    #[test]
    fn user_output_rejects_nul() {
        let mut sampler = InputSampler::default();
        assert_eq!(
            sampler.set_user_output(b"a\0"),
            Err(LockstepError::InvalidUserPayload { position: 1 })
        );
        assert!(!sampler.has_user_output());
    }

    #[test]
    fn bindings_reject_modifiers_and_bad_buttons() {
        let mut keys = KeyBindings::default();
        assert!(keys.bind(Control::Jump, KeyCode::LEFT_ALT).is_err());
        keys.bind(Control::Jump, KeyCode::UP).unwrap();
        assert_eq!(keys.key(Control::Jump), KeyCode::UP);

        let mut mouse = MouseBindings::unbound();
        assert!(mouse.bind(MOUSE_BINDING_SLOTS, Some(Control::Up)).is_err());
        mouse.bind(1, Some(Control::Jump)).unwrap();
        assert_eq!(mouse.control(1), Some(Control::Jump));
    }
}
