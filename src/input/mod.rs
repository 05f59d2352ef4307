//! Joystick input boundary
//!
//! An [`InputProvider`] opens an [`InputDevice`], which yields
//! [`InputEvent`]s with a bounded wait so the viewport loop keeps ticking when
//! the stick is idle.

mod joystick;

pub use joystick::{JoystickDevice, JoystickProvider, decode_js_event};

use std::time::Duration;

use crate::Result;

/// Kind of input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputEventKind {
    Button,
    Axis,
}

/// One input record: button or axis `number` changed to `value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputEvent {
    pub kind: InputEventKind,
    pub number: u8,
    pub value: i16,
}

impl InputEvent {
    pub fn axis(number: u8, value: i16) -> Self {
        Self { kind: InputEventKind::Axis, number, value }
    }

    pub fn button(number: u8, pressed: bool) -> Self {
        Self { kind: InputEventKind::Button, number, value: i16::from(pressed) }
    }
}

/// An open input device.
pub trait InputDevice: Send {
    /// Wait up to `timeout` for the next event.
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    fn next_event(&mut self, timeout: Duration) -> Result<Option<InputEvent>>;
}

/// Opens input devices on the viewport thread.
pub trait InputProvider: Send + Sync {
    fn open(&self) -> Result<Box<dyn InputDevice>>;

    /// Human-readable device description for logs
    fn describe(&self) -> String;
}
