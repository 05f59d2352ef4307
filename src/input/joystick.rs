//! Linux joystick device (`/dev/input/jsN`)
//!
//! The kernel joystick API delivers fixed 8-byte `js_event` records:
//! `u32 time (ms)`, `i16 value`, `u8 type`, `u8 number`, native endian.
//! Synthetic "initial state" events carry the `JS_EVENT_INIT` bit on top of
//! the button/axis type and are treated like live events.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, trace};

use super::{InputDevice, InputEvent, InputEventKind, InputProvider};
use crate::{PtuError, Result};

const JS_EVENT_BUTTON: u8 = 0x01;
const JS_EVENT_AXIS: u8 = 0x02;
const JS_EVENT_INIT: u8 = 0x80;
const JS_EVENT_SIZE: usize = 8;

/// Opens the joystick at a fixed device path.
#[derive(Debug, Clone)]
pub struct JoystickProvider {
    path: PathBuf,
}

impl JoystickProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl InputProvider for JoystickProvider {
    fn open(&self) -> Result<Box<dyn InputDevice>> {
        Ok(Box::new(JoystickDevice::open(&self.path)?))
    }

    fn describe(&self) -> String {
        format!("joystick {}", self.path.display())
    }
}

/// Decode one raw `js_event` record.
///
/// Returns `None` for event types other than button and axis.
pub fn decode_js_event(raw: &[u8; JS_EVENT_SIZE]) -> Option<InputEvent> {
    let value = i16::from_ne_bytes([raw[4], raw[5]]);
    let kind = match raw[6] & !JS_EVENT_INIT {
        JS_EVENT_BUTTON => InputEventKind::Button,
        JS_EVENT_AXIS => InputEventKind::Axis,
        _ => return None,
    };
    Some(InputEvent { kind, number: raw[7], value })
}

/// An open Linux joystick.
#[derive(Debug)]
pub struct JoystickDevice {
    file: File,
    path: PathBuf,
}

impl JoystickDevice {
    /// Open the joystick in non-blocking mode.
    #[cfg(target_os = "linux")]
    pub fn open(path: &Path) -> Result<Self> {
        use std::os::unix::fs::OpenOptionsExt;

        let file = std::fs::OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|e| PtuError::input_unavailable(path, e))?;
        debug!("Opened joystick {}", path.display());
        Ok(Self { file, path: path.to_path_buf() })
    }

    #[cfg(not(target_os = "linux"))]
    pub fn open(path: &Path) -> Result<Self> {
        Err(PtuError::input_unavailable(
            path,
            std::io::Error::new(std::io::ErrorKind::Unsupported, "joystick input requires Linux"),
        ))
    }

    /// Wait until the device is readable or `timeout` elapses.
    #[cfg(target_os = "linux")]
    fn wait_readable(&self, timeout: Duration) -> std::io::Result<bool> {
        use std::os::fd::AsRawFd;

        let mut pfd = libc::pollfd { fd: self.file.as_raw_fd(), events: libc::POLLIN, revents: 0 };
        let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

        // SAFETY: pfd is a valid pollfd for the duration of the call and nfds is 1.
        let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(err);
        }
        Ok(rc > 0)
    }

    #[cfg(not(target_os = "linux"))]
    fn wait_readable(&self, timeout: Duration) -> std::io::Result<bool> {
        std::thread::sleep(timeout);
        Ok(false)
    }
}

impl InputDevice for JoystickDevice {
    fn next_event(&mut self, timeout: Duration) -> Result<Option<InputEvent>> {
        use std::io::Read;

        if !self.wait_readable(timeout)? {
            return Ok(None);
        }

        let mut raw = [0u8; JS_EVENT_SIZE];
        match self.file.read_exact(&mut raw) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(None),
            Err(e) => return Err(PtuError::input_unavailable(&self.path, e)),
        }

        let event = decode_js_event(&raw);
        trace!(?event, "Joystick event");
        Ok(event)
    }
}
