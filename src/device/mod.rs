//! Camera device boundary and readiness control
//!
//! [`DeviceHandle`] is the synchronous control surface of the camera: every
//! call blocks until the underlying USB/PTP exchange completes. The
//! [`ReadinessController`] drives a handle from unknown power/mode state to
//! streaming mode with bounded retries.
//!
//! Backends:
//! - [`SimulatedCamera`] - in-process camera for dry runs and tests
//! - [`PtpcamDevice`] - shells out to the `ptpcam` tool

mod ptpcam;
mod readiness;
mod simulated;

pub use ptpcam::{PtpcamDevice, parse_property_value};
pub use readiness::{DEFAULT_MAX_RETRIES, ReadinessController, Ready, RetryBudget};
pub use simulated::SimulatedCamera;

use std::fmt;

use crate::config::{DeviceBackend, DeviceConfig};

/// Synchronous camera control.
pub trait DeviceHandle: Send {
    /// Whether the camera is attached and answering.
    fn detect(&mut self) -> bool;

    fn is_sleeping(&mut self) -> bool;

    /// Ask the camera to leave sleep. May be a no-op if it is already awake.
    fn wake_up(&mut self);

    fn is_in_streaming_mode(&mut self) -> bool;

    /// Ask the camera to enter live-streaming mode.
    ///
    /// Some cameras re-enumerate on USB after this call.
    fn switch_to_streaming_mode(&mut self);
}

impl<D: DeviceHandle + ?Sized> DeviceHandle for Box<D> {
    fn detect(&mut self) -> bool {
        (**self).detect()
    }

    fn is_sleeping(&mut self) -> bool {
        (**self).is_sleeping()
    }

    fn wake_up(&mut self) {
        (**self).wake_up()
    }

    fn is_in_streaming_mode(&mut self) -> bool {
        (**self).is_in_streaming_mode()
    }

    fn switch_to_streaming_mode(&mut self) {
        (**self).switch_to_streaming_mode()
    }
}

/// Position of the readiness state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceState {
    Unknown,
    Detected,
    Asleep,
    Awake,
    NonStreaming,
    Streaming,
    Unreachable,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceState::Unknown => "unknown",
            DeviceState::Detected => "detected",
            DeviceState::Asleep => "asleep",
            DeviceState::Awake => "awake",
            DeviceState::NonStreaming => "non-streaming",
            DeviceState::Streaming => "streaming",
            DeviceState::Unreachable => "unreachable",
        };
        f.write_str(name)
    }
}

/// Build the device backend selected in `config`.
pub fn open_device(config: &DeviceConfig) -> Box<dyn DeviceHandle> {
    match config.backend {
        DeviceBackend::Simulated => Box::new(SimulatedCamera::from_config(config)),
        DeviceBackend::Ptpcam => Box::new(PtpcamDevice::new(&config.ptpcam_path, &config.name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_names() {
        assert_eq!(DeviceState::NonStreaming.to_string(), "non-streaming");
        assert_eq!(DeviceState::Asleep.to_string(), "asleep");
        assert_eq!(DeviceState::Unreachable.to_string(), "unreachable");
    }

    #[test]
    fn boxed_handles_forward() {
        let mut device: Box<dyn DeviceHandle> = Box::new(SimulatedCamera::new().asleep(1));
        assert!(device.detect());
        assert!(device.is_sleeping());
        device.wake_up();
        assert!(!device.is_sleeping());
    }

    #[test]
    fn default_config_drives_ptpcam() {
        let config = DeviceConfig { ptpcam_path: "/nonexistent/ptpcam".into(), ..DeviceConfig::default() };
        assert_eq!(config.backend, DeviceBackend::Ptpcam);
        let mut device = open_device(&config);
        assert!(!device.detect(), "no camera without a working ptpcam");
    }

    #[test]
    fn simulated_backend_is_opt_in() {
        let config = DeviceConfig { backend: DeviceBackend::Simulated, ..DeviceConfig::default() };
        let mut device = open_device(&config);
        assert!(device.detect());
    }
}
