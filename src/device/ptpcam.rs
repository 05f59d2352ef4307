//! Camera control through the external `ptpcam` tool
//!
//! PTP command encoding and USB transport stay inside `ptpcam`; this backend
//! only runs it and reads its text output. The [`DeviceHandle`] calls have no
//! error channel, so command failures are logged and read as "not ready",
//! which lets the readiness budget decide when to give up.

use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, trace, warn};

use super::DeviceHandle;
use crate::{PtuError, Result};

/// Power state property; non-zero while the camera sleeps.
const PROP_SLEEP_STATE: u16 = 0xD80E;
/// Capture mode property.
const PROP_CAPTURE_MODE: u16 = 0x5013;
/// Capture mode value for live streaming.
const CAPTURE_MODE_LIVE: u32 = 0x8005;

/// Camera driven by `ptpcam` subprocesses.
#[derive(Debug, Clone)]
pub struct PtpcamDevice {
    program: PathBuf,
    name: String,
}

impl PtpcamDevice {
    /// `name` is matched against the model column of `ptpcam --list-devices`.
    pub fn new(program: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self { program: program.into(), name: name.into() }
    }

    fn run(&self, args: &[String]) -> Result<String> {
        let command = format!("{} {}", self.program.display(), args.join(" "));
        trace!(%command, "Running ptpcam");

        let output = Command::new(&self.program).args(args).output().map_err(|e| PtuError::DeviceCommand {
            command: command.clone(),
            reason: "failed to spawn".into(),
            source: Some(e),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PtuError::device_command(command, format!("{} {}", output.status, stderr.trim())));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn read_property(&self, property: u16) -> Result<u32> {
        let stdout = self.run(&[format!("--show-property=0x{property:04X}")])?;
        parse_property_value(&stdout).ok_or_else(|| {
            PtuError::device_command(format!("show-property 0x{property:04X}"), "no value in ptpcam output")
        })
    }

    fn write_property(&self, property: u16, value: u32) -> Result<()> {
        self.run(&[format!("--set-property=0x{property:04X}"), format!("--val=0x{value:X}")]).map(|_| ())
    }
}

impl DeviceHandle for PtpcamDevice {
    fn detect(&mut self) -> bool {
        match self.run(&["--list-devices".to_string()]) {
            Ok(listing) => {
                let found = listing.lines().any(|line| line.contains(&self.name));
                debug!(found, "Scanned USB for {}", self.name);
                found
            }
            Err(e) => {
                warn!("Device scan failed: {}", e);
                false
            }
        }
    }

    fn is_sleeping(&mut self) -> bool {
        match self.read_property(PROP_SLEEP_STATE) {
            Ok(value) => value != 0,
            Err(e) => {
                warn!("Could not read sleep state, assuming asleep: {}", e);
                true
            }
        }
    }

    fn wake_up(&mut self) {
        if let Err(e) = self.write_property(PROP_SLEEP_STATE, 0) {
            warn!("Wake-up command failed: {}", e);
        }
    }

    fn is_in_streaming_mode(&mut self) -> bool {
        match self.read_property(PROP_CAPTURE_MODE) {
            Ok(value) => value == CAPTURE_MODE_LIVE,
            Err(e) => {
                warn!("Could not read capture mode: {}", e);
                false
            }
        }
    }

    fn switch_to_streaming_mode(&mut self) {
        if let Err(e) = self.write_property(PROP_CAPTURE_MODE, CAPTURE_MODE_LIVE) {
            warn!("Mode switch command failed: {}", e);
        }
    }
}

/// Extract the property value from `ptpcam --show-property` output.
///
/// Accepts lines such as `'Capture Mode' is set to: 0x8005` or
/// `Current value: 32773`; the last matching line wins.
pub fn parse_property_value(output: &str) -> Option<u32> {
    output
        .lines()
        .filter(|line| {
            let lower = line.to_ascii_lowercase();
            lower.contains("set to") || lower.contains("value")
        })
        .filter_map(|line| line.rsplit(':').next())
        .filter_map(|raw| parse_number(raw.trim().trim_matches(['[', ']', '\''])))
        .last()
}

fn parse_number(raw: &str) -> Option<u32> {
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_set_to_line() {
        let output = "Camera: RICOH THETA V\n'Still Capture Mode' is set to: 0x8005\n";
        assert_eq!(parse_property_value(output), Some(CAPTURE_MODE_LIVE));
    }

    #[test]
    fn parses_decimal_value_line() {
        assert_eq!(parse_property_value("Current value: 1"), Some(1));
        assert_eq!(parse_property_value("value: [0]"), Some(0));
    }

    #[test]
    fn missing_value_is_none() {
        assert_eq!(parse_property_value("ERROR: Could not open session!"), None);
        assert_eq!(parse_property_value("is set to: unknown"), None);
    }

    #[test]
    fn missing_program_reads_as_not_ready() {
        let mut device = PtpcamDevice::new("/nonexistent/ptpcam", "RICOH THETA V");
        assert!(!device.detect());
        assert!(device.is_sleeping());
        assert!(!device.is_in_streaming_mode());
        device.wake_up();
        device.switch_to_streaming_mode();
    }

    #[test]
    fn spawn_failure_is_device_command_error() {
        let device = PtpcamDevice::new("/nonexistent/ptpcam", "RICOH THETA V");
        let error = device.read_property(PROP_CAPTURE_MODE).unwrap_err();
        assert!(matches!(error, PtuError::DeviceCommand { source: Some(_), .. }));
        assert!(!error.is_fatal());
    }
}
