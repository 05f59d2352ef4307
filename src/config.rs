//! Runtime configuration
//!
//! Loaded from YAML; every field has a default so an empty file (or no file)
//! describes a THETA V driven through `ptpcam`, streaming 4K into the log sink.
//!
//! ```yaml
//! device:
//!   backend: ptpcam
//!   name: RICOH THETA V
//! stream:
//!   mode: uhd2997
//! viewport:
//!   view_width: 640
//!   view_height: 480
//! sink:
//!   backend: gstreamer
//!   video_sink: autovideosink
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::device::DEFAULT_MAX_RETRIES;
use crate::stream::{DEFAULT_SCALE_FACTOR, StreamMode};
use crate::viewport::DEFAULT_VELOCITY_DIVISOR;
use crate::{PtuError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PtuConfig {
    pub device: DeviceConfig,
    pub stream: StreamConfig,
    pub viewport: ViewportConfig,
    pub sink: SinkConfig,
}

/// Camera control backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceBackend {
    Simulated,
    #[default]
    Ptpcam,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    pub backend: DeviceBackend,
    /// Model name matched during detection
    pub name: String,
    /// Corrective attempts per readiness phase
    pub max_retries: u32,
    pub ptpcam_path: PathBuf,
    pub simulated: SimulatedDeviceConfig,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            backend: DeviceBackend::Ptpcam,
            name: "RICOH THETA V".to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            ptpcam_path: PathBuf::from("ptpcam"),
            simulated: SimulatedDeviceConfig::default(),
        }
    }
}

/// Start state of the simulated camera.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulatedDeviceConfig {
    pub present: bool,
    pub asleep: bool,
    pub streaming: bool,
    pub wake_attempts_needed: u32,
    pub mode_attempts_needed: u32,
}

impl Default for SimulatedDeviceConfig {
    fn default() -> Self {
        Self { present: true, asleep: false, streaming: true, wake_attempts_needed: 1, mode_attempts_needed: 1 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
    pub mode: StreamMode,
    /// Device time unit to nanosecond multiplier
    pub scale_factor: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { mode: StreamMode::default(), scale_factor: DEFAULT_SCALE_FACTOR }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ViewportConfig {
    pub view_width: u32,
    pub view_height: u32,
    pub tick_ms: u64,
    pub velocity_divisor: i32,
    pub joystick: PathBuf,
    pub initial_x: i64,
    pub initial_y: i64,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            view_width: 640,
            view_height: 480,
            tick_ms: 16,
            velocity_divisor: DEFAULT_VELOCITY_DIVISOR,
            joystick: PathBuf::from("/dev/input/js0"),
            initial_x: 0,
            initial_y: 0,
        }
    }
}

/// Media sink backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkBackend {
    #[default]
    Log,
    Gstreamer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SinkConfig {
    pub backend: SinkBackend,
    /// GStreamer element rendering the cropped video
    pub video_sink: String,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self { backend: SinkBackend::Log, video_sink: "autovideosink".to_string() }
    }
}

impl PtuConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: PtuConfig = if yaml.trim().is_empty() {
            PtuConfig::default()
        } else {
            serde_yaml_ng::from_str(yaml).map_err(|e| PtuError::config_with_source("invalid YAML", e))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| PtuError::config_with_source(format!("cannot read {}", path.display()), e))?;
        Self::from_yaml_str(&yaml)
    }

    /// Reject settings that would fail only after the camera was opened.
    pub fn validate(&self) -> Result<()> {
        let (total_width, total_height) = self.stream.mode.dimensions();
        let viewport = &self.viewport;
        if viewport.view_width == 0
            || viewport.view_height == 0
            || viewport.view_width > total_width
            || viewport.view_height > total_height
        {
            return Err(PtuError::InvalidGeometry {
                total_width,
                total_height,
                view_width: viewport.view_width,
                view_height: viewport.view_height,
            });
        }
        if viewport.tick_ms == 0 {
            return Err(PtuError::config("viewport.tick_ms must be positive"));
        }
        if viewport.velocity_divisor <= 0 {
            return Err(PtuError::config("viewport.velocity_divisor must be positive"));
        }
        if self.stream.scale_factor == 0 {
            return Err(PtuError::config("stream.scale_factor must be positive"));
        }
        if self.device.name.trim().is_empty() {
            return Err(PtuError::config("device.name must not be empty"));
        }
        if self.sink.backend == SinkBackend::Gstreamer && !cfg!(feature = "gstreamer") {
            return Err(PtuError::config("sink.backend 'gstreamer' requires the gstreamer feature"));
        }
        Ok(())
    }

    /// Viewport tick period.
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.viewport.tick_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_is_default() {
        let config = PtuConfig::from_yaml_str("").unwrap();
        assert_eq!(config, PtuConfig::default());
        assert_eq!(config.device.backend, DeviceBackend::Ptpcam);
        assert_eq!(config.device.name, "RICOH THETA V");
        assert_eq!(config.device.max_retries, 3);
        assert_eq!(config.stream.scale_factor, 100);
        assert_eq!(config.tick_period(), Duration::from_millis(16));
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let yaml = "device:\n  backend: simulated\nstream:\n  mode: fhd2997\nviewport:\n  initial_x: 200\n";
        let config = PtuConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.device.backend, DeviceBackend::Simulated);
        assert_eq!(config.device.max_retries, 3);
        assert_eq!(config.stream.mode, StreamMode::Fhd2997);
        assert_eq!(config.viewport.initial_x, 200);
        assert_eq!(config.viewport.view_width, 640);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let error = PtuConfig::from_yaml_str("viewport:\n  zoom: 2\n").unwrap_err();
        assert!(matches!(error, PtuError::Config { .. }));
    }

    #[test]
    fn oversized_view_is_rejected() {
        let yaml = "stream:\n  mode: fhd2997\nviewport:\n  view_width: 2000\n";
        let error = PtuConfig::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(error, PtuError::InvalidGeometry { total_width: 1920, view_width: 2000, .. }));
    }

    #[test]
    fn zero_tick_and_divisor_are_rejected() {
        assert!(PtuConfig::from_yaml_str("viewport:\n  tick_ms: 0\n").is_err());
        assert!(PtuConfig::from_yaml_str("viewport:\n  velocity_divisor: 0\n").is_err());
        assert!(PtuConfig::from_yaml_str("stream:\n  scale_factor: 0\n").is_err());
    }

    #[cfg(not(feature = "gstreamer"))]
    #[test]
    fn gstreamer_sink_needs_feature() {
        assert!(PtuConfig::from_yaml_str("sink:\n  backend: gstreamer\n").is_err());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "viewport:\n  view_width: 1280\n  view_height: 720").unwrap();

        let config = PtuConfig::load(file.path()).unwrap();
        assert_eq!((config.viewport.view_width, config.viewport.view_height), (1280, 720));
    }

    #[test]
    fn missing_file_is_config_error() {
        let error = PtuConfig::load(Path::new("/nonexistent/virtualptu.yaml")).unwrap_err();
        assert!(matches!(error, PtuError::Config { .. }));
        assert!(error.is_fatal());
    }

    #[test]
    fn example_file_parses() {
        let config: PtuConfig = serde_yaml_ng::from_str(include_str!("../virtualptu.example.yaml")).unwrap();
        assert_eq!(config.device.backend, DeviceBackend::Ptpcam);
        assert_eq!(config.sink.backend, SinkBackend::Gstreamer);
        assert_eq!((config.viewport.initial_x, config.viewport.initial_y), (1600, 720));
    }

    #[test]
    fn round_trips_through_yaml() {
        let config = PtuConfig::default();
        let yaml = serde_yaml_ng::to_string(&config).unwrap();
        assert_eq!(PtuConfig::from_yaml_str(&yaml).unwrap(), config);
    }
}
