//! Error types for the virtual PTU.
//!
//! Every failure the session can hit maps onto one [`PtuError`] variant. The
//! variants follow the session's failure taxonomy:
//!
//! - **Fatal**: device unreachable, stream open/negotiate failure, pipeline
//!   error, invalid configuration. These unwind to the session orchestrator,
//!   which tears everything down in order and exits non-zero.
//! - **Recoverable**: a rejected frame push, a missing joystick, a failed
//!   device command. These are handled where they happen and only logged.
//!
//! ```rust
//! use virtualptu::{PtuError, ReadinessPhase};
//!
//! let error = PtuError::DeviceUnreachable { phase: ReadinessPhase::Wake, attempts: 3 };
//! assert!(error.is_fatal());
//! assert!(error.to_string().contains("wake"));
//! for suggestion in error.recovery_suggestions() {
//!     println!("  - {}", suggestion);
//! }
//! ```

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for virtual PTU operations.
pub type Result<T, E = PtuError> = std::result::Result<T, E>;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Phase of the device readiness gate, named in operator-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadinessPhase {
    Detect,
    Wake,
    ModeSwitch,
}

impl fmt::Display for ReadinessPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReadinessPhase::Detect => "detect",
            ReadinessPhase::Wake => "wake",
            ReadinessPhase::ModeSwitch => "mode-switch",
        })
    }
}

/// Stage of opening the frame stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamStage {
    Open,
    Negotiate,
    Start,
}

impl fmt::Display for StreamStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StreamStage::Open => "open",
            StreamStage::Negotiate => "negotiate",
            StreamStage::Start => "start",
        })
    }
}

/// Main error type for the virtual PTU.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PtuError {
    #[error("Camera unreachable: {phase} failed after {attempts} attempt(s)")]
    DeviceUnreachable { phase: ReadinessPhase, attempts: u32 },

    #[error("Stream {stage} failed: {reason}")]
    StreamOpen {
        stage: StreamStage,
        reason: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("Media sink rejected frame {sequence}")]
    FramePush { sequence: u64 },

    #[error("Input device unavailable: {}", path.display())]
    InputUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Media pipeline error: {message}")]
    Pipeline {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("Configuration error: {reason}")]
    Config {
        reason: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error(
        "Viewport {view_width}x{view_height} does not fit inside frame {total_width}x{total_height}"
    )]
    InvalidGeometry { total_width: u32, total_height: u32, view_width: u32, view_height: u32 },

    #[error("Device command '{command}' failed: {reason}")]
    DeviceCommand {
        command: String,
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PtuError {
    /// Returns whether this error ends the session.
    ///
    /// Recoverable errors (rejected frames, missing joystick, a single failed
    /// device command) are logged at the point of detection and never
    /// propagate to the orchestrator.
    pub fn is_fatal(&self) -> bool {
        match self {
            PtuError::DeviceUnreachable { .. } => true,
            PtuError::StreamOpen { .. } => true,
            PtuError::FramePush { .. } => false,
            PtuError::InputUnavailable { .. } => false,
            PtuError::Pipeline { .. } => true,
            PtuError::Config { .. } => true,
            PtuError::InvalidGeometry { .. } => true,
            PtuError::DeviceCommand { .. } => false,
            PtuError::Io(_) => true,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            PtuError::DeviceUnreachable { phase: ReadinessPhase::Detect, .. } => vec![
                "Check the USB cable and that the camera is powered on",
                "Verify the configured device name matches the camera model",
                "Check USB permissions (udev rules) for the current user",
            ],
            PtuError::DeviceUnreachable { phase: ReadinessPhase::Wake, .. } => vec![
                "Press the camera's power button to wake it manually",
                "Increase device.max_retries for slow-waking cameras",
            ],
            PtuError::DeviceUnreachable { phase: ReadinessPhase::ModeSwitch, .. } => vec![
                "Switch the camera to live streaming mode manually",
                "Replug the camera: mode switches re-enumerate the USB device",
                "Increase device.max_retries for slow mode switches",
            ],
            PtuError::StreamOpen { .. } => vec![
                "Verify the camera supports the configured stream mode",
                "Check that no other process holds the video stream",
            ],
            PtuError::FramePush { .. } => vec![
                "Check downstream decoder load",
                "A dropped frame is expected under backpressure",
            ],
            PtuError::InputUnavailable { .. } => vec![
                "Connect a joystick or gamepad",
                "Check the configured joystick device path",
                "Check read permissions on the input device",
            ],
            PtuError::Pipeline { .. } => vec![
                "Check that the required GStreamer plugins are installed",
                "Run with GST_DEBUG=3 for pipeline diagnostics",
            ],
            PtuError::Config { .. } => vec![
                "Check the configuration file syntax",
                "Compare against virtualptu.example.yaml",
            ],
            PtuError::InvalidGeometry { .. } => vec![
                "Reduce viewport.view_width / viewport.view_height",
                "Pick a larger stream mode",
            ],
            PtuError::DeviceCommand { .. } => vec![
                "Check that ptpcam is installed and on PATH",
                "Check USB permissions for PTP access",
            ],
            PtuError::Io(_) => vec!["Check file permissions and available resources"],
        }
    }

    /// Helper constructor for stream open failures.
    pub fn stream_failed(stage: StreamStage, reason: impl Into<String>) -> Self {
        PtuError::StreamOpen { stage, reason: reason.into(), source: None }
    }

    /// Helper constructor for stream open failures with a source error.
    pub fn stream_failed_with_source(
        stage: StreamStage,
        reason: impl Into<String>,
        source: impl Into<BoxedSource>,
    ) -> Self {
        PtuError::StreamOpen { stage, reason: reason.into(), source: Some(source.into()) }
    }

    /// Helper constructor for pipeline errors.
    pub fn pipeline(message: impl Into<String>) -> Self {
        PtuError::Pipeline { message: message.into(), source: None }
    }

    /// Helper constructor for pipeline errors with a source error.
    pub fn pipeline_with_source(message: impl Into<String>, source: impl Into<BoxedSource>) -> Self {
        PtuError::Pipeline { message: message.into(), source: Some(source.into()) }
    }

    /// Helper constructor for configuration errors.
    pub fn config(reason: impl Into<String>) -> Self {
        PtuError::Config { reason: reason.into(), source: None }
    }

    /// Helper constructor for configuration errors with a source error.
    pub fn config_with_source(reason: impl Into<String>, source: impl Into<BoxedSource>) -> Self {
        PtuError::Config { reason: reason.into(), source: Some(source.into()) }
    }

    /// Helper constructor for a missing or unreadable input device.
    pub fn input_unavailable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PtuError::InputUnavailable { path: path.into(), source }
    }

    /// Helper constructor for failed external device commands.
    pub fn device_command(command: impl Into<String>, reason: impl Into<String>) -> Self {
        PtuError::DeviceCommand { command: command.into(), reason: reason.into(), source: None }
    }
}
