//! Streaming collaborator boundary and frame types.
//!
//! A [`StreamProvider`] opens a [`FrameSource`] for a given [`StreamMode`].
//! The source negotiates a [`StreamFormat`] and then delivers [`Frame`]s to a
//! registered callback on a thread it owns. The frame borrows the source's
//! memory: the slice is only valid for the duration of the callback, which is
//! why [`FrameIngest`] copies it out before handing it downstream.

mod ingest;
mod synthetic;

pub use ingest::{DEFAULT_SCALE_FACTOR, FrameIngest, IngestStats, timestamp_frame};
pub use synthetic::{SyntheticProvider, SyntheticSource, paint_test_pattern};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Device time units per second (the camera reports intervals in 100 ns units).
pub const DEVICE_UNITS_PER_SECOND: u64 = 10_000_000;

/// Frame interval of the 29.97 fps stream modes, in device units.
const NTSC_FRAME_INTERVAL: u64 = 333_667;

/// Live stream modes offered by the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// 3840x1920 equirectangular at 29.97 fps
    #[default]
    Uhd2997,
    /// 1920x960 equirectangular at 29.97 fps
    Fhd2997,
}

impl StreamMode {
    /// Full frame size as `(width, height)`.
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            StreamMode::Uhd2997 => (3840, 1920),
            StreamMode::Fhd2997 => (1920, 960),
        }
    }

    /// Nominal frame interval for this mode.
    pub fn frame_interval(self) -> FrameInterval {
        match self {
            StreamMode::Uhd2997 | StreamMode::Fhd2997 => FrameInterval(NTSC_FRAME_INTERVAL),
        }
    }
}

/// Time between two frames in device units (100 ns).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameInterval(pub u64);

impl FrameInterval {
    /// Raw device units.
    pub fn units(self) -> u64 {
        self.0
    }

    /// Frame rate as a `(numerator, denominator)` fraction.
    pub fn framerate(self) -> (u64, u64) {
        (DEVICE_UNITS_PER_SECOND, self.0.max(1))
    }

    /// Wall-clock duration of one frame.
    pub fn as_duration(self) -> std::time::Duration {
        std::time::Duration::from_nanos(self.0.saturating_mul(100))
    }
}

/// Payload encoding delivered by a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// H.264 byte-stream access units (camera live stream)
    H264,
    /// Planar I420 raw video (synthetic test pattern)
    RawI420,
}

/// Stream format agreed between the source and the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub mode: StreamMode,
    pub width: u32,
    pub height: u32,
    pub interval: FrameInterval,
    pub encoding: Encoding,
}

impl StreamFormat {
    /// Format for a stream mode at its nominal geometry and interval.
    pub fn for_mode(mode: StreamMode, encoding: Encoding) -> Self {
        let (width, height) = mode.dimensions();
        Self { mode, width, height, interval: mode.frame_interval(), encoding }
    }
}

/// One unit delivered by the source.
///
/// `data` is owned by the source and invalidated as soon as the callback
/// returns; the lifetime keeps it from escaping.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub data: &'a [u8],
    /// Monotonic counter assigned by the device
    pub sequence: u64,
}

impl<'a> Frame<'a> {
    pub fn new(data: &'a [u8], sequence: u64) -> Self {
        Self { data, sequence }
    }

    pub fn byte_length(&self) -> usize {
        self.data.len()
    }
}

/// Callback invoked by a source for every frame, on a source-owned thread.
pub type FrameCallback = Box<dyn for<'a> FnMut(Frame<'a>) + Send + 'static>;

/// An open streaming session.
pub trait FrameSource: Send {
    /// Agree on the stream format for `mode`.
    fn negotiate_format(&mut self, mode: StreamMode) -> Result<StreamFormat>;

    /// Start delivering frames to `callback`.
    ///
    /// Frames arrive in increasing `sequence` order on a thread owned by the
    /// source. The callback must return quickly: it stalls frame delivery.
    fn start(&mut self, callback: FrameCallback) -> Result<()>;

    /// Stop delivery and release the session. Idempotent.
    fn stop(&mut self);
}

/// Opens streaming sessions.
pub trait StreamProvider: Send {
    fn open(&mut self, mode: StreamMode) -> Result<Box<dyn FrameSource>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uhd_mode_geometry() {
        assert_eq!(StreamMode::Uhd2997.dimensions(), (3840, 1920));
        assert_eq!(StreamMode::Fhd2997.dimensions(), (1920, 960));
    }

    #[test]
    fn ntsc_interval_is_about_thirty_fps() {
        let interval = StreamMode::Uhd2997.frame_interval();
        assert_eq!(interval.units(), 333_667);

        let (num, den) = interval.framerate();
        let fps = num as f64 / den as f64;
        assert!((fps - 29.97).abs() < 0.01, "fps was {fps}");

        assert_eq!(interval.as_duration().as_nanos(), 33_366_700);
    }

    #[test]
    fn format_for_mode_uses_mode_geometry() {
        let format = StreamFormat::for_mode(StreamMode::Fhd2997, Encoding::H264);
        assert_eq!((format.width, format.height), (1920, 960));
        assert_eq!(format.interval, FrameInterval(333_667));
        assert_eq!(format.encoding, Encoding::H264);
    }

    #[test]
    fn stream_mode_yaml_names() {
        let mode: StreamMode = serde_yaml_ng::from_str("fhd2997").expect("parse mode");
        assert_eq!(mode, StreamMode::Fhd2997);
        assert_eq!(StreamMode::default(), StreamMode::Uhd2997);
    }
}
