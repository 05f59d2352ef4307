//! Media pipeline boundary
//!
//! A [`MediaSink`] owns the decode/render graph. It accepts
//! [`TimestampedBuffer`]s from frame ingestion, a [`CropWindow`] from the
//! viewport controller, and reports lifecycle events ([`PipelineMessage`]) on
//! a [`PipelineBus`] consumed by the session's event loop.
//!
//! The crop window is always exchanged as one value: a sink applies all four
//! edges together, so a renderer never sees a mix of old and new edges.

#[cfg(feature = "gstreamer")]
mod gst;
mod log_sink;

#[cfg(feature = "gstreamer")]
pub use gst::{GstSink, GstSinkProvider};
pub use log_sink::{LogSink, LogSinkProvider};

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::Result;
use crate::stream::StreamFormat;

/// A frame ready for the media pipeline, timestamps in nanoseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampedBuffer {
    /// Owned copy of the frame bytes
    pub data: Vec<u8>,
    /// Presentation timestamp
    pub pts: u64,
    /// Decode timestamp, if known
    pub dts: Option<u64>,
    pub duration: u64,
    /// Mirrors the frame sequence
    pub offset: u64,
}

/// Result of pushing a buffer into the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    Ok,
    Error,
}

/// Crop edges in source-frame pixels, applied as a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CropWindow {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl CropWindow {
    /// Width left visible inside a frame of `total_width`.
    pub fn visible_width(&self, total_width: u32) -> u32 {
        total_width.saturating_sub(self.left + self.right)
    }

    /// Height left visible inside a frame of `total_height`.
    pub fn visible_height(&self, total_height: u32) -> u32 {
        total_height.saturating_sub(self.top + self.bottom)
    }
}

/// Lifecycle events emitted by the media pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineMessage {
    EndOfStream,
    Error(String),
}

/// Sending half of a pipeline bus, held by the sink.
#[derive(Debug, Clone)]
pub struct BusSender(mpsc::UnboundedSender<PipelineMessage>);

impl BusSender {
    /// Post a lifecycle message. Returns false once the session stopped listening.
    pub fn post(&self, message: PipelineMessage) -> bool {
        self.0.send(message).is_ok()
    }
}

/// Receiving half of a pipeline bus, drained by the session event loop.
#[derive(Debug)]
pub struct PipelineBus(mpsc::UnboundedReceiver<PipelineMessage>);

impl PipelineBus {
    /// Next lifecycle message, or `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<PipelineMessage> {
        self.0.recv().await
    }
}

/// Create a connected bus pair.
pub fn pipeline_bus() -> (BusSender, PipelineBus) {
    let (tx, rx) = mpsc::unbounded_channel();
    (BusSender(tx), PipelineBus(rx))
}

/// Decode/display pipeline fed by ingestion and steered by the viewport.
///
/// `push` is called from the source's streaming thread, `set_crop` from the
/// viewport thread, everything else from the session.
pub trait MediaSink: Send + Sync {
    /// Bring the pipeline to playing.
    fn start(&self) -> Result<()>;

    /// Hand one buffer to the pipeline.
    fn push(&self, buffer: TimestampedBuffer) -> FlowStatus;

    /// Replace the crop window. All four edges take effect together.
    fn set_crop(&self, crop: CropWindow);

    /// Most recently requested crop window.
    fn crop(&self) -> CropWindow;

    /// Stop the pipeline. A stopped sink may reject further pushes.
    fn stop(&self) -> Result<()>;
}

/// Builds a sink for a negotiated stream format.
pub trait SinkProvider: Send {
    fn build(&mut self, format: &StreamFormat, bus: BusSender) -> Result<Arc<dyn MediaSink>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crop_visible_area() {
        let crop = CropWindow { left: 10, top: 0, right: 3190, bottom: 1440 };
        assert_eq!(crop.visible_width(3840), 640);
        assert_eq!(crop.visible_height(1920), 480);
    }

    #[tokio::test]
    async fn bus_delivers_in_order_then_closes() {
        let (tx, mut bus) = pipeline_bus();
        assert!(tx.post(PipelineMessage::Error("boom".into())));
        assert!(tx.post(PipelineMessage::EndOfStream));
        drop(tx);

        assert_eq!(bus.recv().await, Some(PipelineMessage::Error("boom".into())));
        assert_eq!(bus.recv().await, Some(PipelineMessage::EndOfStream));
        assert_eq!(bus.recv().await, None);
    }

    #[test]
    fn post_after_receiver_dropped_reports_false() {
        let (tx, bus) = pipeline_bus();
        drop(bus);
        assert!(!tx.post(PipelineMessage::EndOfStream));
    }
}
