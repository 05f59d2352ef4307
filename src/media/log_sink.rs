//! Logging sink used when no display pipeline is available

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, trace};

use super::{BusSender, CropWindow, FlowStatus, MediaSink, SinkProvider, TimestampedBuffer};
use crate::Result;
use crate::stream::StreamFormat;

/// Builds [`LogSink`]s.
#[derive(Debug, Default, Clone)]
pub struct LogSinkProvider;

impl SinkProvider for LogSinkProvider {
    fn build(&mut self, format: &StreamFormat, _bus: BusSender) -> Result<Arc<dyn MediaSink>> {
        Ok(Arc::new(LogSink::new(*format)))
    }
}

/// Sink that accepts every buffer while playing and logs throughput and crops.
///
/// It never ends the stream on its own; the session runs until shutdown.
#[derive(Debug)]
pub struct LogSink {
    format: StreamFormat,
    crop: Mutex<CropWindow>,
    playing: AtomicBool,
    buffers: AtomicU64,
    bytes: AtomicU64,
}

impl LogSink {
    pub fn new(format: StreamFormat) -> Self {
        Self {
            format,
            crop: Mutex::new(CropWindow::default()),
            playing: AtomicBool::new(false),
            buffers: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }

    /// Buffers accepted so far
    pub fn buffers(&self) -> u64 {
        self.buffers.load(Ordering::Relaxed)
    }

    /// Payload bytes accepted so far
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

impl MediaSink for LogSink {
    fn start(&self) -> Result<()> {
        self.playing.store(true, Ordering::Release);
        info!(width = self.format.width, height = self.format.height, encoding = ?self.format.encoding, "Log sink playing");
        Ok(())
    }

    fn push(&self, buffer: TimestampedBuffer) -> FlowStatus {
        if !self.playing.load(Ordering::Acquire) {
            return FlowStatus::Error;
        }
        let count = self.buffers.fetch_add(1, Ordering::Relaxed) + 1;
        self.bytes.fetch_add(buffer.data.len() as u64, Ordering::Relaxed);
        trace!(offset = buffer.offset, pts = buffer.pts, "Buffer accepted");

        // Roughly once a second at 29.97 fps
        if count % 30 == 0 {
            let crop = self.crop();
            debug!(
                buffers = count,
                pts_ms = buffer.pts / 1_000_000,
                left = crop.left,
                top = crop.top,
                right = crop.right,
                bottom = crop.bottom,
                "Log sink progress"
            );
        }
        FlowStatus::Ok
    }

    fn set_crop(&self, crop: CropWindow) {
        let mut current = self.crop.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != crop {
            trace!(?crop, "Crop window updated");
        }
        *current = crop;
    }

    fn crop(&self) -> CropWindow {
        *self.crop.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop(&self) -> Result<()> {
        if self.playing.swap(false, Ordering::AcqRel) {
            info!("Log sink stopped after {} buffers ({} bytes)", self.buffers(), self.bytes());
        }
        Ok(())
    }
}
