//! Synthetic test-pattern source
//!
//! Generates raw I420 equirectangular frames at the negotiated interval on a
//! dedicated thread. The pattern scrolls horizontally with the sequence number
//! and carries a grid, so panning the viewport is visible without a camera.
//! A single internal buffer is reused for every frame, exactly like a device
//! driver recycling its transfer buffers.

use std::thread::{self, JoinHandle};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Encoding, Frame, FrameCallback, FrameSource, StreamFormat, StreamMode, StreamProvider};
use crate::{PtuError, Result, StreamStage};

/// Grid spacing of the test pattern in pixels.
const GRID_SPACING: usize = 240;
/// Horizontal scroll per frame in pixels.
const SCROLL_PER_FRAME: usize = 4;

/// Provider of [`SyntheticSource`] sessions.
#[derive(Debug, Clone)]
pub struct SyntheticProvider {
    paced: bool,
}

impl Default for SyntheticProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticProvider {
    /// Frames are paced at the stream's frame interval.
    pub fn new() -> Self {
        Self { paced: true }
    }

    /// Frames are delivered back-to-back without pacing.
    pub fn unpaced() -> Self {
        Self { paced: false }
    }
}

impl StreamProvider for SyntheticProvider {
    fn open(&mut self, mode: StreamMode) -> Result<Box<dyn FrameSource>> {
        info!(?mode, paced = self.paced, "Opening synthetic stream");
        Ok(Box::new(SyntheticSource::new(self.paced)))
    }
}

/// Test-pattern frame source.
pub struct SyntheticSource {
    paced: bool,
    format: Option<StreamFormat>,
    worker: Option<JoinHandle<u64>>,
    cancel: CancellationToken,
}

impl SyntheticSource {
    pub fn new(paced: bool) -> Self {
        Self { paced, format: None, worker: None, cancel: CancellationToken::new() }
    }
}

impl FrameSource for SyntheticSource {
    fn negotiate_format(&mut self, mode: StreamMode) -> Result<StreamFormat> {
        let format = StreamFormat::for_mode(mode, Encoding::RawI420);
        debug!(width = format.width, height = format.height, interval = format.interval.units(), "Negotiated synthetic format");
        self.format = Some(format);
        Ok(format)
    }

    fn start(&mut self, mut callback: FrameCallback) -> Result<()> {
        let format = self
            .format
            .ok_or_else(|| PtuError::stream_failed(StreamStage::Start, "format not negotiated"))?;
        if self.worker.is_some() {
            return Err(PtuError::stream_failed(StreamStage::Start, "stream already started"));
        }

        let cancel = self.cancel.clone();
        let paced = self.paced;
        let worker = thread::Builder::new()
            .name("synthetic-source".into())
            .spawn(move || {
                let width = format.width as usize;
                let height = format.height as usize;
                let period = format.interval.as_duration();
                let mut buffer = vec![0u8; width * height * 3 / 2];
                let mut sequence = 0u64;
                let mut deadline = Instant::now();

                while !cancel.is_cancelled() {
                    paint_test_pattern(&mut buffer, width, height, sequence);
                    callback(Frame::new(&buffer, sequence));
                    sequence += 1;

                    if paced {
                        deadline += period;
                        if let Some(wait) = deadline.checked_duration_since(Instant::now()) {
                            thread::sleep(wait);
                        }
                    }
                }
                sequence
            })
            .map_err(|e| {
                PtuError::stream_failed_with_source(StreamStage::Start, "failed to spawn source thread", e)
            })?;

        self.worker = Some(worker);
        info!("Synthetic stream started");
        Ok(())
    }

    fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(frames) => info!("Synthetic stream stopped after {} frames", frames),
                Err(_) => warn!("Synthetic source thread panicked"),
            }
        }
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Paint one I420 test-pattern frame into `buffer`.
///
/// `buffer` must hold at least `width * height * 3 / 2` bytes.
pub fn paint_test_pattern(buffer: &mut [u8], width: usize, height: usize, sequence: u64) {
    if width == 0 || height == 0 {
        return;
    }
    let (luma, chroma) = buffer.split_at_mut(width * height);
    let shift = (sequence as usize).wrapping_mul(SCROLL_PER_FRAME) % width;

    for (y, row) in luma.chunks_exact_mut(width).enumerate() {
        let on_grid_row = y % GRID_SPACING == 0;
        for (x, px) in row.iter_mut().enumerate() {
            let column = (x + shift) % width;
            *px = if on_grid_row || column % GRID_SPACING == 0 {
                235
            } else {
                16 + (column * 200 / width) as u8
            };
        }
    }
    chroma.fill(128);
}
