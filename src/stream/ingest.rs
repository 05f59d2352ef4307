//! Frame ingestion: device callback to timestamped sink buffer

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{trace, warn};

use super::{Frame, FrameCallback, FrameInterval, StreamFormat};
use crate::PtuError;
use crate::media::{FlowStatus, MediaSink, TimestampedBuffer};

/// Converts device time units (100 ns) into pipeline nanoseconds.
pub const DEFAULT_SCALE_FACTOR: u64 = 100;

/// Push counters shared between the ingestion callback and the session.
#[derive(Debug, Default)]
pub struct IngestStats {
    pushed: AtomicU64,
    dropped: AtomicU64,
}

impl IngestStats {
    /// Frames accepted by the sink
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Frames the sink rejected
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Derive the sink buffer for a frame.
///
/// Copies the frame bytes into a buffer of exactly `byte_length` bytes and
/// stamps it with `pts = sequence * interval * scale`,
/// `duration = interval * scale` and `offset = sequence`. No decode
/// timestamp is set.
pub fn timestamp_frame(frame: &Frame<'_>, interval: FrameInterval, scale_factor: u64) -> TimestampedBuffer {
    let duration = interval.units().saturating_mul(scale_factor);
    TimestampedBuffer {
        data: frame.data.to_vec(),
        pts: frame.sequence.saturating_mul(duration),
        dts: None,
        duration,
        offset: frame.sequence,
    }
}

/// Bridges source callbacks to [`MediaSink::push`].
///
/// One buffer is in flight per callback; pushes happen in delivery order and
/// nothing is reordered or queued. A rejected push drops the frame: a stale
/// video frame is not worth retrying.
pub struct FrameIngest {
    sink: Arc<dyn MediaSink>,
    interval: FrameInterval,
    scale_factor: u64,
    last_sequence: Option<u64>,
    stats: Arc<IngestStats>,
}

impl FrameIngest {
    pub fn new(sink: Arc<dyn MediaSink>, format: &StreamFormat, scale_factor: u64) -> Self {
        Self {
            sink,
            interval: format.interval,
            scale_factor,
            last_sequence: None,
            stats: Arc::new(IngestStats::default()),
        }
    }

    /// Shared push counters
    pub fn stats(&self) -> Arc<IngestStats> {
        Arc::clone(&self.stats)
    }

    /// Handle one frame from the source.
    pub fn on_frame(&mut self, frame: Frame<'_>) {
        if let Some(last) = self.last_sequence {
            if frame.sequence <= last {
                // Pushed as-is; timestamps follow the device's sequence.
                warn!(sequence = frame.sequence, last, "Frame sequence went backwards");
            }
        }
        self.last_sequence = Some(frame.sequence);

        let buffer = timestamp_frame(&frame, self.interval, self.scale_factor);
        let pts = buffer.pts;

        match self.sink.push(buffer) {
            FlowStatus::Ok => {
                self.stats.pushed.fetch_add(1, Ordering::Relaxed);
                trace!(sequence = frame.sequence, pts, bytes = frame.byte_length(), "Frame pushed");
            }
            FlowStatus::Error => {
                let dropped = self.stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(dropped, "{}, frame dropped", PtuError::FramePush { sequence: frame.sequence });
            }
        }
    }

    /// Turn this ingest into a source callback.
    pub fn into_callback(mut self) -> FrameCallback {
        Box::new(move |frame: Frame<'_>| self.on_frame(frame))
    }
}
