//! Viewport control loop
//!
//! Runs on a dedicated thread for the lifetime of the session. Each iteration
//! waits up to one tick for an input event, integrates the stick velocity,
//! clamps and publishes the crop window to the sink. Cancellation is observed
//! once per tick.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Viewport, ViewportOffset};
use crate::input::InputProvider;
use crate::media::MediaSink;

/// Outcome of a viewport run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewportSummary {
    /// False when no input device could be opened
    pub enabled: bool,
    /// Integration steps performed, one crop publication each
    pub ticks: u64,
    pub final_offset: ViewportOffset,
}

/// Drives a [`Viewport`] from an input device and publishes crops to a sink.
pub struct ViewportController {
    viewport: Viewport,
    tick: Duration,
    input: Arc<dyn InputProvider>,
    sink: Arc<dyn MediaSink>,
}

impl ViewportController {
    pub fn new(
        viewport: Viewport,
        tick: Duration,
        input: Arc<dyn InputProvider>,
        sink: Arc<dyn MediaSink>,
    ) -> Self {
        Self { viewport, tick, input, sink }
    }

    /// Run the loop on a named thread until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> io::Result<JoinHandle<ViewportSummary>> {
        thread::Builder::new().name("viewport".into()).spawn(move || self.run(&cancel))
    }

    /// Run the loop on the current thread until `cancel` fires.
    ///
    /// Publishes the initial crop before opening the input device, so the
    /// sink shows the starting window even without a joystick.
    pub fn run(mut self, cancel: &CancellationToken) -> ViewportSummary {
        self.sink.set_crop(self.viewport.crop());

        let mut device = match self.input.open() {
            Ok(device) => device,
            Err(e) => {
                warn!("Viewport control disabled: {} ({})", self.input.describe(), e);
                return self.summary(false, 0);
            }
        };
        info!(tick_ms = self.tick.as_millis() as u64, "Viewport control started on {}", self.input.describe());

        let mut ticks = 0u64;
        while !cancel.is_cancelled() {
            match device.next_event(self.tick) {
                Ok(Some(event)) => self.viewport.apply_event(&event),
                Ok(None) => {}
                Err(e) => {
                    warn!("Input device failed, viewport control stopped: {}", e);
                    break;
                }
            }

            let crop = self.viewport.tick();
            self.sink.set_crop(crop);
            ticks += 1;
        }

        let summary = self.summary(true, ticks);
        debug!(ticks, x = summary.final_offset.x, y = summary.final_offset.y, "Viewport control ended");
        summary
    }

    fn summary(&self, enabled: bool, ticks: u64) -> ViewportSummary {
        ViewportSummary { enabled, ticks, final_offset: self.viewport.offset() }
    }
}
