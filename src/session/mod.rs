//! Session orchestration
//!
//! A [`Session`] owns the lifecycle of one streaming run:
//!
//! 1. Drive the camera into streaming mode (blocking, bounded retries).
//! 2. Open the frame source and negotiate the stream format.
//! 3. Build the media sink for that format and wire frame ingestion into it.
//! 4. Start the sink, then the source, then the viewport thread.
//! 5. Wait for end-of-stream, a pipeline error, or shutdown.
//! 6. Tear down in order: stop the sink, cancel and join the viewport thread,
//!    stop the source, release the sink.
//!
//! Fatal errors after the source was opened still run the matching part of
//! the teardown before they are returned.

#[cfg(test)]
mod tests;

use std::future::Future;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{DeviceBackend, PtuConfig, SinkBackend};
use crate::device::{DeviceHandle, DeviceState, ReadinessController, Ready, open_device};
use crate::input::{InputProvider, JoystickProvider};
use crate::media::{LogSinkProvider, MediaSink, PipelineMessage, SinkProvider, pipeline_bus};
use crate::stream::{FrameIngest, FrameSource, StreamFormat, StreamProvider, SyntheticProvider};
use crate::viewport::{Viewport, ViewportController, ViewportGeometry, ViewportOffset, ViewportSummary};
use crate::{PtuError, Result};

/// External collaborators of a session.
pub struct Collaborators {
    pub device: Box<dyn DeviceHandle>,
    pub streams: Box<dyn StreamProvider>,
    pub sinks: Box<dyn SinkProvider>,
    pub input: Arc<dyn InputProvider>,
}

impl Collaborators {
    /// Collaborators selected by `config`.
    ///
    /// Frames come from the synthetic test-pattern source; camera video
    /// transport plugs in through [`StreamProvider`].
    pub fn from_config(config: &PtuConfig) -> Result<Self> {
        if config.device.backend == DeviceBackend::Ptpcam {
            warn!("ptpcam controls camera readiness only; video frames are synthetic");
        }

        let sinks: Box<dyn SinkProvider> = match config.sink.backend {
            SinkBackend::Log => Box::new(LogSinkProvider),
            #[cfg(feature = "gstreamer")]
            SinkBackend::Gstreamer => Box::new(crate::media::GstSinkProvider::new(&config.sink.video_sink)),
            #[cfg(not(feature = "gstreamer"))]
            SinkBackend::Gstreamer => {
                return Err(PtuError::config("sink.backend 'gstreamer' requires the gstreamer feature"));
            }
        };

        Ok(Self {
            device: open_device(&config.device),
            streams: Box::new(SyntheticProvider::new()),
            sinks,
            input: Arc::new(JoystickProvider::new(&config.viewport.joystick)),
        })
    }
}

/// Why the event loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    EndOfStream,
    Shutdown,
}

/// Summary of a completed session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub end: SessionEnd,
    pub ready: Ready,
    /// Readiness state the camera was left in
    pub device_state: DeviceState,
    pub format: StreamFormat,
    pub frames_pushed: u64,
    pub frames_dropped: u64,
    /// `None` if the viewport thread could not be started or panicked
    pub viewport: Option<ViewportSummary>,
}

/// One streaming run from camera wake-up to teardown.
pub struct Session {
    config: PtuConfig,
    parts: Collaborators,
}

impl Session {
    pub fn new(config: PtuConfig, parts: Collaborators) -> Self {
        Self { config, parts }
    }

    /// Run until end-of-stream, a fatal error, or Ctrl-C.
    pub async fn run(self) -> Result<SessionReport> {
        self.run_until(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Interrupt received, shutting down"),
                Err(e) => {
                    warn!("Cannot listen for Ctrl-C: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        })
        .await
    }

    /// Run until end-of-stream, a fatal error, or `shutdown` completes.
    pub async fn run_until<F>(self, shutdown: F) -> Result<SessionReport>
    where
        F: Future<Output = ()>,
    {
        let Session { config, parts } = self;
        let Collaborators { device, mut streams, mut sinks, input } = parts;
        config.validate()?;

        let (_device, ready, device_state) = reach_streaming_state(device, config.device.max_retries).await?;

        let mode = config.stream.mode;
        info!(?mode, "Opening frame stream");
        let mut source = streams.open(mode)?;
        let format = match source.negotiate_format(mode) {
            Ok(format) => format,
            Err(e) => return Err(abort_source(source, e)),
        };
        info!(
            width = format.width,
            height = format.height,
            interval = format.interval.units(),
            encoding = ?format.encoding,
            "Stream format negotiated"
        );

        let viewport = match build_viewport(&config, &format) {
            Ok(viewport) => viewport,
            Err(e) => return Err(abort_source(source, e)),
        };

        let (bus_sender, mut bus) = pipeline_bus();
        let sink = match sinks.build(&format, bus_sender) {
            Ok(sink) => sink,
            Err(e) => return Err(abort_source(source, e)),
        };

        let ingest = FrameIngest::new(Arc::clone(&sink), &format, config.stream.scale_factor);
        let stats = ingest.stats();

        if let Err(e) = sink.start() {
            stop_sink(sink.as_ref());
            return Err(abort_source(source, e));
        }
        if let Err(e) = source.start(ingest.into_callback()) {
            stop_sink(sink.as_ref());
            return Err(abort_source(source, e));
        }
        info!("Streaming started");

        let cancel = CancellationToken::new();
        let controller = ViewportController::new(viewport, config.tick_period(), input, Arc::clone(&sink));
        let viewport_thread = match controller.spawn(cancel.clone()) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Viewport thread not started, continuing without viewport control: {}", e);
                None
            }
        };

        tokio::pin!(shutdown);
        let mut bus_open = true;
        let end = loop {
            tokio::select! {
                message = bus.recv(), if bus_open => match message {
                    Some(PipelineMessage::EndOfStream) => {
                        info!("End of stream");
                        break Ok(SessionEnd::EndOfStream);
                    }
                    Some(PipelineMessage::Error(message)) => {
                        error!("Pipeline error: {}", message);
                        break Err(PtuError::pipeline(message));
                    }
                    None => {
                        debug!("Sink does not report lifecycle events, waiting for shutdown");
                        bus_open = false;
                    }
                },
                _ = &mut shutdown => break Ok(SessionEnd::Shutdown),
            }
        };

        // Ordered teardown
        stop_sink(sink.as_ref());
        cancel.cancel();
        let viewport = join_viewport(viewport_thread).await;
        source.stop();
        drop(sink);

        let frames_pushed = stats.pushed();
        let frames_dropped = stats.dropped();
        info!(frames_pushed, frames_dropped, "Session ended");

        end.map(|end| SessionReport { end, ready, device_state, format, frames_pushed, frames_dropped, viewport })
    }
}

/// Run the readiness gate off the async worker; device calls block.
async fn reach_streaming_state(
    mut device: Box<dyn DeviceHandle>,
    max_retries: u32,
) -> Result<(Box<dyn DeviceHandle>, Ready, DeviceState)> {
    let (device, ready, state) = tokio::task::spawn_blocking(move || {
        let mut controller = ReadinessController::new(max_retries);
        let ready = controller.reach_streaming_state(device.as_mut());
        (device, ready, controller.state())
    })
    .await
    .map_err(|e| PtuError::pipeline_with_source("readiness task failed", e))?;

    match ready {
        Ok(ready) => Ok((device, ready, state)),
        Err(e) => {
            error!(%state, "Camera readiness failed: {}", e);
            Err(e)
        }
    }
}

/// Viewport over the negotiated frame, so clamping follows the real frame size.
fn build_viewport(config: &PtuConfig, format: &StreamFormat) -> Result<Viewport> {
    let view = &config.viewport;
    let geometry = ViewportGeometry::new(format.width, format.height, view.view_width, view.view_height)?;
    Ok(Viewport::new(geometry)
        .with_divisor(view.velocity_divisor)
        .with_offset(ViewportOffset::new(view.initial_x, view.initial_y)))
}

fn abort_source(mut source: Box<dyn FrameSource>, error: PtuError) -> PtuError {
    error!("Stream setup failed: {}", error);
    source.stop();
    error
}

fn stop_sink(sink: &dyn MediaSink) {
    if let Err(e) = sink.stop() {
        warn!("Media sink did not stop cleanly: {}", e);
    }
}

async fn join_viewport(handle: Option<JoinHandle<ViewportSummary>>) -> Option<ViewportSummary> {
    let handle = handle?;
    match tokio::task::spawn_blocking(move || handle.join()).await {
        Ok(Ok(summary)) => Some(summary),
        Ok(Err(_)) => {
            warn!("Viewport thread panicked");
            None
        }
        Err(e) => {
            warn!("Could not join viewport thread: {}", e);
            None
        }
    }
}
