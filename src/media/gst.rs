//! GStreamer display sink
//!
//! Pipeline: `appsrc ! [h264parse ! avdec_h264 !] videoconvert ! videocrop !
//! videoconvert ! <video sink>`.
//!
//! Crop updates are staged and applied from a buffer probe on the crop
//! element's sink pad. The probe runs on the streaming thread right before a
//! buffer enters `videocrop`, so all four edges change between two frames and
//! never in the middle of one.

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{BusSender, CropWindow, FlowStatus, MediaSink, PipelineMessage, SinkProvider, TimestampedBuffer};
use crate::stream::{Encoding, StreamFormat};
use crate::{PtuError, Result};

/// Bus poll period of the watcher thread.
const BUS_POLL_MS: u64 = 100;

/// Builds [`GstSink`]s rendering to `video_sink`.
#[derive(Debug, Clone)]
pub struct GstSinkProvider {
    video_sink: String,
}

impl GstSinkProvider {
    pub fn new(video_sink: impl Into<String>) -> Self {
        Self { video_sink: video_sink.into() }
    }
}

impl SinkProvider for GstSinkProvider {
    fn build(&mut self, format: &StreamFormat, bus: BusSender) -> Result<Arc<dyn MediaSink>> {
        Ok(Arc::new(GstSink::new(format, &self.video_sink, bus)?))
    }
}

#[derive(Debug, Default)]
struct CropState {
    current: CropWindow,
    pending: Option<CropWindow>,
}

/// GStreamer-backed [`MediaSink`].
pub struct GstSink {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    crop: Arc<Mutex<CropState>>,
    bus: Mutex<Option<BusSender>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl GstSink {
    /// Build the pipeline for `format`; it stays in `Null` until [`MediaSink::start`].
    pub fn new(format: &StreamFormat, video_sink: &str, bus: BusSender) -> Result<Self> {
        gst::init().map_err(|e| PtuError::pipeline_with_source("GStreamer init failed", e))?;

        let description = pipeline_description(format, video_sink);
        debug!(%description, "Building pipeline");

        let pipeline = gst::parse::launch(&description)
            .map_err(|e| PtuError::pipeline_with_source("failed to parse pipeline", e))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| PtuError::pipeline("parsed element is not a pipeline"))?;

        let appsrc = pipeline
            .by_name("src")
            .ok_or_else(|| PtuError::pipeline("appsrc element not found"))?
            .downcast::<gst_app::AppSrc>()
            .map_err(|_| PtuError::pipeline("src element is not an appsrc"))?;
        appsrc.set_caps(Some(&caps_for(format)));
        appsrc.set_is_live(true);
        appsrc.set_format(gst::Format::Time);

        let crop_element =
            pipeline.by_name("crop").ok_or_else(|| PtuError::pipeline("videocrop element not found"))?;
        let pad = crop_element
            .static_pad("sink")
            .ok_or_else(|| PtuError::pipeline("videocrop has no sink pad"))?;

        let crop = Arc::new(Mutex::new(CropState::default()));
        let staged = Arc::clone(&crop);
        let element = crop_element.downgrade();
        let probe = pad.add_probe(gst::PadProbeType::BUFFER, move |_, _| {
            let pending = staged.lock().unwrap_or_else(PoisonError::into_inner).pending.take();
            if let (Some(window), Some(element)) = (pending, element.upgrade()) {
                apply_crop(&element, window);
            }
            gst::PadProbeReturn::Ok
        });
        if probe.is_none() {
            return Err(PtuError::pipeline("failed to install crop probe"));
        }

        Ok(Self {
            pipeline,
            appsrc,
            crop,
            bus: Mutex::new(Some(bus)),
            watcher: Mutex::new(None),
            cancel: CancellationToken::new(),
        })
    }
}

impl MediaSink for GstSink {
    fn start(&self) -> Result<()> {
        let bus = self.pipeline.bus().ok_or_else(|| PtuError::pipeline("pipeline has no bus"))?;
        if let Some(sender) = self.bus.lock().unwrap_or_else(PoisonError::into_inner).take() {
            let cancel = self.cancel.clone();
            let handle = thread::Builder::new()
                .name("gst-bus".into())
                .spawn(move || watch_bus(bus, sender, cancel))
                .map_err(|e| PtuError::pipeline_with_source("failed to spawn bus watcher", e))?;
            *self.watcher.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        }

        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| PtuError::pipeline_with_source("failed to set pipeline to Playing", e))?;
        info!("GStreamer pipeline playing");
        Ok(())
    }

    fn push(&self, buffer: TimestampedBuffer) -> FlowStatus {
        let TimestampedBuffer { data, pts, dts, duration, offset } = buffer;
        let mut gst_buffer = gst::Buffer::from_mut_slice(data);
        {
            let buffer_ref = gst_buffer.make_mut();
            buffer_ref.set_pts(gst::ClockTime::from_nseconds(pts));
            buffer_ref.set_dts(dts.map(gst::ClockTime::from_nseconds));
            buffer_ref.set_duration(gst::ClockTime::from_nseconds(duration));
            buffer_ref.set_offset(offset);
        }

        match self.appsrc.push_buffer(gst_buffer) {
            Ok(_) => FlowStatus::Ok,
            Err(flow) => {
                trace!(?flow, offset, "appsrc refused buffer");
                FlowStatus::Error
            }
        }
    }

    fn set_crop(&self, crop: CropWindow) {
        let mut state = self.crop.lock().unwrap_or_else(PoisonError::into_inner);
        state.current = crop;
        state.pending = Some(crop);
    }

    fn crop(&self) -> CropWindow {
        self.crop.lock().unwrap_or_else(PoisonError::into_inner).current
    }

    fn stop(&self) -> Result<()> {
        self.cancel.cancel();
        let result = self
            .pipeline
            .set_state(gst::State::Null)
            .map(|_| ())
            .map_err(|e| PtuError::pipeline_with_source("failed to set pipeline to Null", e));

        if let Some(handle) = self.watcher.lock().unwrap_or_else(PoisonError::into_inner).take() {
            if handle.join().is_err() {
                warn!("Bus watcher thread panicked");
            }
        }
        info!("GStreamer pipeline stopped");
        result
    }
}

impl Drop for GstSink {
    fn drop(&mut self) {
        self.cancel.cancel();
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

fn pipeline_description(format: &StreamFormat, video_sink: &str) -> String {
    let decode = match format.encoding {
        Encoding::H264 => "h264parse ! avdec_h264 ! ",
        Encoding::RawI420 => "",
    };
    format!("appsrc name=src ! {decode}videoconvert ! videocrop name=crop ! videoconvert ! {video_sink}")
}

fn caps_for(format: &StreamFormat) -> gst::Caps {
    match format.encoding {
        Encoding::H264 => gst::Caps::builder("video/x-h264")
            .field("stream-format", "byte-stream")
            .field("alignment", "au")
            .build(),
        Encoding::RawI420 => {
            let (num, den) = format.interval.framerate();
            gst::Caps::builder("video/x-raw")
                .field("format", "I420")
                .field("width", clamp_i32(format.width))
                .field("height", clamp_i32(format.height))
                .field("framerate", gst::Fraction::new(clamp_i32(num), clamp_i32(den)))
                .build()
        }
    }
}

fn apply_crop(element: &gst::Element, window: CropWindow) {
    element.set_property("left", clamp_i32(window.left));
    element.set_property("top", clamp_i32(window.top));
    element.set_property("right", clamp_i32(window.right));
    element.set_property("bottom", clamp_i32(window.bottom));
    trace!(?window, "Crop applied");
}

fn clamp_i32(value: impl TryInto<i32>) -> i32 {
    value.try_into().unwrap_or(i32::MAX)
}

fn watch_bus(bus: gst::Bus, sender: BusSender, cancel: CancellationToken) {
    debug!("Bus watcher started");
    while !cancel.is_cancelled() {
        let Some(message) = bus.timed_pop(gst::ClockTime::from_mseconds(BUS_POLL_MS)) else {
            continue;
        };

        match message.view() {
            gst::MessageView::Eos(..) => {
                sender.post(PipelineMessage::EndOfStream);
                break;
            }
            gst::MessageView::Error(err) => {
                let debug = err.debug().map(|d| d.to_string()).unwrap_or_default();
                sender.post(PipelineMessage::Error(format!("{} ({})", err.error(), debug)));
                break;
            }
            gst::MessageView::Warning(w) => {
                warn!("Pipeline warning: {}", w.error());
            }
            _ => {}
        }
    }
    debug!("Bus watcher ended");
}
