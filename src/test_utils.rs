//! Scripted collaborators for tests and benchmarks
//!
//! Each fake shares its state behind an `Arc`, so a test can keep a clone
//! for assertions after handing the original to the code under test.

#![cfg(any(test, feature = "test-utils"))]

use std::collections::{BTreeSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::device::DeviceHandle;
use crate::input::{InputDevice, InputEvent, InputProvider};
use crate::media::{BusSender, CropWindow, FlowStatus, MediaSink, PipelineMessage, SinkProvider, TimestampedBuffer};
use crate::stream::{Encoding, Frame, FrameCallback, FrameSource, StreamFormat, StreamMode, StreamProvider};
use crate::{PtuError, Result, StreamStage};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared, ordered record of collaborator calls.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        lock(&self.0).push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        lock(&self.0).clone()
    }

    /// Index of the first entry equal to `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        lock(&self.0).iter().position(|e| e == entry)
    }
}

/// Calls received by a [`ScriptedDevice`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceProbe {
    pub detect_calls: u32,
    pub sleep_polls: u32,
    pub wake_calls: u32,
    pub mode_polls: u32,
    pub mode_calls: u32,
}

#[derive(Debug)]
struct DeviceScript {
    present: bool,
    sleeping_polls: u32,
    non_streaming_polls: u32,
    flapping: bool,
    probe: DeviceProbe,
}

/// Device whose answers depend only on how often it was polled.
///
/// Corrective actions are counted but have no effect, so a test fixes the
/// exact number of polls that report "not ready".
#[derive(Debug, Clone)]
pub struct ScriptedDevice(Arc<Mutex<DeviceScript>>);

impl Default for ScriptedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedDevice {
    /// Present, awake and streaming.
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(DeviceScript {
            present: true,
            sleeping_polls: 0,
            non_streaming_polls: 0,
            flapping: false,
            probe: DeviceProbe::default(),
        })))
    }

    pub fn absent(self) -> Self {
        lock(&self.0).present = false;
        self
    }

    /// Report sleeping for the first `polls` sleep polls.
    pub fn sleeping_polls(self, polls: u32) -> Self {
        lock(&self.0).sleeping_polls = polls;
        self
    }

    /// Report non-streaming for the first `polls` mode polls.
    pub fn non_streaming_polls(self, polls: u32) -> Self {
        lock(&self.0).non_streaming_polls = polls;
        self
    }

    /// Alternate every answer, starting with "asleep" and "not streaming".
    ///
    /// Overrides the poll counts set above.
    pub fn flapping(self) -> Self {
        lock(&self.0).flapping = true;
        self
    }

    pub fn probe(&self) -> DeviceProbe {
        lock(&self.0).probe
    }
}

impl DeviceHandle for ScriptedDevice {
    fn detect(&mut self) -> bool {
        let mut script = lock(&self.0);
        script.probe.detect_calls += 1;
        script.present
    }

    fn is_sleeping(&mut self) -> bool {
        let mut script = lock(&self.0);
        script.probe.sleep_polls += 1;
        if script.flapping {
            return script.probe.sleep_polls % 2 == 1;
        }
        script.probe.sleep_polls <= script.sleeping_polls
    }

    fn wake_up(&mut self) {
        lock(&self.0).probe.wake_calls += 1;
    }

    fn is_in_streaming_mode(&mut self) -> bool {
        let mut script = lock(&self.0);
        script.probe.mode_polls += 1;
        if script.flapping {
            return script.probe.mode_polls % 2 == 0;
        }
        script.probe.mode_polls > script.non_streaming_polls
    }

    fn switch_to_streaming_mode(&mut self) {
        lock(&self.0).probe.mode_calls += 1;
    }
}

#[derive(Debug, Default)]
struct SinkState {
    rejected: BTreeSet<u64>,
    buffers: Vec<TimestampedBuffer>,
    push_attempts: usize,
    crops: Vec<CropWindow>,
    crop: CropWindow,
    bus: Option<BusSender>,
    end_after: Option<(usize, PipelineMessage)>,
    started: bool,
    stopped: bool,
}

/// Sink that records every buffer and crop it receives.
///
/// Accepts buffers whether or not it was started, except for sequences
/// marked with [`RecordingSink::reject_sequence`].
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    state: Arc<Mutex<SinkState>>,
    log: Option<CallLog>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Refuse the buffer whose offset equals `sequence`.
    pub fn reject_sequence(&self, sequence: u64) {
        lock(&self.state).rejected.insert(sequence);
    }

    /// Post end-of-stream once `accepted` buffers were taken.
    pub fn end_after(&self, accepted: usize) {
        lock(&self.state).end_after = Some((accepted, PipelineMessage::EndOfStream));
    }

    /// Post a pipeline error once `accepted` buffers were taken.
    pub fn fail_after(&self, accepted: usize, message: impl Into<String>) {
        lock(&self.state).end_after = Some((accepted, PipelineMessage::Error(message.into())));
    }

    /// Route lifecycle messages to a session bus.
    pub fn attach_bus(&self, bus: BusSender) {
        lock(&self.state).bus = Some(bus);
    }

    pub fn buffers(&self) -> Vec<TimestampedBuffer> {
        lock(&self.state).buffers.clone()
    }

    pub fn push_attempts(&self) -> usize {
        lock(&self.state).push_attempts
    }

    /// Every crop published, in order.
    pub fn crops(&self) -> Vec<CropWindow> {
        lock(&self.state).crops.clone()
    }

    pub fn started(&self) -> bool {
        lock(&self.state).started
    }

    pub fn stopped(&self) -> bool {
        lock(&self.state).stopped
    }

    fn record(&self, entry: &str) {
        if let Some(log) = &self.log {
            log.record(entry);
        }
    }
}

impl MediaSink for RecordingSink {
    fn start(&self) -> Result<()> {
        lock(&self.state).started = true;
        self.record("sink.start");
        // A zero-buffer trigger fires as soon as the sink plays.
        let mut state = lock(&self.state);
        if let (Some((0, message)), Some(bus)) = (state.end_after.clone(), state.bus.clone()) {
            state.end_after = None;
            bus.post(message);
        }
        Ok(())
    }

    fn push(&self, buffer: TimestampedBuffer) -> FlowStatus {
        let mut state = lock(&self.state);
        state.push_attempts += 1;
        if state.rejected.contains(&buffer.offset) {
            return FlowStatus::Error;
        }
        state.buffers.push(buffer);

        let accepted = state.buffers.len();
        if let Some((after, message)) = state.end_after.clone() {
            if accepted >= after {
                state.end_after = None;
                if let Some(bus) = &state.bus {
                    bus.post(message);
                }
            }
        }
        FlowStatus::Ok
    }

    fn set_crop(&self, crop: CropWindow) {
        let mut state = lock(&self.state);
        state.crop = crop;
        state.crops.push(crop);
    }

    fn crop(&self) -> CropWindow {
        lock(&self.state).crop
    }

    fn stop(&self) -> Result<()> {
        lock(&self.state).stopped = true;
        self.record("sink.stop");
        Ok(())
    }
}

/// Hands out one shared [`RecordingSink`] and wires it to the session bus.
#[derive(Debug, Clone)]
pub struct RecordingSinkProvider {
    sink: RecordingSink,
    formats: Arc<Mutex<Vec<StreamFormat>>>,
}

impl RecordingSinkProvider {
    pub fn new(sink: RecordingSink) -> Self {
        Self { sink, formats: Arc::default() }
    }

    /// Formats the sink was built for
    pub fn formats(&self) -> Vec<StreamFormat> {
        lock(&self.formats).clone()
    }
}

impl SinkProvider for RecordingSinkProvider {
    fn build(&mut self, format: &StreamFormat, bus: BusSender) -> Result<Arc<dyn MediaSink>> {
        lock(&self.formats).push(*format);
        self.sink.attach_bus(bus);
        Ok(Arc::new(self.sink.clone()))
    }
}

/// Frames a [`ManualSource`] delivers from `start`.
#[derive(Debug, Clone, Default)]
struct SourceScript {
    fail_at: Option<StreamStage>,
    frames_on_start: u64,
    frame_len: usize,
}

/// Stream provider whose sources deliver a fixed number of frames.
#[derive(Debug, Clone)]
pub struct ScriptedStreams {
    script: SourceScript,
    mode: StreamMode,
    log: CallLog,
}

impl ScriptedStreams {
    pub fn new(log: CallLog) -> Self {
        Self { script: SourceScript { frame_len: 64, ..SourceScript::default() }, mode: StreamMode::default(), log }
    }

    /// Fail at `stage` with a stream error.
    pub fn fail_at(mut self, stage: StreamStage) -> Self {
        self.script.fail_at = Some(stage);
        self
    }

    /// Deliver `frames` frames synchronously from `start`.
    pub fn frames_on_start(mut self, frames: u64) -> Self {
        self.script.frames_on_start = frames;
        self
    }

    /// Negotiate `mode` whatever the session asks for.
    pub fn negotiated_mode(mut self, mode: StreamMode) -> Self {
        self.mode = mode;
        self
    }
}

impl StreamProvider for ScriptedStreams {
    fn open(&mut self, _mode: StreamMode) -> Result<Box<dyn FrameSource>> {
        self.log.record("source.open");
        if self.script.fail_at == Some(StreamStage::Open) {
            return Err(PtuError::stream_failed(StreamStage::Open, "scripted open failure"));
        }
        Ok(Box::new(ManualSource {
            script: self.script.clone(),
            mode: self.mode,
            log: self.log.clone(),
            callback: None,
        }))
    }
}

/// Frame source driven from the calling thread.
pub struct ManualSource {
    script: SourceScript,
    mode: StreamMode,
    log: CallLog,
    callback: Option<FrameCallback>,
}

impl ManualSource {
    /// Deliver one frame through the installed callback.
    pub fn deliver(&mut self, sequence: u64, data: &[u8]) -> bool {
        match self.callback.as_mut() {
            Some(callback) => {
                callback(Frame::new(data, sequence));
                true
            }
            None => false,
        }
    }
}

impl FrameSource for ManualSource {
    fn negotiate_format(&mut self, _mode: StreamMode) -> Result<StreamFormat> {
        self.log.record("source.negotiate");
        if self.script.fail_at == Some(StreamStage::Negotiate) {
            return Err(PtuError::stream_failed(StreamStage::Negotiate, "scripted negotiate failure"));
        }
        Ok(StreamFormat::for_mode(self.mode, Encoding::H264))
    }

    fn start(&mut self, callback: FrameCallback) -> Result<()> {
        self.log.record("source.start");
        if self.script.fail_at == Some(StreamStage::Start) {
            return Err(PtuError::stream_failed(StreamStage::Start, "scripted start failure"));
        }
        self.callback = Some(callback);

        let data = vec![0xA5u8; self.script.frame_len];
        for sequence in 0..self.script.frames_on_start {
            self.deliver(sequence, &data);
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.callback = None;
        self.log.record("source.stop");
    }
}

/// What a [`ScriptedInput`] device does after its script ran out.
#[derive(Debug, Clone)]
enum Exhausted {
    Idle,
    Cancel(CancellationToken),
    Fail,
}

/// Input provider replaying a fixed event script.
///
/// `None` entries are immediate timeouts. After the script the device
/// idles (sleeping the full timeout), cancels a token, or fails.
#[derive(Debug)]
pub struct ScriptedInput {
    script: Mutex<Option<VecDeque<Option<InputEvent>>>>,
    exhausted: Exhausted,
    log: Option<CallLog>,
}

impl ScriptedInput {
    pub fn new(events: Vec<Option<InputEvent>>) -> Self {
        Self { script: Mutex::new(Some(events.into())), exhausted: Exhausted::Idle, log: None }
    }

    /// Append `ticks` immediate timeouts.
    pub fn then_idle(self, ticks: usize) -> Self {
        if let Some(script) = lock(&self.script).as_mut() {
            script.extend(std::iter::repeat_n(None, ticks));
        }
        self
    }

    /// Cancel `token` as the last scripted entry is handed out.
    pub fn cancel_when_exhausted(mut self, token: CancellationToken) -> Self {
        self.exhausted = Exhausted::Cancel(token);
        self
    }

    /// Fail the read after the last scripted entry.
    pub fn fail_when_exhausted(mut self) -> Self {
        self.exhausted = Exhausted::Fail;
        self
    }

    /// Keep timing out after the script.
    pub fn idle_forever(mut self) -> Self {
        self.exhausted = Exhausted::Idle;
        self
    }

    /// Record `input.closed` when the device is dropped.
    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = Some(log);
        self
    }
}

impl InputProvider for ScriptedInput {
    fn open(&self) -> Result<Box<dyn InputDevice>> {
        let script = lock(&self.script).take().unwrap_or_default();
        Ok(Box::new(ScriptedInputDevice { script, exhausted: self.exhausted.clone(), log: self.log.clone() }))
    }

    fn describe(&self) -> String {
        "scripted input".to_string()
    }
}

struct ScriptedInputDevice {
    script: VecDeque<Option<InputEvent>>,
    exhausted: Exhausted,
    log: Option<CallLog>,
}

impl InputDevice for ScriptedInputDevice {
    fn next_event(&mut self, timeout: Duration) -> Result<Option<InputEvent>> {
        if let Some(entry) = self.script.pop_front() {
            if self.script.is_empty() {
                if let Exhausted::Cancel(token) = &self.exhausted {
                    token.cancel();
                }
            }
            return Ok(entry);
        }

        match &self.exhausted {
            Exhausted::Fail => Err(PtuError::input_unavailable(
                PathBuf::from("scripted"),
                std::io::Error::other("scripted input failure"),
            )),
            Exhausted::Cancel(token) => {
                token.cancel();
                Ok(None)
            }
            Exhausted::Idle => {
                std::thread::sleep(timeout);
                Ok(None)
            }
        }
    }
}

impl Drop for ScriptedInputDevice {
    fn drop(&mut self) {
        if let Some(log) = &self.log {
            log.record("input.closed");
        }
    }
}

/// Input provider with no device behind it.
#[derive(Debug, Clone, Copy, Default)]
pub struct MissingInput;

impl InputProvider for MissingInput {
    fn open(&self) -> Result<Box<dyn InputDevice>> {
        Err(PtuError::input_unavailable(
            PathBuf::from("/dev/input/missing"),
            std::io::Error::from(std::io::ErrorKind::NotFound),
        ))
    }

    fn describe(&self) -> String {
        "missing joystick".to_string()
    }
}
