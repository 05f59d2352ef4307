use super::*;
use crate::input::InputEvent;
use crate::media::CropWindow;
use crate::stream::StreamMode;
use crate::test_utils::{
    CallLog, MissingInput, RecordingSink, RecordingSinkProvider, ScriptedDevice, ScriptedInput, ScriptedStreams,
};
use crate::{ReadinessPhase, StreamStage};

struct Harness {
    log: CallLog,
    device: ScriptedDevice,
    sink: RecordingSink,
    sinks: RecordingSinkProvider,
}

impl Harness {
    fn new() -> Self {
        let log = CallLog::new();
        let sink = RecordingSink::new().with_log(log.clone());
        Self { device: ScriptedDevice::new(), sinks: RecordingSinkProvider::new(sink.clone()), sink, log }
    }

    fn collaborators(&self, streams: ScriptedStreams, input: Arc<dyn InputProvider>) -> Collaborators {
        Collaborators {
            device: Box::new(self.device.clone()),
            streams: Box::new(streams),
            sinks: Box::new(self.sinks.clone()),
            input,
        }
    }

    fn idle_input(&self) -> Arc<dyn InputProvider> {
        Arc::new(ScriptedInput::new(Vec::new()).idle_forever().with_log(self.log.clone()))
    }

    fn before(&self, first: &str, second: &str) -> bool {
        match (self.log.position(first), self.log.position(second)) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        }
    }
}

#[tokio::test]
async fn end_of_stream_runs_full_lifecycle() {
    let _ = tracing_subscriber::fmt::try_init();
    let mut harness = Harness::new();
    harness.device = ScriptedDevice::new().sleeping_polls(1).non_streaming_polls(1);
    harness.sink.end_after(5);

    let streams = ScriptedStreams::new(harness.log.clone()).frames_on_start(5);
    let parts = harness.collaborators(streams, harness.idle_input());
    let report = Session::new(PtuConfig::default(), parts).run_until(std::future::pending()).await.unwrap();

    assert_eq!(report.end, SessionEnd::EndOfStream);
    assert_eq!(report.ready, Ready { wake_attempts: 1, mode_attempts: 1 });
    assert_eq!(report.device_state, DeviceState::Streaming);
    assert_eq!(report.frames_pushed, 5);
    assert_eq!(report.frames_dropped, 0);
    assert!(report.viewport.is_some_and(|v| v.enabled));

    let offsets: Vec<u64> = harness.sink.buffers().iter().map(|b| b.offset).collect();
    assert_eq!(offsets, vec![0, 1, 2, 3, 4]);

    assert!(harness.before("source.negotiate", "sink.start"));
    assert!(harness.before("sink.start", "source.start"));
    assert!(harness.before("sink.stop", "input.closed"));
    assert!(harness.before("input.closed", "source.stop"));
}

#[tokio::test]
async fn wake_exhaustion_is_fatal_before_streaming() {
    let mut harness = Harness::new();
    harness.device = ScriptedDevice::new().sleeping_polls(4);

    let streams = ScriptedStreams::new(harness.log.clone());
    let parts = harness.collaborators(streams, harness.idle_input());
    let error = Session::new(PtuConfig::default(), parts).run_until(std::future::pending()).await.unwrap_err();

    assert!(matches!(error, PtuError::DeviceUnreachable { phase: ReadinessPhase::Wake, attempts: 3 }));
    assert_eq!(harness.device.probe().wake_calls, 3);
    assert!(harness.log.entries().is_empty(), "nothing opens after readiness fails");
}

#[tokio::test]
async fn missing_camera_names_detect_phase() {
    let mut harness = Harness::new();
    harness.device = ScriptedDevice::new().absent();

    let parts = harness.collaborators(ScriptedStreams::new(harness.log.clone()), harness.idle_input());
    let error = Session::new(PtuConfig::default(), parts).run_until(std::future::pending()).await.unwrap_err();

    assert!(error.to_string().contains("detect"));
    assert!(error.is_fatal());
}

#[tokio::test]
async fn pipeline_error_tears_down_and_fails() {
    let harness = Harness::new();
    harness.sink.fail_after(2, "decoder exploded");

    let streams = ScriptedStreams::new(harness.log.clone()).frames_on_start(4);
    let parts = harness.collaborators(streams, harness.idle_input());
    let error = Session::new(PtuConfig::default(), parts).run_until(std::future::pending()).await.unwrap_err();

    assert!(matches!(&error, PtuError::Pipeline { message, .. } if message == "decoder exploded"));
    assert!(harness.sink.stopped());
    assert!(harness.before("sink.stop", "source.stop"));
    assert!(harness.log.position("input.closed").is_some());
}

#[tokio::test]
async fn missing_joystick_keeps_streaming() {
    let harness = Harness::new();
    harness.sink.end_after(3);

    let streams = ScriptedStreams::new(harness.log.clone()).frames_on_start(3);
    let parts = harness.collaborators(streams, Arc::new(MissingInput));
    let report = Session::new(PtuConfig::default(), parts).run_until(std::future::pending()).await.unwrap();

    assert_eq!(report.end, SessionEnd::EndOfStream);
    assert_eq!(report.frames_pushed, 3);
    let viewport = report.viewport.unwrap();
    assert!(!viewport.enabled);
    assert_eq!(viewport.ticks, 0);
}

#[tokio::test]
async fn negotiate_failure_closes_source_without_sink() {
    let harness = Harness::new();

    let streams = ScriptedStreams::new(harness.log.clone()).fail_at(StreamStage::Negotiate);
    let parts = harness.collaborators(streams, harness.idle_input());
    let error = Session::new(PtuConfig::default(), parts).run_until(std::future::pending()).await.unwrap_err();

    assert!(matches!(error, PtuError::StreamOpen { stage: StreamStage::Negotiate, .. }));
    assert!(error.to_string().contains("negotiate"));
    assert!(harness.log.position("source.stop").is_some());
    assert!(harness.sinks.formats().is_empty());
    assert!(!harness.sink.started());
}

#[tokio::test]
async fn open_failure_is_fatal() {
    let harness = Harness::new();

    let streams = ScriptedStreams::new(harness.log.clone()).fail_at(StreamStage::Open);
    let parts = harness.collaborators(streams, harness.idle_input());
    let error = Session::new(PtuConfig::default(), parts).run_until(std::future::pending()).await.unwrap_err();

    assert!(matches!(error, PtuError::StreamOpen { stage: StreamStage::Open, .. }));
    assert_eq!(harness.log.entries(), vec!["source.open".to_string()]);
}

#[tokio::test]
async fn start_failure_stops_sink_and_source() {
    let harness = Harness::new();

    let streams = ScriptedStreams::new(harness.log.clone()).fail_at(StreamStage::Start);
    let parts = harness.collaborators(streams, harness.idle_input());
    let error = Session::new(PtuConfig::default(), parts).run_until(std::future::pending()).await.unwrap_err();

    assert!(matches!(error, PtuError::StreamOpen { stage: StreamStage::Start, .. }));
    assert!(harness.sink.stopped());
    assert!(harness.before("sink.stop", "source.stop"));
    assert!(harness.log.position("input.closed").is_none(), "viewport never started");
}

#[tokio::test]
async fn shutdown_signal_ends_session() {
    let harness = Harness::new();

    let streams = ScriptedStreams::new(harness.log.clone()).frames_on_start(2);
    let parts = harness.collaborators(streams, harness.idle_input());
    let report = Session::new(PtuConfig::default(), parts).run_until(async {}).await.unwrap();

    assert_eq!(report.end, SessionEnd::Shutdown);
    assert_eq!(report.frames_pushed, 2);
    assert!(harness.sink.stopped());
}

#[tokio::test]
async fn viewport_follows_negotiated_geometry() {
    let harness = Harness::new();
    harness.sink.end_after(1);

    let mut config = PtuConfig::default();
    config.viewport.initial_x = 5000;
    config.viewport.initial_y = 5000;

    // Asked for 4K, the camera negotiates 1920x960.
    let streams = ScriptedStreams::new(harness.log.clone()).negotiated_mode(StreamMode::Fhd2997).frames_on_start(1);
    let parts = harness.collaborators(streams, harness.idle_input());
    let report = Session::new(config, parts).run_until(std::future::pending()).await.unwrap();

    assert_eq!((report.format.width, report.format.height), (1920, 960));
    assert_eq!(harness.sinks.formats()[0].width, 1920);
    let first = harness.sink.crops()[0];
    assert_eq!(first, CropWindow { left: 1280, top: 480, right: 0, bottom: 0 });
}

#[tokio::test]
async fn view_larger_than_negotiated_frame_is_rejected() {
    let harness = Harness::new();

    let mut config = PtuConfig::default();
    config.viewport.view_width = 2560;
    config.viewport.view_height = 1440;

    let streams = ScriptedStreams::new(harness.log.clone()).negotiated_mode(StreamMode::Fhd2997);
    let parts = harness.collaborators(streams, harness.idle_input());
    let error = Session::new(config, parts).run_until(std::future::pending()).await.unwrap_err();

    assert!(matches!(error, PtuError::InvalidGeometry { total_width: 1920, .. }));
    assert!(harness.log.position("source.stop").is_some());
    assert!(harness.sinks.formats().is_empty());
}

#[tokio::test]
async fn joystick_moves_viewport_during_session() {
    let harness = Harness::new();
    let log = harness.log.clone();

    // Full right deflection for ten ticks, then the stick is released.
    let mut script = vec![Some(InputEvent::axis(0, 5000))];
    script.extend(std::iter::repeat_n(None, 9));
    script.push(Some(InputEvent::axis(0, 0)));
    let input = ScriptedInput::new(script).with_log(log.clone());
    let streams = ScriptedStreams::new(log).frames_on_start(1);
    let parts = harness.collaborators(streams, Arc::new(input));

    let sink = harness.sink.clone();
    let shutdown = async move {
        while sink.crops().len() < 12 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    };
    let report = Session::new(PtuConfig::default(), parts).run_until(shutdown).await.unwrap();

    let crops = harness.sink.crops();
    assert_eq!(crops[0], CropWindow { left: 0, top: 0, right: 3200, bottom: 1440 });
    assert_eq!(crops[10], CropWindow { left: 10, top: 0, right: 3190, bottom: 1440 });
    let viewport = report.viewport.unwrap();
    assert!(viewport.ticks >= 11);
    assert_eq!(viewport.final_offset.x, 10);
}

#[test]
fn default_collaborators_drive_ptpcam() {
    let mut config = PtuConfig::default();
    config.device.ptpcam_path = "/nonexistent/ptpcam".into();
    let mut parts = Collaborators::from_config(&config).unwrap();
    assert!(!parts.device.detect(), "absent ptpcam must not look like a camera");

    config.device.backend = DeviceBackend::Simulated;
    let mut parts = Collaborators::from_config(&config).unwrap();
    assert!(parts.device.detect());
}
