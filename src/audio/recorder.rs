//! Voice recorder state machine
//!
//! Owns the microphone capture lifecycle: permission, stream acquisition,
//! chunked accumulation, the 30 s cap, silence-rejection validation and
//! resource teardown. Exactly one recording session can be active per
//! recorder; every exit path releases the stream, the analysis tap and the
//! tick exactly once.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::audio::capture::{CaptureSource, PipewireSource, SharedCaptureState};
use crate::audio::codec;
use crate::error::AudioError;

/// Default recording cap in seconds
pub const DEFAULT_MAX_SECONDS: f64 = 30.0;

const TICK_PERIOD: Duration = Duration::from_millis(100);
const TICK_SECONDS: f64 = 0.1;

/// Recorder lifecycle states
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RecorderPhase {
    #[default]
    Idle,
    PermissionPending,
    Capturing,
    Stopping,
    Cancelling,
    Error,
}

/// Microphone permission result
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PermissionState {
    Granted,
    Denied,
    #[default]
    Prompt,
}

/// Voice recorder with an instance-owned tick and capture session
#[derive(Clone)]
pub struct VoiceRecorder {
    inner: Arc<Mutex<RecorderInner>>,
}

struct RecorderInner {
    capture: SharedCaptureState,
    source: Box<dyn CaptureSource>,
    phase: RecorderPhase,
    permission: PermissionState,
    max_seconds: f64,
    elapsed: f64,
    error: Option<AudioError>,
    tick: Option<JoinHandle<()>>,
    /// Payload parked by the auto-stop path at the cap
    finished: Option<Vec<u8>>,
}

impl VoiceRecorder {
    pub fn new(source: Box<dyn CaptureSource>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RecorderInner {
                capture: SharedCaptureState::new(),
                source,
                phase: RecorderPhase::Idle,
                permission: PermissionState::Prompt,
                max_seconds: DEFAULT_MAX_SECONDS,
                elapsed: 0.0,
                error: None,
                tick: None,
                finished: None,
            })),
        }
    }

    /// Recorder backed by the system microphone
    pub fn pipewire() -> Self {
        Self::new(Box::new(PipewireSource::new()))
    }

    pub fn with_max_seconds(self, max_seconds: f64) -> Self {
        self.inner.lock().unwrap().max_seconds = max_seconds.max(TICK_SECONDS);
        self
    }

    /// Trigger the permission/device check with a transient stream.
    pub fn request_permission(&self) -> PermissionState {
        let mut inner = self.inner.lock().unwrap();
        if inner.phase == RecorderPhase::Capturing {
            return inner.permission;
        }
        inner.phase = RecorderPhase::PermissionPending;
        match inner.source.probe() {
            Ok(()) => {
                inner.permission = PermissionState::Granted;
                inner.phase = RecorderPhase::Idle;
            }
            Err(e) => {
                log::warn!("microphone permission check failed: {}", e);
                inner.permission = PermissionState::Denied;
                inner.error = Some(e);
                inner.phase = RecorderPhase::Error;
            }
        }
        inner.permission
    }

    /// Begin a recording session. Returns false (with the error observable
    /// via `error()`) when permission is denied, the device is unavailable
    /// or a session is already active.
    pub fn start(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.phase == RecorderPhase::Capturing {
            log::warn!("start() ignored: recording already in progress");
            return false;
        }

        inner.error = None;
        inner.finished = None;

        if inner.permission != PermissionState::Granted {
            inner.phase = RecorderPhase::PermissionPending;
            match inner.source.probe() {
                Ok(()) => inner.permission = PermissionState::Granted,
                Err(e) => {
                    log::warn!("cannot record: {}", e);
                    inner.permission = PermissionState::Denied;
                    inner.error = Some(e);
                    inner.phase = RecorderPhase::Error;
                    return false;
                }
            }
        }

        inner.capture.reset();
        inner.capture.open_tap();

        let sink = inner.capture.clone();
        if let Err(e) = inner.source.start(sink) {
            log::error!("failed to acquire capture stream: {}", e);
            inner.capture.close_tap();
            inner.error = Some(e);
            inner.phase = RecorderPhase::Error;
            return false;
        }

        inner.elapsed = 0.0;
        inner.phase = RecorderPhase::Capturing;

        // Instance-owned 100 ms tick: advances elapsed time and auto-stops
        // exactly at the cap
        let recorder = self.clone();
        inner.tick = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_PERIOD);
            interval.tick().await;
            loop {
                interval.tick().await;
                let cap_reached = {
                    let mut inner = recorder.inner.lock().unwrap();
                    if inner.phase != RecorderPhase::Capturing {
                        break;
                    }
                    inner.elapsed += TICK_SECONDS;
                    inner.elapsed >= inner.max_seconds
                };
                if cap_reached {
                    log::info!("recording cap reached, stopping");
                    recorder.finalize(true, true);
                    break;
                }
            }
        }));

        log::debug!("recording started");
        true
    }

    /// Finish the session: finalize chunks, encode, run the silence check
    /// and release everything. Returns the container bytes, or `None` when
    /// no session is active or validation rejects the capture.
    pub fn stop(&self) -> Option<Vec<u8>> {
        self.finalize(true, false)
    }

    /// Tear down the session and discard whatever was captured.
    pub fn cancel(&self) {
        self.finalize(false, false);
    }

    /// Runs the whole teardown under one critical section: a poller that
    /// observes the session end can always retrieve the parked payload.
    fn finalize(&self, validate: bool, park: bool) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.phase != RecorderPhase::Capturing {
            return None;
        }
        inner.phase = if validate {
            RecorderPhase::Stopping
        } else {
            RecorderPhase::Cancelling
        };

        inner.source.stop();
        inner.capture.close_tap();
        let samples = inner.capture.take_samples();
        let rate = inner.capture.sample_rate();
        inner.elapsed = 0.0;
        if let Some(tick) = inner.tick.take() {
            tick.abort();
        }

        let payload = if !validate {
            log::debug!("recording cancelled, {} samples discarded", samples.len());
            None
        } else if samples.is_empty() {
            log::info!("recording produced no samples");
            None
        } else {
            match codec::encode_wav(&samples, rate) {
                Ok(bytes) => {
                    if codec::validate_audio(&bytes) {
                        Some(bytes)
                    } else {
                        log::info!("recording rejected by silence check");
                        inner.error = Some(AudioError::ValidationRejected);
                        None
                    }
                }
                Err(e) => {
                    log::error!("failed to encode recording: {}", e);
                    inner.error = Some(e);
                    None
                }
            }
        };

        if park {
            inner.finished = payload;
            inner.phase = RecorderPhase::Idle;
            return None;
        }
        inner.phase = RecorderPhase::Idle;
        payload
    }

    /// Payload produced by the auto-stop path, if any.
    pub fn take_finished(&self) -> Option<Vec<u8>> {
        self.inner.lock().unwrap().finished.take()
    }

    /// Idempotent teardown back to the idle state.
    pub fn cleanup(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.source.stop();
        inner.capture.close_tap();
        inner.capture.reset();
        if let Some(tick) = inner.tick.take() {
            tick.abort();
        }
        inner.elapsed = 0.0;
        inner.finished = None;
        inner.error = None;
        inner.phase = RecorderPhase::Idle;
    }

    /// Instantaneous 0..1 level from the analysis tap; 0 when not recording.
    pub fn audio_level(&self) -> f32 {
        let capture = self.inner.lock().unwrap().capture.clone();
        capture.audio_level()
    }

    /// Shared sink the capture backend pushes into. Exposed so callers can
    /// meter the live session (and tests can feed samples directly).
    pub fn capture_handle(&self) -> SharedCaptureState {
        self.inner.lock().unwrap().capture.clone()
    }

    pub fn phase(&self) -> RecorderPhase {
        self.inner.lock().unwrap().phase
    }

    pub fn permission(&self) -> PermissionState {
        self.inner.lock().unwrap().permission
    }

    pub fn is_recording(&self) -> bool {
        self.inner.lock().unwrap().phase == RecorderPhase::Capturing
    }

    pub fn elapsed(&self) -> f64 {
        self.inner.lock().unwrap().elapsed
    }

    pub fn max_seconds(&self) -> f64 {
        self.inner.lock().unwrap().max_seconds
    }

    pub fn error(&self) -> Option<AudioError> {
        self.inner.lock().unwrap().error.clone()
    }

    pub fn can_record(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.permission == PermissionState::Granted
            && inner.phase != RecorderPhase::Capturing
            && inner.elapsed < inner.max_seconds
    }

    pub fn can_stop(&self) -> bool {
        self.is_recording()
    }

    /// Elapsed time as a percentage of the cap
    pub fn recording_progress(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        (inner.elapsed / inner.max_seconds) * 100.0
    }

    pub fn remaining_time(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        inner.max_seconds - inner.elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AudioError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Capture source that never touches hardware. Tests feed samples into
    /// the recorder's shared sink themselves.
    struct MockSource {
        probe_result: Result<(), AudioError>,
        start_result: Result<(), AudioError>,
        stops: Arc<AtomicUsize>,
    }

    impl MockSource {
        fn ok() -> (Self, Arc<AtomicUsize>) {
            let stops = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    probe_result: Ok(()),
                    start_result: Ok(()),
                    stops: stops.clone(),
                },
                stops,
            )
        }
    }

    impl CaptureSource for MockSource {
        fn probe(&mut self) -> Result<(), AudioError> {
            self.probe_result.clone()
        }

        fn start(&mut self, _sink: SharedCaptureState) -> Result<(), AudioError> {
            self.start_result.clone()
        }

        fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn loud_samples(count: usize) -> Vec<f32> {
        (0..count).map(|i| 0.5 * (i as f32 * 0.05).sin()).collect()
    }

    #[tokio::test]
    async fn stop_returns_payload_for_audible_capture() {
        let (source, stops) = MockSource::ok();
        let recorder = VoiceRecorder::new(Box::new(source));

        assert!(recorder.start());
        assert!(recorder.is_recording());
        assert_eq!(recorder.permission(), PermissionState::Granted);

        recorder
            .capture_handle()
            .process_samples(&loud_samples(44_100), 44_100);

        let payload = recorder.stop().expect("audible capture accepted");
        assert!(codec::validate_audio(&payload));
        assert_eq!(recorder.phase(), RecorderPhase::Idle);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn silent_capture_is_rejected() {
        let (source, _stops) = MockSource::ok();
        let recorder = VoiceRecorder::new(Box::new(source));

        assert!(recorder.start());
        recorder
            .capture_handle()
            .process_samples(&vec![0.0f32; 44_100], 44_100);

        assert!(recorder.stop().is_none());
        assert_eq!(recorder.error(), Some(AudioError::ValidationRejected));
        assert_eq!(recorder.phase(), RecorderPhase::Idle);
    }

    #[tokio::test]
    async fn second_start_is_rejected_not_queued() {
        let (source, _stops) = MockSource::ok();
        let recorder = VoiceRecorder::new(Box::new(source));

        assert!(recorder.start());
        assert!(!recorder.start());
        assert!(recorder.is_recording());
        recorder.cancel();
    }

    #[tokio::test]
    async fn stop_without_session_is_null() {
        let (source, stops) = MockSource::ok();
        let recorder = VoiceRecorder::new(Box::new(source));
        assert!(recorder.stop().is_none());
        assert_eq!(stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancel_discards_without_validation() {
        let (source, stops) = MockSource::ok();
        let recorder = VoiceRecorder::new(Box::new(source));

        assert!(recorder.start());
        recorder
            .capture_handle()
            .process_samples(&loud_samples(44_100), 44_100);
        recorder.cancel();

        assert_eq!(recorder.phase(), RecorderPhase::Idle);
        assert!(recorder.error().is_none());
        assert!(recorder.take_finished().is_none());
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        // The session buffers were drained
        assert!(recorder.capture_handle().take_samples().is_empty());
    }

    #[tokio::test]
    async fn permission_denied_fails_start() {
        let stops = Arc::new(AtomicUsize::new(0));
        let source = MockSource {
            probe_result: Err(AudioError::PermissionDenied),
            start_result: Ok(()),
            stops,
        };
        let recorder = VoiceRecorder::new(Box::new(source));

        assert!(!recorder.start());
        assert_eq!(recorder.permission(), PermissionState::Denied);
        assert_eq!(recorder.error(), Some(AudioError::PermissionDenied));
        assert_eq!(recorder.phase(), RecorderPhase::Error);
        assert!(!recorder.can_record());
    }

    #[tokio::test]
    async fn device_unavailable_fails_start() {
        let stops = Arc::new(AtomicUsize::new(0));
        let source = MockSource {
            probe_result: Ok(()),
            start_result: Err(AudioError::DeviceUnavailable("no mic".into())),
            stops,
        };
        let recorder = VoiceRecorder::new(Box::new(source));

        assert!(!recorder.start());
        assert_eq!(recorder.phase(), RecorderPhase::Error);
        assert!(matches!(
            recorder.error(),
            Some(AudioError::DeviceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn cleanup_is_idempotent() {
        let (source, stops) = MockSource::ok();
        let recorder = VoiceRecorder::new(Box::new(source));

        assert!(recorder.start());
        recorder.cleanup();
        recorder.cleanup();

        assert_eq!(recorder.phase(), RecorderPhase::Idle);
        assert!(recorder.error().is_none());
        assert_eq!(recorder.elapsed(), 0.0);
        assert!(stops.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recording_auto_stops_at_cap() {
        let (source, stops) = MockSource::ok();
        let recorder = VoiceRecorder::new(Box::new(source));

        assert!(recorder.start());
        recorder
            .capture_handle()
            .process_samples(&loud_samples(44_100), 44_100);

        // 31 simulated seconds against the 30 s cap
        tokio::time::sleep(Duration::from_secs(31)).await;

        assert!(!recorder.is_recording());
        assert_eq!(recorder.phase(), RecorderPhase::Idle);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        let payload = recorder.take_finished().expect("auto-stop kept payload");
        assert!(codec::validate_audio(&payload));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cap_stop_payload_is_ready_the_moment_recording_ends() {
        let (source, _stops) = MockSource::ok();
        let recorder = VoiceRecorder::new(Box::new(source)).with_max_seconds(0.3);

        assert!(recorder.start());
        recorder
            .capture_handle()
            .process_samples(&loud_samples(44_100), 44_100);

        // A concurrent poller doing exactly what a caller does: wait for the
        // session to end, then immediately collect the payload
        let poller = {
            let recorder = recorder.clone();
            tokio::spawn(async move {
                loop {
                    if !recorder.is_recording() {
                        return recorder.take_finished();
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            })
        };

        let payload = poller
            .await
            .unwrap()
            .expect("payload visible as soon as the session ends");
        assert!(codec::validate_audio(&payload));
        assert_eq!(recorder.phase(), RecorderPhase::Idle);
    }

    #[tokio::test]
    async fn progress_getters_track_the_cap() {
        let (source, _stops) = MockSource::ok();
        let recorder = VoiceRecorder::new(Box::new(source)).with_max_seconds(10.0);
        assert_eq!(recorder.max_seconds(), 10.0);
        assert_eq!(recorder.remaining_time(), 10.0);
        assert_eq!(recorder.recording_progress(), 0.0);
    }
}
