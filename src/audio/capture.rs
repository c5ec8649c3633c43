//! Microphone capture using PipeWire
//!
//! The backend thread pushes raw samples into a `SharedCaptureState`; the
//! recorder owns the lifecycle. `CaptureSource` is the seam between the
//! two so the recorder state machine can be driven without hardware.

use pipewire as pw;
use pw::spa;
use pw::spa::param::format::{MediaSubtype, MediaType};
use pw::spa::param::format_utils;
use pw::spa::pod::Pod;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{AudioError, AudioResult};

/// Accumulation chunk length, matching the recorder's 100 ms flush period
pub const CHUNK_MILLIS: u32 = 100;

/// Window size of the frequency-domain analysis tap
pub const ANALYSIS_WINDOW: usize = 256;

/// How long the probe waits for the backend thread to surface a failure
const PROBE_SETTLE: Duration = Duration::from_millis(150);

/// Capture backend seam.
///
/// The production implementation talks to PipeWire; tests substitute a
/// source and feed samples straight into the shared state.
pub trait CaptureSource: Send {
    /// Open a short-lived stream solely to verify device access, then
    /// release it. Never leaves a stream open.
    fn probe(&mut self) -> AudioResult<()>;

    /// Acquire the capture stream and begin pushing samples into `sink`.
    fn start(&mut self, sink: SharedCaptureState) -> AudioResult<()>;

    /// Release the capture stream. Must be idempotent.
    fn stop(&mut self);
}

/// Thread-safe accumulation state shared with the capture backend
#[derive(Clone)]
pub struct SharedCaptureState {
    inner: Arc<Mutex<CaptureInner>>,
}

struct CaptureInner {
    /// Finished ~100 ms chunks, in arrival order
    chunks: Vec<Vec<f32>>,
    /// Chunk currently being filled
    pending: Vec<f32>,
    /// Most recent samples feeding the analysis tap
    recent: VecDeque<f32>,
    tap_open: bool,
    sample_rate: u32,
    total_samples: usize,
    /// Smoothed RMS level for UI metering
    volume_level: f32,
    /// Peak with slow decay
    peak_level: f32,
    error: Option<AudioError>,
}

impl SharedCaptureState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(CaptureInner {
                chunks: Vec::new(),
                pending: Vec::new(),
                recent: VecDeque::with_capacity(ANALYSIS_WINDOW),
                tap_open: false,
                sample_rate: crate::audio::codec::SAMPLE_RATE,
                total_samples: 0,
                volume_level: 0.0,
                peak_level: 0.0,
                error: None,
            })),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.lock().unwrap().sample_rate
    }

    pub fn volume_level(&self) -> f32 {
        self.inner.lock().unwrap().volume_level
    }

    pub fn peak_level(&self) -> f32 {
        self.inner.lock().unwrap().peak_level
    }

    pub fn duration(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        crate::audio::codec::duration_seconds(inner.total_samples, inner.sample_rate)
    }

    pub fn error(&self) -> Option<AudioError> {
        self.inner.lock().unwrap().error.clone()
    }

    pub fn set_error(&self, error: AudioError) {
        self.inner.lock().unwrap().error = Some(error);
    }

    pub fn open_tap(&self) {
        self.inner.lock().unwrap().tap_open = true;
    }

    pub fn close_tap(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.tap_open = false;
        inner.recent.clear();
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.chunks.clear();
        inner.pending.clear();
        inner.recent.clear();
        inner.total_samples = 0;
        inner.volume_level = 0.0;
        inner.peak_level = 0.0;
        inner.error = None;
    }

    /// Ingest a batch of mono samples from the backend.
    ///
    /// Samples accumulate into ~100 ms chunks; the analysis window and the
    /// metering levels update on every batch.
    pub fn process_samples(&self, samples: &[f32], sample_rate: u32) {
        if samples.is_empty() {
            return;
        }

        let mut inner = self.inner.lock().unwrap();
        inner.sample_rate = sample_rate;
        let chunk_len = ((sample_rate as u64 * CHUNK_MILLIS as u64 / 1000).max(1)) as usize;

        // Smoothed RMS and decaying peak, for UI metering
        let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
        let rms = (sum_squares / samples.len() as f32).sqrt();
        inner.volume_level = inner.volume_level * 0.7 + rms * 0.3;
        let max = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
        inner.peak_level = (inner.peak_level * 0.95).max(max);

        if inner.tap_open {
            for &sample in samples {
                if inner.recent.len() == ANALYSIS_WINDOW {
                    inner.recent.pop_front();
                }
                inner.recent.push_back(sample);
            }
        }

        inner.total_samples += samples.len();
        inner.pending.extend_from_slice(samples);
        while inner.pending.len() >= chunk_len {
            let rest = inner.pending.split_off(chunk_len);
            let chunk = std::mem::replace(&mut inner.pending, rest);
            inner.chunks.push(chunk);
        }
    }

    /// Concatenate all accumulated chunks and clear the session buffers.
    pub fn take_samples(&self) -> Vec<f32> {
        let mut inner = self.inner.lock().unwrap();
        let mut samples = Vec::with_capacity(inner.total_samples);
        for chunk in inner.chunks.drain(..) {
            samples.extend_from_slice(&chunk);
        }
        samples.append(&mut inner.pending);
        inner.total_samples = 0;
        samples
    }

    /// Instantaneous 0..1 level from the analysis tap.
    ///
    /// Averages the magnitudes of the frequency bins over the most recent
    /// window, each normalized by the full-scale bin magnitude (N/2).
    /// Returns 0.0 when no tap is open.
    pub fn audio_level(&self) -> f32 {
        let mut buffer: Vec<Complex<f32>> = {
            let inner = self.inner.lock().unwrap();
            if !inner.tap_open || inner.recent.is_empty() {
                return 0.0;
            }
            inner
                .recent
                .iter()
                .map(|&s| Complex::new(s, 0.0))
                .collect()
        };
        buffer.resize(ANALYSIS_WINDOW, Complex::new(0.0, 0.0));

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(ANALYSIS_WINDOW);
        fft.process(&mut buffer);

        let bins = ANALYSIS_WINDOW / 2;
        let full_scale = ANALYSIS_WINDOW as f32 / 2.0;
        let sum: f32 = buffer[..bins].iter().map(|c| c.norm() / full_scale).sum();
        (sum / bins as f32).clamp(0.0, 1.0)
    }
}

impl Default for SharedCaptureState {
    fn default() -> Self {
        Self::new()
    }
}

/// PipeWire capture backend
pub struct PipewireSource {
    is_running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    sender: Option<pw::channel::Sender<CaptureCommand>>,
}

enum CaptureCommand {
    Stop,
}

impl PipewireSource {
    pub fn new() -> Self {
        Self {
            is_running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            sender: None,
        }
    }
}

impl Default for PipewireSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSource for PipewireSource {
    fn probe(&mut self) -> AudioResult<()> {
        let sink = SharedCaptureState::new();
        self.start(sink.clone())?;
        // Connection failures surface asynchronously on the sink
        thread::sleep(PROBE_SETTLE);
        self.stop();
        match sink.error() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn start(&mut self, sink: SharedCaptureState) -> AudioResult<()> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(AudioError::InvalidInput("capture already running".into()));
        }

        self.is_running.store(true, Ordering::SeqCst);
        let is_running = self.is_running.clone();

        let (sender, receiver) = pw::channel::channel::<CaptureCommand>();
        self.sender = Some(sender);

        let handle = thread::spawn(move || {
            if let Err(e) = run_capture_loop(sink.clone(), receiver) {
                log::error!("capture backend failed: {}", e);
                sink.set_error(AudioError::DeviceUnavailable(e));
            }
            is_running.store(false, Ordering::SeqCst);
        });

        self.thread_handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(CaptureCommand::Stop);
        }
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
        self.is_running.store(false, Ordering::SeqCst);
    }
}

impl Drop for PipewireSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Run the PipeWire capture loop in a background thread
fn run_capture_loop(
    sink: SharedCaptureState,
    receiver: pw::channel::Receiver<CaptureCommand>,
) -> Result<(), String> {
    pw::init();

    let mainloop = pw::main_loop::MainLoopRc::new(None)
        .map_err(|e| format!("Failed to create PipeWire main loop: {}", e))?;

    let context = pw::context::ContextRc::new(&mainloop, None)
        .map_err(|e| format!("Failed to create PipeWire context: {}", e))?;

    let core = context
        .connect_rc(None)
        .map_err(|e| format!("Failed to connect to PipeWire: {}", e))?;

    let mainloop_weak = mainloop.downgrade();
    let _receiver = receiver.attach(mainloop.loop_(), move |cmd| match cmd {
        CaptureCommand::Stop => {
            if let Some(mainloop) = mainloop_weak.upgrade() {
                mainloop.quit();
            }
        }
    });

    struct UserData {
        format: spa::param::audio::AudioInfoRaw,
        sink: SharedCaptureState,
    }

    let user_data = UserData {
        format: Default::default(),
        sink: sink.clone(),
    };

    // Voice-chat capture: ask the session manager for the processed
    // microphone path (echo cancellation, noise suppression, auto gain)
    let props = pw::properties::properties! {
        *pw::keys::MEDIA_TYPE => "Audio",
        *pw::keys::MEDIA_CATEGORY => "Capture",
        *pw::keys::MEDIA_ROLE => "Communication",
        *pw::keys::APP_NAME => "ChatVoz",
        "filter.want" => "echo-cancel",
    };

    let stream = pw::stream::StreamBox::new(&core, "chatvoz-capture", props)
        .map_err(|e| format!("Failed to create PipeWire stream: {}", e))?;

    let _listener = stream
        .add_local_listener_with_user_data(user_data)
        .param_changed(|_, user_data, id, param| {
            let Some(param) = param else { return };
            if id != spa::param::ParamType::Format.as_raw() {
                return;
            }

            let (media_type, media_subtype) = match format_utils::parse_format(param) {
                Ok(v) => v,
                Err(_) => return,
            };

            if media_type != MediaType::Audio || media_subtype != MediaSubtype::Raw {
                return;
            }

            if let Err(e) = user_data.format.parse(param) {
                log::warn!("failed to parse capture format: {:?}", e);
            }
        })
        .process(|stream, user_data| {
            let Some(mut buffer) = stream.dequeue_buffer() else {
                return;
            };

            let datas = buffer.datas_mut();
            if datas.is_empty() {
                return;
            }

            let data = &mut datas[0];
            let n_channels = user_data.format.channels().max(1);
            let sample_rate = user_data.format.rate();
            let n_samples = data.chunk().size() / (std::mem::size_of::<f32>() as u32);

            if let Some(raw_samples) = data.data() {
                // Take the first channel only; voice clips are mono
                let mut mono = Vec::with_capacity((n_samples / n_channels) as usize);

                for i in (0..n_samples).step_by(n_channels as usize) {
                    let start = i as usize * std::mem::size_of::<f32>();
                    let end = start + std::mem::size_of::<f32>();
                    if end <= raw_samples.len() {
                        let sample = f32::from_le_bytes(
                            raw_samples[start..end].try_into().unwrap_or([0; 4]),
                        );
                        mono.push(sample);
                    }
                }

                user_data.sink.process_samples(&mono, sample_rate);
            }
        })
        .register()
        .map_err(|e| format!("Failed to register stream listener: {}", e))?;

    let mut audio_info = spa::param::audio::AudioInfoRaw::new();
    audio_info.set_format(spa::param::audio::AudioFormat::F32LE);

    let obj = spa::pod::Object {
        type_: spa::utils::SpaTypes::ObjectParamFormat.as_raw(),
        id: spa::param::ParamType::EnumFormat.as_raw(),
        properties: audio_info.into(),
    };

    let values: Vec<u8> = spa::pod::serialize::PodSerializer::serialize(
        std::io::Cursor::new(Vec::new()),
        &spa::pod::Value::Object(obj),
    )
    .map_err(|e| format!("Failed to serialize audio format: {:?}", e))?
    .0
    .into_inner();

    let pod = Pod::from_bytes(&values).ok_or("Failed to build format pod")?;
    let mut params = [pod];

    stream
        .connect(
            spa::utils::Direction::Input,
            None,
            pw::stream::StreamFlags::AUTOCONNECT
                | pw::stream::StreamFlags::MAP_BUFFERS
                | pw::stream::StreamFlags::RT_PROCESS,
            &mut params,
        )
        .map_err(|e| format!("Failed to connect stream: {}", e))?;

    mainloop.run();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_accumulate_into_chunks() {
        let state = SharedCaptureState::new();
        // 44_100 Hz means a 100 ms chunk holds 4_410 samples
        state.process_samples(&vec![0.1; 10_000], 44_100);
        state.process_samples(&vec![0.2; 100], 44_100);

        assert!((state.duration() - 10_100.0 / 44_100.0).abs() < 1e-9);
        let samples = state.take_samples();
        assert_eq!(samples.len(), 10_100);
        assert_eq!(samples[0], 0.1);
        assert_eq!(samples[10_099], 0.2);
        // Taking drains the session
        assert!(state.take_samples().is_empty());
        assert_eq!(state.duration(), 0.0);
    }

    #[test]
    fn level_is_zero_without_tap() {
        let state = SharedCaptureState::new();
        state.process_samples(&vec![0.9; 512], 44_100);
        assert_eq!(state.audio_level(), 0.0);
    }

    #[test]
    fn level_tracks_signal_energy() {
        let loud = SharedCaptureState::new();
        loud.open_tap();
        let tone: Vec<f32> = (0..512).map(|i| (i as f32 * 0.3).sin() * 0.8).collect();
        loud.process_samples(&tone, 44_100);

        let quiet = SharedCaptureState::new();
        quiet.open_tap();
        quiet.process_samples(&vec![0.0f32; 512], 44_100);

        let loud_level = loud.audio_level();
        assert!(loud_level > 0.0 && loud_level <= 1.0);
        assert_eq!(quiet.audio_level(), 0.0);
        assert!(loud_level > quiet.audio_level());

        loud.close_tap();
        assert_eq!(loud.audio_level(), 0.0);
    }

    #[test]
    fn reset_clears_everything() {
        let state = SharedCaptureState::new();
        state.open_tap();
        state.process_samples(&vec![0.5; 5000], 48_000);
        state.set_error(AudioError::Timeout);
        state.reset();

        assert_eq!(state.duration(), 0.0);
        assert!(state.take_samples().is_empty());
        assert!(state.error().is_none());
        assert_eq!(state.volume_level(), 0.0);
    }
}
