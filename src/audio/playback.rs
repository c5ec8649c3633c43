//! Audio playback using PipeWire
//!
//! The sink thread pulls frames from a `SharedPlaybackState`; the player
//! owns transport state. Rate changes advance the read cursor by more than
//! one source sample per output frame, volume scales samples on the way
//! out. `PlaybackSink` is the seam that lets the player state machine run
//! without an output device.

use pipewire as pw;
use pw::spa;
use pw::spa::param::format::{MediaSubtype, MediaType};
use pw::spa::param::format_utils;
use pw::spa::pod::Pod;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::error::{AudioError, AudioResult};

/// Playback backend seam
pub trait PlaybackSink: Send {
    /// Begin pulling frames from `state` until it runs dry or `stop` is
    /// called.
    fn start(&mut self, state: SharedPlaybackState) -> AudioResult<()>;

    /// Release the output stream. Must be idempotent.
    fn stop(&mut self);
}

/// Thread-safe playback session state shared with the sink
#[derive(Clone)]
pub struct SharedPlaybackState {
    inner: Arc<Mutex<PlaybackInner>>,
}

struct PlaybackInner {
    samples: Vec<f32>,
    sample_rate: u32,
    /// Fractional sample index, advanced by `rate` per output frame
    cursor: f64,
    rate: f32,
    volume: f32,
    is_playing: bool,
    /// Set once when the cursor runs off the end
    finished: bool,
}

impl SharedPlaybackState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(PlaybackInner {
                samples: Vec::new(),
                sample_rate: crate::audio::codec::SAMPLE_RATE,
                cursor: 0.0,
                rate: 1.0,
                volume: 1.0,
                is_playing: false,
                finished: false,
            })),
        }
    }

    /// Install decoded samples as the active session.
    pub fn load(&self, samples: Vec<f32>, sample_rate: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.samples = samples;
        inner.sample_rate = sample_rate.max(1);
        inner.cursor = 0.0;
        inner.finished = false;
        inner.is_playing = false;
    }

    /// Detach the sample buffer so it can be collected.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.samples = Vec::new();
        inner.cursor = 0.0;
        inner.finished = false;
        inner.is_playing = false;
    }

    pub fn duration(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        inner.samples.len() as f64 / inner.sample_rate as f64
    }

    pub fn current_time(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        inner.cursor / inner.sample_rate as f64
    }

    /// Position in seconds, already clamped by the caller.
    pub fn set_position_secs(&self, seconds: f64) {
        let mut inner = self.inner.lock().unwrap();
        let max = inner.samples.len() as f64;
        inner.cursor = (seconds * inner.sample_rate as f64).clamp(0.0, max);
        inner.finished = false;
    }

    pub fn set_rate(&self, rate: f32) {
        self.inner.lock().unwrap().rate = rate;
    }

    pub fn rate(&self) -> f32 {
        self.inner.lock().unwrap().rate
    }

    pub fn set_volume(&self, volume: f32) {
        self.inner.lock().unwrap().volume = volume.clamp(0.0, 1.0);
    }

    pub fn volume(&self) -> f32 {
        self.inner.lock().unwrap().volume
    }

    pub fn is_playing(&self) -> bool {
        self.inner.lock().unwrap().is_playing
    }

    pub fn set_playing(&self, playing: bool) {
        self.inner.lock().unwrap().is_playing = playing;
    }

    /// True exactly once after playback ran off the end.
    pub fn take_finished(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        std::mem::take(&mut inner.finished)
    }

    /// Pull up to `count` output frames, applying rate and volume.
    ///
    /// Returns `None` once the session is exhausted; the cursor resets to
    /// the start and `is_playing` drops so transport state can settle.
    pub fn next_frames(&self, count: usize) -> Option<Vec<f32>> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.is_playing {
            return None;
        }
        let len = inner.samples.len();
        if len == 0 || inner.cursor >= len as f64 {
            inner.is_playing = false;
            inner.finished = true;
            inner.cursor = 0.0;
            return None;
        }

        let mut frames = Vec::with_capacity(count);
        for _ in 0..count {
            let index = inner.cursor as usize;
            if index >= len {
                break;
            }
            frames.push(inner.samples[index] * inner.volume);
            inner.cursor += inner.rate as f64;
        }

        if inner.cursor >= len as f64 {
            inner.is_playing = false;
            inner.finished = true;
            inner.cursor = 0.0;
        }

        Some(frames)
    }
}

impl Default for SharedPlaybackState {
    fn default() -> Self {
        Self::new()
    }
}

/// PipeWire playback backend
pub struct PipewireSink {
    is_running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    sender: Option<pw::channel::Sender<PlaybackCommand>>,
}

enum PlaybackCommand {
    Stop,
}

impl PipewireSink {
    pub fn new() -> Self {
        Self {
            is_running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            sender: None,
        }
    }
}

impl Default for PipewireSink {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackSink for PipewireSink {
    fn start(&mut self, state: SharedPlaybackState) -> AudioResult<()> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(AudioError::InvalidInput("playback already running".into()));
        }

        self.is_running.store(true, Ordering::SeqCst);
        let is_running = self.is_running.clone();

        let (sender, receiver) = pw::channel::channel::<PlaybackCommand>();
        self.sender = Some(sender);

        let handle = thread::spawn(move || {
            if let Err(e) = run_playback_loop(state.clone(), receiver) {
                log::error!("playback backend failed: {}", e);
                state.set_playing(false);
            }
            is_running.store(false, Ordering::SeqCst);
        });

        self.thread_handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(PlaybackCommand::Stop);
        }
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
        self.is_running.store(false, Ordering::SeqCst);
    }
}

impl Drop for PipewireSink {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Run the PipeWire playback loop in a background thread
fn run_playback_loop(
    state: SharedPlaybackState,
    receiver: pw::channel::Receiver<PlaybackCommand>,
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
        PlaybackCommand::Stop => {
            if let Some(mainloop) = mainloop_weak.upgrade() {
                mainloop.quit();
            }
        }
    });

    struct UserData {
        format: spa::param::audio::AudioInfoRaw,
        state: SharedPlaybackState,
        mainloop_weak: pw::main_loop::MainLoopWeak,
    }

    let user_data = UserData {
        format: Default::default(),
        state: state.clone(),
        mainloop_weak: mainloop.downgrade(),
    };

    let props = pw::properties::properties! {
        *pw::keys::MEDIA_TYPE => "Audio",
        *pw::keys::MEDIA_CATEGORY => "Playback",
        *pw::keys::MEDIA_ROLE => "Communication",
        *pw::keys::APP_NAME => "ChatVoz",
    };

    let stream = pw::stream::StreamBox::new(&core, "chatvoz-playback", props)
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
                log::warn!("failed to parse playback format: {:?}", e);
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
            let n_channels = user_data.format.channels().max(1) as usize;
            let stride = std::mem::size_of::<f32>() * n_channels;

            let Some(slice) = data.data() else {
                return;
            };

            let n_frames = slice.len() / stride;

            match user_data.state.next_frames(n_frames) {
                Some(frames) => {
                    // Duplicate the mono signal across all output channels
                    for (i, &sample) in frames.iter().enumerate() {
                        let bytes = sample.to_le_bytes();
                        for ch in 0..n_channels {
                            let offset = i * stride + ch * std::mem::size_of::<f32>();
                            if offset + 4 <= slice.len() {
                                slice[offset..offset + 4].copy_from_slice(&bytes);
                            }
                        }
                    }
                    let written = frames.len() * stride;
                    if written < slice.len() {
                        slice[written..].fill(0);
                    }

                    let chunk = data.chunk_mut();
                    *chunk.offset_mut() = 0;
                    *chunk.stride_mut() = stride as i32;
                    *chunk.size_mut() = (frames.len() * stride) as u32;
                }
                None => {
                    // Session drained: let the mainloop exit
                    if let Some(mainloop) = user_data.mainloop_weak.upgrade() {
                        mainloop.quit();
                    }
                }
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
            spa::utils::Direction::Output,
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
