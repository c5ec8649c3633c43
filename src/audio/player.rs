//! Audio player state machine
//!
//! One playback session at a time: loading a new source tears the previous
//! one down first. Transport controls, bounded metadata load, a
//! per-instance 100 ms position-polling tick and derived display values.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::audio::codec;
use crate::audio::playback::{PipewireSink, PlaybackSink, SharedPlaybackState};
use crate::error::AudioError;

/// Bounded wait for source decode/metadata
const LOAD_TIMEOUT: Duration = Duration::from_secs(10);

const POLL_PERIOD: Duration = Duration::from_millis(100);

/// Default relative-seek distance in seconds
pub const DEFAULT_SKIP_SECONDS: f64 = 10.0;

/// Player lifecycle states
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PlayerPhase {
    #[default]
    Empty,
    Loading,
    Ready,
    Playing,
    Error,
}

/// The three supported playback speeds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PlaybackRate {
    #[default]
    Normal,
    OneAndHalf,
    Double,
}

impl PlaybackRate {
    pub fn as_f32(self) -> f32 {
        match self {
            PlaybackRate::Normal => 1.0,
            PlaybackRate::OneAndHalf => 1.5,
            PlaybackRate::Double => 2.0,
        }
    }

    /// Map a numeric rate to the nearest supported speed, rejecting
    /// anything that is not exactly 1, 1.5 or 2.
    pub fn from_f32(rate: f32) -> Option<Self> {
        match rate {
            r if r == 1.0 => Some(PlaybackRate::Normal),
            r if r == 1.5 => Some(PlaybackRate::OneAndHalf),
            r if r == 2.0 => Some(PlaybackRate::Double),
            _ => None,
        }
    }
}

/// Snapshot of the transport state
#[derive(Debug, Clone, PartialEq)]
pub struct AudioInfo {
    pub duration: f64,
    pub current_time: f64,
    pub playback_rate: f32,
    pub volume: f32,
    pub is_playing: bool,
    pub progress: f64,
}

/// Audio player with an instance-owned polling tick
#[derive(Clone)]
pub struct AudioPlayer {
    inner: Arc<Mutex<PlayerInner>>,
}

struct PlayerInner {
    session: SharedPlaybackState,
    sink: Box<dyn PlaybackSink>,
    phase: PlayerPhase,
    loaded: bool,
    current_time: f64,
    duration: f64,
    rate: PlaybackRate,
    volume: f32,
    error: Option<AudioError>,
    tick: Option<JoinHandle<()>>,
    /// Bumped by every `load`; a resuming load only applies if still current
    load_generation: u64,
}

impl AudioPlayer {
    pub fn new(sink: Box<dyn PlaybackSink>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PlayerInner {
                session: SharedPlaybackState::new(),
                sink,
                phase: PlayerPhase::Empty,
                loaded: false,
                current_time: 0.0,
                duration: 0.0,
                rate: PlaybackRate::Normal,
                volume: 1.0,
                error: None,
                tick: None,
                load_generation: 0,
            })),
        }
    }

    /// Player backed by the system audio output
    pub fn pipewire() -> Self {
        Self::new(Box::new(PipewireSink::new()))
    }

    /// Load a WAV source, replacing any active session.
    ///
    /// Fails fast on empty input: `InvalidInput` when nothing is loaded,
    /// otherwise the existing session is left untouched and playable.
    /// Decode runs on a blocking task bounded by 10 s; elapsing that bound
    /// is a `Timeout`, distinct from decode and format failures. When loads
    /// overlap the most recent call wins; earlier ones resolve false.
    /// Previously configured rate/volume carry over into the new session.
    pub async fn load(&self, bytes: &[u8]) -> bool {
        let generation = {
            let mut inner = self.inner.lock().unwrap();
            if bytes.is_empty() {
                log::warn!("load() rejected: empty audio source");
                // A still-loaded session stays playable
                if !inner.loaded {
                    inner.error = Some(AudioError::InvalidInput("empty audio source".into()));
                }
                return false;
            }
            Self::teardown_session(&mut inner);
            inner.phase = PlayerPhase::Loading;
            inner.load_generation = inner.load_generation.wrapping_add(1);
            inner.load_generation
        };

        let data = bytes.to_vec();
        let decoded = tokio::time::timeout(
            LOAD_TIMEOUT,
            tokio::task::spawn_blocking(move || codec::decode_wav(&data)),
        )
        .await;

        let mut inner = self.inner.lock().unwrap();
        if inner.phase != PlayerPhase::Loading || inner.load_generation != generation {
            // cleanup() or a newer load ran while we were suspended
            log::debug!("load() superseded, discarding result");
            return false;
        }

        match decoded {
            Err(_elapsed) => {
                log::error!("audio load timed out after {:?}", LOAD_TIMEOUT);
                inner.error = Some(AudioError::Timeout);
                inner.phase = PlayerPhase::Error;
                false
            }
            Ok(Err(join_err)) => {
                let error = if join_err.is_cancelled() {
                    AudioError::LoadAborted
                } else {
                    AudioError::Unknown(join_err.to_string())
                };
                log::error!("audio load failed: {}", error);
                inner.error = Some(error);
                inner.phase = PlayerPhase::Error;
                false
            }
            Ok(Ok(Err(e))) => {
                log::error!("audio load failed: {}", e);
                inner.error = Some(e);
                inner.phase = PlayerPhase::Error;
                false
            }
            Ok(Ok(Ok((samples, sample_rate)))) => {
                inner.session.load(samples, sample_rate);
                inner.session.set_rate(inner.rate.as_f32());
                inner.session.set_volume(inner.volume);
                inner.duration = inner.session.duration();
                inner.current_time = 0.0;
                inner.loaded = true;
                inner.error = None;
                inner.phase = PlayerPhase::Ready;
                log::debug!("loaded {:.2}s of audio", inner.duration);
                true
            }
        }
    }

    /// Start playback. No-op returning false with no loaded source, while
    /// loading, or in the error state.
    pub fn play(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if !inner.loaded || inner.phase == PlayerPhase::Loading || inner.error.is_some() {
            return false;
        }
        if inner.phase == PlayerPhase::Playing {
            return true;
        }

        inner.session.set_playing(true);
        let session = inner.session.clone();
        if let Err(e) = inner.sink.start(session) {
            log::error!("playback refused: {}", e);
            inner.session.set_playing(false);
            inner.error = Some(e);
            inner.phase = PlayerPhase::Error;
            return false;
        }
        inner.phase = PlayerPhase::Playing;

        // Position-polling tick; also notices natural end of playback
        let player = self.clone();
        inner.tick = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(POLL_PERIOD);
            interval.tick().await;
            loop {
                interval.tick().await;
                let mut inner = player.inner.lock().unwrap();
                if inner.phase != PlayerPhase::Playing {
                    break;
                }
                if inner.session.take_finished() {
                    inner.current_time = 0.0;
                    inner.phase = PlayerPhase::Ready;
                    inner.sink.stop();
                    inner.tick = None;
                    break;
                }
                inner.current_time = inner.session.current_time();
            }
        }));

        true
    }

    /// Pause playback; only meaningful while playing.
    pub fn pause(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.phase != PlayerPhase::Playing {
            return;
        }
        inner.session.set_playing(false);
        inner.current_time = inner.session.current_time();
        inner.sink.stop();
        if let Some(tick) = inner.tick.take() {
            tick.abort();
        }
        inner.phase = PlayerPhase::Ready;
    }

    /// Pause if playing, otherwise attempt to play. Returns the resulting
    /// playing state.
    pub fn toggle_play(&self) -> bool {
        if self.is_playing() {
            self.pause();
            false
        } else {
            self.play()
        }
    }

    /// Pause and reset the position to the start.
    pub fn stop(&self) {
        self.pause();
        let mut inner = self.inner.lock().unwrap();
        inner.session.set_position_secs(0.0);
        inner.current_time = 0.0;
    }

    /// Seek to an absolute time, clamped to `[0, duration]`. No-op while
    /// the duration is unknown.
    pub fn seek(&self, seconds: f64) {
        let mut inner = self.inner.lock().unwrap();
        if inner.duration <= 0.0 {
            return;
        }
        let clamped = seconds.clamp(0.0, inner.duration);
        inner.session.set_position_secs(clamped);
        inner.current_time = clamped;
    }

    /// Seek to a percentage of the duration, clamped to `[0, 100]`.
    pub fn seek_by_percentage(&self, percentage: f64) {
        let clamped = percentage.clamp(0.0, 100.0);
        let duration = self.inner.lock().unwrap().duration;
        self.seek(clamped / 100.0 * duration);
    }

    pub fn skip_forward(&self, seconds: f64) {
        let current = self.inner.lock().unwrap().current_time;
        self.seek(current + seconds);
    }

    pub fn skip_backward(&self, seconds: f64) {
        let current = self.inner.lock().unwrap().current_time;
        self.seek(current - seconds);
    }

    /// Store the rate and apply it to the active session, if any.
    pub fn set_playback_rate(&self, rate: PlaybackRate) {
        let mut inner = self.inner.lock().unwrap();
        inner.rate = rate;
        inner.session.set_rate(rate.as_f32());
    }

    /// Store the volume (clamped to `[0, 1]`) and apply it to the session.
    pub fn set_volume(&self, volume: f32) {
        let mut inner = self.inner.lock().unwrap();
        inner.volume = volume.clamp(0.0, 1.0);
        let v = inner.volume;
        inner.session.set_volume(v);
    }

    /// Release everything and return to the empty state. Idempotent; the
    /// configured rate and volume survive for the next session.
    pub fn cleanup(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.session.set_playing(false);
        inner.sink.stop();
        if let Some(tick) = inner.tick.take() {
            tick.abort();
        }
        inner.session.clear();
        inner.loaded = false;
        inner.current_time = 0.0;
        inner.duration = 0.0;
        inner.error = None;
        inner.phase = PlayerPhase::Empty;
    }

    // Derived values, recomputed on every call

    pub fn progress(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        if inner.duration > 0.0 {
            inner.current_time / inner.duration * 100.0
        } else {
            0.0
        }
    }

    pub fn remaining_time(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        inner.duration - inner.current_time
    }

    pub fn formatted_current_time(&self) -> String {
        format_time(self.current_time())
    }

    pub fn formatted_duration(&self) -> String {
        format_time(self.duration())
    }

    pub fn formatted_remaining_time(&self) -> String {
        format_time(self.remaining_time())
    }

    pub fn can_play(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.loaded && inner.phase != PlayerPhase::Loading && inner.error.is_none()
    }

    pub fn audio_info(&self) -> AudioInfo {
        let inner = self.inner.lock().unwrap();
        let progress = if inner.duration > 0.0 {
            inner.current_time / inner.duration * 100.0
        } else {
            0.0
        };
        AudioInfo {
            duration: inner.duration,
            current_time: inner.current_time,
            playback_rate: inner.rate.as_f32(),
            volume: inner.volume,
            is_playing: inner.phase == PlayerPhase::Playing,
            progress,
        }
    }

    pub fn phase(&self) -> PlayerPhase {
        self.inner.lock().unwrap().phase
    }

    pub fn is_playing(&self) -> bool {
        self.inner.lock().unwrap().phase == PlayerPhase::Playing
    }

    pub fn is_loading(&self) -> bool {
        self.inner.lock().unwrap().phase == PlayerPhase::Loading
    }

    pub fn current_time(&self) -> f64 {
        self.inner.lock().unwrap().current_time
    }

    pub fn duration(&self) -> f64 {
        self.inner.lock().unwrap().duration
    }

    pub fn playback_rate(&self) -> PlaybackRate {
        self.inner.lock().unwrap().rate
    }

    pub fn volume(&self) -> f32 {
        self.inner.lock().unwrap().volume
    }

    pub fn error(&self) -> Option<AudioError> {
        self.inner.lock().unwrap().error.clone()
    }

    fn teardown_session(inner: &mut PlayerInner) {
        inner.session.set_playing(false);
        inner.sink.stop();
        if let Some(tick) = inner.tick.take() {
            tick.abort();
        }
        inner.session.clear();
        inner.loaded = false;
        inner.current_time = 0.0;
        inner.duration = 0.0;
        inner.error = None;
    }
}

/// Format seconds as `M:SS`; non-finite or negative values become `0:00`.
pub fn format_time(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "0:00".to_string();
    }
    let mins = (seconds / 60.0).floor() as u64;
    let secs = (seconds % 60.0).floor() as u64;
    format!("{}:{:02}", mins, secs)
}
