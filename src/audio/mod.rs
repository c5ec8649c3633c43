//! Audio capture, playback and container handling using PipeWire
//!
//! This module provides:
//! - Microphone capture with a frequency-domain level tap
//! - The voice recorder and player state machines
//! - WAV (PCM16LE mono) encode/decode via hound

pub mod codec;

mod capture;
mod playback;
mod player;
mod recorder;

pub use capture::{CaptureSource, PipewireSource, SharedCaptureState};
pub use playback::{PipewireSink, PlaybackSink, SharedPlaybackState};
pub use player::{format_time, AudioInfo, AudioPlayer, PlaybackRate, PlayerPhase};
pub use recorder::{PermissionState, RecorderPhase, VoiceRecorder, DEFAULT_MAX_SECONDS};
