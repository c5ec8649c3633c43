//! ChatVoz core: voice recording, playback, synthetic audio and local
//! message distribution.
//!
//! The state machines (`VoiceRecorder`, `AudioPlayer`, `ChatStore`) are
//! clone-able handles around shared inner state, backed by PipeWire for
//! real audio I/O and by trait seams (`CaptureSource`, `PlaybackSink`)
//! everywhere else.

pub mod audio;
pub mod chat;
pub mod error;
pub mod models;
pub mod settings;
pub mod simulator;
pub mod synth;
