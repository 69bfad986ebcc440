//! voicelink - real-time duplex audio streaming engine
//!
//! Converts between f32 samples and a transport-safe base64/PCM16 chunk
//! encoding, schedules bursty inbound audio fragments for gapless playback
//! on an output device clock, and derives an instantaneous loudness signal
//! for UI feedback. OS audio backends and the remote duplex service live
//! behind traits; this crate owns only the codec, scheduling, and session
//! logic between them.

pub mod audio;
pub mod config;
pub mod error;
pub mod session;
pub mod transport;

pub use audio::capture::{CaptureSource, LoudnessMeter};
pub use audio::device::{AudioInputDevice, AudioInputSource, AudioOutputDevice, FragmentHandle};
pub use audio::playback::PlaybackScheduler;
pub use config::EngineConfig;
pub use error::{DecodeError, EngineError};
pub use session::{Session, SessionState, TtsPlayback};
pub use transport::{DuplexTransport, OutboundAudio, TransportEvent};
