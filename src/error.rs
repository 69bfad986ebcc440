//! Typed error taxonomy for the streaming engine.

use thiserror::Error;

/// Faults that end a session. The owning session moves to its Error state;
/// there is no internal retry (callers may close and reopen).
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Audio device unavailable: {0}")]
    DeviceAcquisition(String),

    #[error("Transport failure: {0}")]
    Transport(String),
}

/// A single malformed inbound chunk.
///
/// Decode failures drop that fragment only; playback continues with
/// subsequent fragments and the session never fails because of one.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Invalid chunk encoding: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),

    #[error("Chunk byte length {0} is not a multiple of 2")]
    TruncatedSamples(usize),
}
