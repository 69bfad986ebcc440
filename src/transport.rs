//! Seam to the remote duplex service.
//!
//! The engine never speaks a wire protocol itself. It hands encoded capture
//! chunks to a [`DuplexTransport`] and consumes [`TransportEvent`]s the
//! transport surfaces from its own connection (open / message / close /
//! error), delivered over an mpsc channel.

use async_trait::async_trait;

use crate::error::EngineError;

/// One encoded capture frame, tagged with its sample rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundAudio {
    /// Transport-safe chunk as produced by the sample codec.
    pub chunk: String,
    /// Capture sample rate in Hz (16000 in the reference deployment).
    pub sample_rate: u32,
}

/// Outbound half of the duplex audio session.
#[async_trait]
pub trait DuplexTransport: Send {
    /// Deliver one outbound chunk to the remote service. A failure here is
    /// a transport fault and ends the session.
    async fn send_audio(&mut self, audio: &OutboundAudio) -> Result<(), EngineError>;
}

/// Lifecycle and payload events surfaced by the transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// Handshake with the remote service completed.
    Open,
    /// One inbound encoded chunk at the negotiated playback rate.
    Audio(String),
    /// Remote closed the stream normally.
    Close,
    /// The transport failed mid-stream.
    Error(String),
}
