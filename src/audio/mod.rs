//! audio - sample codec, device seams, capture, and playback scheduling.
//!
//! The codec converts between f32 frames and the transport-safe chunk
//! encoding; capture and playback talk to platform backends only through
//! the traits in `device`.

pub mod capture;
pub mod codec;
pub mod device;
pub mod playback;
