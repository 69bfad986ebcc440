//! Device seams for audio I/O.
//!
//! Concrete backends (ALSA, cpal, a browser audio graph) vary per platform;
//! the engine only needs a blocking frame pull on the capture side and a
//! clocked fragment scheduler on the playback side.

use anyhow::Result;
use async_trait::async_trait;

use crate::error::EngineError;

/// A live input device delivering mono f32 samples at a fixed rate.
pub trait AudioInputDevice: Send {
    /// Sample rate of the frames this device produces, in Hz.
    fn sample_rate(&self) -> u32;

    /// Block until samples are available and fill `buf`. Returns the number
    /// of samples written; a short or zero-length read is allowed while the
    /// device is winding down.
    fn read_frame(&mut self, buf: &mut [f32]) -> Result<usize>;
}

/// Grants access to an input device.
///
/// Acquisition (permission prompt, device open) is the only suspending
/// operation in a session; everything after it is driven by device and
/// transport callbacks.
#[async_trait]
pub trait AudioInputSource: Send {
    async fn acquire(
        &mut self,
        sample_rate: u32,
    ) -> Result<Box<dyn AudioInputDevice>, EngineError>;
}

/// An output device exposing a continuous clock and clock-addressed playback.
pub trait AudioOutputDevice: Send {
    /// Current position of the device clock, in seconds.
    fn current_time(&self) -> f64;

    /// Schedule `samples` to begin playing at `start_time` on the device
    /// clock. The device plays the fragment to completion unless the
    /// returned handle is stopped first.
    fn schedule_fragment(
        &mut self,
        samples: Vec<f32>,
        start_time: f64,
    ) -> Box<dyn FragmentHandle>;
}

/// Handle to one scheduled fragment.
pub trait FragmentHandle: Send {
    /// Halt playback of this fragment immediately. Stopping a fragment that
    /// already finished must be a safe no-op.
    fn stop(&mut self);
}
