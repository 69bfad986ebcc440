//! Microphone capture: fixed-size frame pulls, loudness metering, and
//! outbound chunk delivery.
//!
//! The frame pump runs on a dedicated OS thread (NOT a tokio task) so a
//! blocking device read never stalls async network tasks; encoded chunks
//! cross into the async side over an mpsc channel.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::audio::codec;
use crate::audio::device::AudioInputDevice;
use crate::transport::OutboundAudio;

/// Instantaneous loudness published by the capture loop.
///
/// Single writer (the capture loop), any number of UI readers; updates are
/// atomic scalar replacement of the f32 bits, no locking.
#[derive(Clone, Default)]
pub struct LoudnessMeter(Arc<AtomicU32>);

impl LoudnessMeter {
    /// Latest loudness value in [0, 1].
    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn set(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Pulls fixed-size frames from a live input device, meters them, and
/// encodes unmuted frames for the outbound transport.
pub struct CaptureSource {
    device: Box<dyn AudioInputDevice>,
    frame_size: usize,
    loudness_gain: f32,
    muted: Arc<AtomicBool>,
    loudness: LoudnessMeter,
}

impl CaptureSource {
    pub fn new(
        device: Box<dyn AudioInputDevice>,
        frame_size: usize,
        loudness_gain: f32,
        muted: Arc<AtomicBool>,
        loudness: LoudnessMeter,
    ) -> Self {
        Self {
            device,
            frame_size,
            loudness_gain,
            muted,
            loudness,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.device.sample_rate()
    }

    /// Meter one frame and, when unmuted, encode it for the transport.
    ///
    /// The loudness value is published regardless of mute state; a muted
    /// frame skips the encode and the transport delivery entirely.
    fn process_frame(&self, samples: &[f32]) -> Option<OutboundAudio> {
        self.loudness
            .set((rms(samples) * self.loudness_gain).min(1.0));
        if self.muted.load(Ordering::Relaxed) {
            return None;
        }
        Some(OutboundAudio {
            chunk: codec::encode(samples),
            sample_rate: self.sample_rate(),
        })
    }

    /// Pull frames until `running` clears or the receiver goes away.
    ///
    /// Runs on the dedicated capture thread spawned by the session.
    pub fn run(mut self, out_tx: mpsc::Sender<OutboundAudio>, running: &AtomicBool) -> Result<()> {
        let mut buf = vec![0.0f32; self.frame_size];
        log::info!(
            "Capture started: rate={}, frame={}",
            self.sample_rate(),
            self.frame_size,
        );

        while running.load(Ordering::Relaxed) {
            let read = self.device.read_frame(&mut buf)?;
            if read == 0 {
                continue;
            }
            if let Some(audio) = self.process_frame(&buf[..read]) {
                // A stalled consumer must never park this thread; teardown
                // joins it. Late frames are dropped instead.
                match out_tx.try_send(audio) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        log::warn!("Outbound channel full, dropping capture frame");
                    }
                    Err(TrySendError::Closed(_)) => {
                        log::warn!("Outbound receiver dropped, stopping capture");
                        break;
                    }
                }
            }
        }

        log::info!("Capture stopped");
        Ok(())
    }
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_of_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_of_squares / samples.len() as f32).sqrt()
}
