//! Gapless playback scheduling for asynchronously arriving fragments.
//!
//! Fragments arrive with bursty, variable timing from the network. The
//! scheduler places each one on the output device clock at
//! `max(now, next_start_time)` and advances the cursor by the fragment
//! duration, so playback is back-to-back when arrival outpaces real time
//! and never overlaps. When the upstream stalls, the gap is left silent;
//! no filler audio is synthesized.

use std::collections::VecDeque;

use crate::audio::device::{AudioOutputDevice, FragmentHandle};

struct Pending {
    handle: Box<dyn FragmentHandle>,
    end_time: f64,
}

/// Schedules decoded fragments onto an output device.
///
/// Single writer: the cursor and pending set are mutated only through this
/// type, from whichever task drives the inbound stream.
pub struct PlaybackScheduler {
    device: Box<dyn AudioOutputDevice>,
    sample_rate: u32,
    next_start_time: f64,
    pending: VecDeque<Pending>,
    was_playing: bool,
}

impl PlaybackScheduler {
    pub fn new(device: Box<dyn AudioOutputDevice>, sample_rate: u32) -> Self {
        Self {
            device,
            sample_rate,
            next_start_time: 0.0,
            pending: VecDeque::new(),
            was_playing: false,
        }
    }

    /// Reset the cursor to the device clock. Called once when a new
    /// streaming session begins, never between fragments.
    pub fn begin_stream(&mut self) {
        self.next_start_time = self.device.current_time();
        log::info!("Playback stream started at t={:.3}", self.next_start_time);
    }

    /// Schedule one decoded fragment and return the start time chosen for
    /// it. Fragments are scheduled strictly in arrival order.
    pub fn enqueue(&mut self, samples: Vec<f32>) -> f64 {
        self.reap();
        let duration = samples.len() as f64 / self.sample_rate as f64;
        let now = self.device.current_time();
        let start = now.max(self.next_start_time);
        let handle = self.device.schedule_fragment(samples, start);
        self.next_start_time = start + duration;
        self.pending.push_back(Pending {
            handle,
            end_time: self.next_start_time,
        });
        self.was_playing = true;
        start
    }

    /// Drop fragments whose scheduled end has passed on the device clock.
    fn reap(&mut self) {
        let now = self.device.current_time();
        while self.pending.front().is_some_and(|p| p.end_time <= now) {
            self.pending.pop_front();
        }
    }

    /// True exactly once when the pending set empties after having been
    /// non-empty. Drives a UI "speaking" indicator back to idle.
    pub fn poll_drained(&mut self) -> bool {
        self.reap();
        if self.was_playing && self.pending.is_empty() {
            self.was_playing = false;
            true
        } else {
            false
        }
    }

    /// Number of fragments scheduled but not yet finished.
    pub fn pending_len(&mut self) -> usize {
        self.reap();
        self.pending.len()
    }

    /// Cursor position: the next gapless start time on the device clock.
    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    /// Halt every pending fragment and reset the cursor to zero.
    ///
    /// Safe to call at any time, repeatedly, and with nothing pending.
    /// Fragments that finished on their own are already out of the set;
    /// stopping one that races to completion is a no-op per the
    /// [`FragmentHandle`] contract.
    pub fn stop(&mut self) {
        self.reap();
        for mut pending in self.pending.drain(..) {
            pending.handle.stop();
        }
        self.next_start_time = 0.0;
        self.was_playing = false;
    }
}
