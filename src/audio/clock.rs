//! Audio clock shared between the control side and the audio thread
//!
//! The renderer advances the frame counter after every block it produces, so
//! `now_secs()` is the position of the audio stream itself, immune to jitter
//! of whichever thread reads it. The same struct carries the transport epoch
//! (bumped on stop to invalidate queued events) and the ambient target gain.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

#[derive(Debug)]
pub struct AudioClock {
    sample_rate: u32,
    /// Frames rendered since the graph was built
    frames: AtomicU64,
    /// Transport generation; events from older epochs never start
    epoch: AtomicU64,
    /// Ambient target gain as f32 bits
    ambient_gain: AtomicU32,
    /// Events the renderer had no room to hold since the last `take_overflow`
    overflow: AtomicU64,
}

impl AudioClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frames: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
            ambient_gain: AtomicU32::new(0.0_f32.to_bits()),
            overflow: AtomicU64::new(0),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    /// Called by the renderer once a block has been produced.
    pub fn advance(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::Release);
    }

    /// Current audio-clock time in seconds.
    pub fn now_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Audio-clock time to the nearest frame index.
    pub fn time_to_frame(&self, secs: f64) -> u64 {
        if secs <= 0.0 {
            return 0;
        }
        (secs * self.sample_rate as f64).round() as u64
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Invalidate every queued event. Returns the new epoch.
    pub fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn set_ambient_gain(&self, gain: f32) {
        self.ambient_gain.store(gain.to_bits(), Ordering::Relaxed);
    }

    pub fn ambient_gain(&self) -> f32 {
        f32::from_bits(self.ambient_gain.load(Ordering::Relaxed))
    }

    /// Called by the renderer when an event is discarded for lack of room.
    pub fn note_overflow(&self) {
        self.overflow.fetch_add(1, Ordering::Relaxed);
    }

    /// Read and reset the overflow count.
    pub fn take_overflow(&self) -> u64 {
        self.overflow.swap(0, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances_in_frames() {
        let clock = AudioClock::new(48000);
        assert_eq!(clock.now_secs(), 0.0);
        clock.advance(24000);
        assert_eq!(clock.frames(), 24000);
        assert!((clock.now_secs() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_time_to_frame_rounds() {
        let clock = AudioClock::new(48000);
        assert_eq!(clock.time_to_frame(0.5), 24000);
        assert_eq!(clock.time_to_frame(1.0 / 96000.0), 1);
        assert_eq!(clock.time_to_frame(-3.0), 0);
    }

    #[test]
    fn test_epoch_bumps_monotonically() {
        let clock = AudioClock::new(44100);
        assert_eq!(clock.epoch(), 0);
        assert_eq!(clock.bump_epoch(), 1);
        assert_eq!(clock.bump_epoch(), 2);
        assert_eq!(clock.epoch(), 2);
    }

    #[test]
    fn test_ambient_gain_roundtrips_through_bits() {
        let clock = AudioClock::new(48000);
        clock.set_ambient_gain(0.125);
        assert_eq!(clock.ambient_gain(), 0.125);
    }
}
