//! Renderer - real-time mixing of scheduled one-shots
//!
//! Runs inside the platform audio callback. Each block it:
//! 1. Drains the sound event queue into a pre-allocated pending list
//! 2. Drops pending events from a cancelled transport epoch
//! 3. Mixes the ambient pad, sounding voices, and events starting in this block
//! 4. Advances the audio clock by the block length
//!
//! # Real-Time Safety
//! - No allocations: `pending` and `voices` are sized at construction
//! - No locks: events arrive via rtrb, epoch and ambient gain via atomics
//! - Bounded work: at most `max_voices` voices and the queue capacity of events

use std::sync::Arc;

use super::clock::AudioClock;
use super::event::{EventConsumer, SoundEvent};
use super::synth::{AmbientLayer, SoundBank, SoundKind};

#[derive(Debug, Clone, Copy)]
struct Voice {
    kind: SoundKind,
    position: usize,
    gain: f32,
}

pub struct Renderer {
    clock: Arc<AudioClock>,
    events: EventConsumer,
    bank: Arc<SoundBank>,
    ambient: AmbientLayer,
    pending: Vec<SoundEvent>,
    pending_limit: usize,
    voices: Vec<Voice>,
    max_voices: usize,
}

impl Renderer {
    /// Create a renderer for one output stream.
    ///
    /// # Arguments
    /// * `clock` - Audio clock advanced after every block
    /// * `events` - Consumer end of the sound event queue
    /// * `bank` - Pre-rendered kick and click buffers
    /// * `max_voices` - Polyphony limit; the oldest voice is stolen beyond it
    /// * `pending_capacity` - Events held while waiting for their start frame
    pub fn new(
        clock: Arc<AudioClock>,
        events: EventConsumer,
        bank: Arc<SoundBank>,
        max_voices: usize,
        pending_capacity: usize,
    ) -> Self {
        let sample_rate = clock.sample_rate();
        let max_voices = max_voices.max(1);
        let pending_limit = pending_capacity.max(1);
        Self {
            clock,
            events,
            bank,
            ambient: AmbientLayer::new(sample_rate),
            pending: Vec::with_capacity(pending_limit),
            pending_limit,
            voices: Vec::with_capacity(max_voices),
            max_voices,
        }
    }

    pub fn clock(&self) -> &Arc<AudioClock> {
        &self.clock
    }

    /// Number of voices still sounding after the last block.
    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Render one mono block and advance the audio clock.
    pub fn render(&mut self, out: &mut [f32]) {
        // Real-time audio callback - NO ALLOCATIONS, LOCKS, OR BLOCKING!
        let block_start = self.clock.frames();
        let block_end = block_start + out.len() as u64;

        while let Ok(event) = self.events.pop() {
            if self.pending.len() < self.pending_limit {
                self.pending.push(event);
            } else {
                self.clock.note_overflow();
            }
        }
        // Loaded after the drain: a stop/start pair racing this block leaves
        // its fresh events at or above the loaded epoch.
        let epoch = self.clock.epoch();
        self.pending.retain(|event| event.epoch >= epoch);

        let ambient_target = self.clock.ambient_gain();
        for sample in out.iter_mut() {
            *sample = self.ambient.next_sample(ambient_target);
        }

        for voice in self.voices.iter_mut() {
            mix_voice(voice, self.bank.samples(voice.kind), out);
        }

        let mut i = 0;
        while i < self.pending.len() {
            let event = self.pending[i];
            if event.start_frame >= block_end {
                i += 1;
                continue;
            }
            self.pending.swap_remove(i);

            // Late events start at the top of the block rather than being lost
            let offset = event.start_frame.saturating_sub(block_start) as usize;
            let samples = self.bank.samples(event.kind);
            let mut voice = Voice {
                kind: event.kind,
                position: 0,
                gain: event.gain,
            };
            mix_voice(&mut voice, samples, &mut out[offset..]);

            if self.voices.len() == self.max_voices {
                self.voices.remove(0);
            }
            self.voices.push(voice);
        }

        let bank = &self.bank;
        self.voices
            .retain(|voice| voice.position < bank.samples(voice.kind).len());

        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        self.clock.advance(out.len() as u64);
    }
}

#[inline]
fn mix_voice(voice: &mut Voice, samples: &[f32], out: &mut [f32]) {
    let remaining = &samples[voice.position.min(samples.len())..];
    let n = remaining.len().min(out.len());
    for (o, s) in out[..n].iter_mut().zip(&remaining[..n]) {
        *o += s * voice.gain;
    }
    voice.position += n;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::event::{event_queue, EventSender};

    const SR: u32 = 48000;

    fn setup(max_voices: usize) -> (EventSender, Renderer, Arc<SoundBank>) {
        let clock = Arc::new(AudioClock::new(SR));
        let (sender, consumer) = event_queue(16, Arc::clone(&clock));
        let bank = Arc::new(SoundBank::new(SR));
        let renderer = Renderer::new(clock, consumer, Arc::clone(&bank), max_voices, 32);
        (sender, renderer, bank)
    }

    #[test]
    fn test_event_starts_on_exact_frame() {
        let (sender, mut renderer, bank) = setup(4);
        sender.schedule(SoundKind::Click, 100.0 / SR as f64, 0.5).unwrap();

        let mut out = vec![0.0; 512];
        renderer.render(&mut out);

        assert!(out[..100].iter().all(|&s| s == 0.0));
        for (i, &expected) in bank.samples(SoundKind::Click)[..412].iter().enumerate() {
            assert!((out[100 + i] - expected * 0.5).abs() < 1e-6);
        }
        assert_eq!(renderer.clock().frames(), 512);
    }

    #[test]
    fn test_voice_tail_continues_across_blocks() {
        let (sender, mut renderer, bank) = setup(4);
        sender.schedule(SoundKind::Kick, 0.0, 1.0).unwrap();

        let mut first = vec![0.0; 256];
        let mut second = vec![0.0; 256];
        renderer.render(&mut first);
        renderer.render(&mut second);

        let kick = bank.samples(SoundKind::Kick);
        assert!((second[0] - kick[256]).abs() < 1e-6);
        assert!((second[255] - kick[511]).abs() < 1e-6);
        assert_eq!(renderer.active_voices(), 1);
    }

    #[test]
    fn test_future_event_waits_for_its_block() {
        let (sender, mut renderer, _bank) = setup(4);
        sender.schedule(SoundKind::Click, 0.02, 1.0).unwrap();

        let mut out = vec![0.0; 480];
        renderer.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));

        renderer.render(&mut out);
        renderer.render(&mut out);
        assert!(out.iter().any(|&s| s != 0.0));
    }

    #[test]
    fn test_stale_epoch_events_are_dropped() {
        let (sender, mut renderer, _bank) = setup(4);
        sender.schedule(SoundKind::Kick, 0.001, 1.0).unwrap();
        renderer.clock().bump_epoch();

        let mut out = vec![0.0; 1024];
        renderer.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(renderer.active_voices(), 0);
    }

    #[test]
    fn test_sounding_voice_survives_epoch_bump() {
        let (sender, mut renderer, _bank) = setup(4);
        sender.schedule(SoundKind::Kick, 0.0, 1.0).unwrap();

        let mut out = vec![0.0; 256];
        renderer.render(&mut out);
        renderer.clock().bump_epoch();
        renderer.render(&mut out);

        assert!(out.iter().any(|&s| s != 0.0), "tail must ring out");
    }

    #[test]
    fn test_event_from_newer_epoch_is_kept() {
        let clock = Arc::new(AudioClock::new(SR));
        let (mut producer, consumer) = rtrb::RingBuffer::new(4);
        let bank = Arc::new(SoundBank::new(SR));
        let mut renderer = Renderer::new(Arc::clone(&clock), consumer, Arc::clone(&bank), 4, 8);

        // Stamped by a start() whose epoch bump the block has not observed yet
        producer
            .push(SoundEvent {
                kind: SoundKind::Click,
                start_frame: 0,
                gain: 1.0,
                epoch: clock.epoch() + 1,
            })
            .unwrap();

        let mut out = vec![0.0; 256];
        renderer.render(&mut out);
        assert!((out[1] - bank.samples(SoundKind::Click)[1]).abs() < 1e-6);
        assert_eq!(renderer.active_voices(), 1);
    }

    #[test]
    fn test_pending_overflow_is_counted() {
        let clock = Arc::new(AudioClock::new(SR));
        let (sender, consumer) = event_queue(8, Arc::clone(&clock));
        let bank = Arc::new(SoundBank::new(SR));
        let mut renderer = Renderer::new(Arc::clone(&clock), consumer, bank, 4, 2);

        for i in 0..5 {
            sender.schedule(SoundKind::Kick, 1.0 + i as f64, 1.0).unwrap();
        }
        let mut out = vec![0.0; 64];
        renderer.render(&mut out);

        assert_eq!(clock.take_overflow(), 3);
        assert_eq!(clock.take_overflow(), 0);
    }

    #[test]
    fn test_late_event_plays_at_block_start() {
        let (sender, mut renderer, bank) = setup(4);
        let mut out = vec![0.0; 1024];
        renderer.render(&mut out);

        sender.schedule(SoundKind::Click, 0.0, 1.0).unwrap();
        renderer.render(&mut out);
        assert!((out[1] - bank.samples(SoundKind::Click)[1]).abs() < 1e-6);
    }

    #[test]
    fn test_voice_limit_steals_oldest() {
        let (sender, mut renderer, _bank) = setup(2);
        for _ in 0..3 {
            sender.schedule(SoundKind::Kick, 0.0, 0.1).unwrap();
        }
        let mut out = vec![0.0; 64];
        renderer.render(&mut out);
        assert_eq!(renderer.active_voices(), 2);
    }

    #[test]
    fn test_output_is_clamped() {
        let (sender, mut renderer, _bank) = setup(16);
        for _ in 0..12 {
            sender.schedule(SoundKind::Kick, 0.0, 1.0).unwrap();
        }
        let mut out = vec![0.0; 2048];
        renderer.render(&mut out);
        assert!(out.iter().all(|s| (-1.0..=1.0).contains(s)));
    }
}
