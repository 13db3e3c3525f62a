//! Synth - oscillator-based kick, click and ambient pad
//!
//! Kick and click are rendered once at graph construction into immutable
//! buffers; voices in the renderer only read them back, so the audio
//! callback never evaluates oscillators for one-shots. Key features:
//! - Kick: pitch-swept sine with exponential amplitude decay and a short
//!   seeded noise transient for attack
//! - Click: short high sine burst with fast exponential decay
//! - Ambient pad: continuously running detuned sine pair with smoothed gain
//! - Pure, deterministic rendering (fixed noise seed)

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::TAU;

/// Duration of the kick one-shot in milliseconds
const KICK_DURATION_MS: f32 = 350.0;
const KICK_START_HZ: f32 = 150.0;
const KICK_END_HZ: f32 = 45.0;
/// Pitch sweep time constant in seconds
const KICK_SWEEP_TAU: f32 = 0.03;
/// Amplitude decay time constant in seconds
const KICK_DECAY_TAU: f32 = 0.12;
/// Length and level of the noise attack transient
const KICK_TRANSIENT_MS: f32 = 2.0;
const KICK_TRANSIENT_LEVEL: f32 = 0.3;

/// Duration of the click one-shot in milliseconds
const CLICK_DURATION_MS: f32 = 30.0;
const CLICK_HZ: f32 = 1000.0;
const CLICK_DECAY_TAU: f32 = 0.006;

const AMBIENT_HZ: f32 = 110.0;
const AMBIENT_DETUNE_HZ: f32 = 0.5;
/// One-pole smoothing coefficient for ambient gain changes (~10ms at 48kHz)
const AMBIENT_SMOOTHING: f32 = 0.002;

/// Kind of one-shot sound a beat can trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoundKind {
    Kick,
    Click,
}

#[inline]
fn duration_samples(sample_rate: u32, duration_ms: f32) -> usize {
    (sample_rate as f32 * duration_ms / 1000.0) as usize
}

/// Renders the kick one-shot.
///
/// # Arguments
/// * `sample_rate` - Sample rate in Hz (typically 48000)
///
/// # Returns
/// Exactly 350ms of samples in range [-1.0, 1.0]
pub fn render_kick(sample_rate: u32) -> Vec<f32> {
    let num_samples = duration_samples(sample_rate, KICK_DURATION_MS);
    let transient_samples = duration_samples(sample_rate, KICK_TRANSIENT_MS);
    let dt = 1.0 / sample_rate as f32;

    // Fixed seed keeps the transient identical across renders
    let mut rng = StdRng::seed_from_u64(42);

    let mut samples = Vec::with_capacity(num_samples);
    let mut phase = 0.0_f32;
    for i in 0..num_samples {
        let t = i as f32 * dt;
        let freq = KICK_END_HZ + (KICK_START_HZ - KICK_END_HZ) * (-t / KICK_SWEEP_TAU).exp();
        phase = (phase + freq * dt).fract();

        let envelope = (-t / KICK_DECAY_TAU).exp();
        let mut sample = (phase * TAU).sin() * envelope;

        if i < transient_samples {
            let fade = 1.0 - i as f32 / transient_samples as f32;
            sample += rng.gen_range(-1.0..1.0) * KICK_TRANSIENT_LEVEL * fade;
        }

        samples.push(sample.clamp(-1.0, 1.0));
    }

    samples
}

/// Renders the metronome click one-shot.
///
/// # Arguments
/// * `sample_rate` - Sample rate in Hz (typically 48000)
///
/// # Returns
/// Exactly 30ms of samples in range [-1.0, 1.0]
pub fn render_click(sample_rate: u32) -> Vec<f32> {
    let num_samples = duration_samples(sample_rate, CLICK_DURATION_MS);
    let dt = 1.0 / sample_rate as f32;

    (0..num_samples)
        .map(|i| {
            let t = i as f32 * dt;
            let envelope = (-t / CLICK_DECAY_TAU).exp();
            (t * CLICK_HZ * TAU).sin() * envelope
        })
        .collect()
}

/// Pre-rendered one-shot buffers shared with the audio thread.
#[derive(Debug, Clone)]
pub struct SoundBank {
    kick: Vec<f32>,
    click: Vec<f32>,
}

impl SoundBank {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            kick: render_kick(sample_rate),
            click: render_click(sample_rate),
        }
    }

    #[inline]
    pub fn samples(&self, kind: SoundKind) -> &[f32] {
        match kind {
            SoundKind::Kick => &self.kick,
            SoundKind::Click => &self.click,
        }
    }
}

/// Continuously running pad under the beat.
///
/// Gain changes are smoothed per sample so muting or unmuting never clicks.
#[derive(Debug, Clone)]
pub struct AmbientLayer {
    phase_a: f32,
    phase_b: f32,
    inc_a: f32,
    inc_b: f32,
    gain: f32,
}

impl AmbientLayer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            phase_a: 0.0,
            phase_b: 0.0,
            inc_a: AMBIENT_HZ / sample_rate as f32,
            inc_b: (AMBIENT_HZ + AMBIENT_DETUNE_HZ) / sample_rate as f32,
            gain: 0.0,
        }
    }

    /// Produce the next sample, moving the gain toward `target_gain`.
    #[inline]
    pub fn next_sample(&mut self, target_gain: f32) -> f32 {
        self.gain += (target_gain - self.gain) * AMBIENT_SMOOTHING;
        if self.gain.abs() < 1e-6 && target_gain == 0.0 {
            self.gain = 0.0;
            return 0.0;
        }

        self.phase_a = (self.phase_a + self.inc_a).fract();
        self.phase_b = (self.phase_b + self.inc_b).fract();
        let pad = 0.5 * ((self.phase_a * TAU).sin() + (self.phase_b * TAU).sin());
        pad * self.gain
    }

    pub fn current_gain(&self) -> f32 {
        self.gain
    }
}
