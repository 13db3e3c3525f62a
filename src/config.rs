//! Configuration management for the rhythm engine
//!
//! Runtime configuration is loaded from JSON so tempo defaults, scheduling
//! windows and mix offsets can be tuned without recompiling. Every field has a
//! default, so partial files are accepted.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Upper bound on the look-ahead window; each pass queues every beat inside it
const MAX_LOOKAHEAD_MS: f64 = 2000.0;
/// Upper bound on the scheduling period, so two periods fit the window
const MAX_SCHEDULER_INTERVAL_MS: u64 = 500;

/// Complete engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RhythmConfig {
    pub transport: TransportConfig,
    pub mix: MixConfig,
    pub visual: VisualConfig,
    pub audio: AudioConfig,
}

/// Who drives the look-ahead scheduling pass
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerMode {
    /// The engine owns a scheduler thread ticking every `scheduler_interval_ms`
    Threaded,
    /// The host calls `RhythmEngine::tick()` from its own loop
    Manual,
}

/// Who drives the visual beat dispatch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VisualDispatchMode {
    /// The engine owns a frame pump thread at `frame_rate_hz`
    Pump,
    /// The host calls `RhythmEngine::dispatch_frame()` once per rendered frame
    Host,
}

/// Look-ahead transport parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    /// Tempo used until the host supplies one
    pub default_tempo_bpm: f64,
    /// How far ahead of the audio clock beats are handed to the backend
    pub lookahead_ms: f64,
    /// Period of the scheduling pass
    pub scheduler_interval_ms: u64,
    /// Gap between start() and the first beat
    pub start_delay_ms: f64,
    /// Duration of the linear tempo ramp applied by set_tempo() while running
    pub tempo_ramp_ms: f64,
    pub scheduler_mode: SchedulerMode,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            default_tempo_bpm: 120.0,
            lookahead_ms: 100.0,
            scheduler_interval_ms: 25,
            start_delay_ms: 50.0,
            tempo_ramp_ms: 500.0,
            scheduler_mode: SchedulerMode::Threaded,
        }
    }
}

/// Volume and layer balance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MixConfig {
    /// Initial UI volume (0-100)
    pub default_volume: f32,
    pub metronome_click_enabled: bool,
    /// Click level relative to the kick
    pub click_offset_db: f32,
    /// Attenuation applied at 1% volume; 0% is hard mute
    pub min_volume_db: f32,
    pub ambient_enabled: bool,
    /// Ambient pad level relative to the kick
    pub ambient_offset_db: f32,
}

impl Default for MixConfig {
    fn default() -> Self {
        Self {
            default_volume: 70.0,
            metronome_click_enabled: true,
            click_offset_db: -5.0,
            min_volume_db: -40.0,
            ambient_enabled: false,
            ambient_offset_db: -24.0,
        }
    }
}

/// Visual beat dispatch parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VisualConfig {
    pub dispatch_mode: VisualDispatchMode,
    /// Frame pump rate when `dispatch_mode` is `pump`
    pub frame_rate_hz: f64,
    /// Shifts visual dispatch later to compensate for output latency
    pub latency_offset_ms: f64,
    /// Buffer size of the async beat broadcast channel
    pub broadcast_capacity: usize,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            dispatch_mode: VisualDispatchMode::Pump,
            frame_rate_hz: 60.0,
            latency_offset_ms: 0.0,
            broadcast_capacity: 64,
        }
    }
}

/// Audio graph configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate for backends that choose their own (offline, Android)
    pub sample_rate: u32,
    /// Capacity of the lock-free sound event queue
    pub event_queue_capacity: usize,
    /// Maximum simultaneously sounding voices
    pub max_voices: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            event_queue_capacity: 64,
            max_voices: 16,
        }
    }
}

impl RhythmConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// The parsed configuration, or defaults if the file is missing or invalid.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RhythmConfig>(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config.sanitized()
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Load configuration for the current platform
    #[cfg(not(target_os = "android"))]
    pub fn load() -> Self {
        Self::load_from_file("assets/rhythm_config.json")
    }

    /// Android bundles no config file; defaults apply.
    #[cfg(target_os = "android")]
    pub fn load() -> Self {
        log::info!("[Config] Using default configuration on Android");
        Self::default()
    }

    /// Repair values that would break scheduling.
    ///
    /// The look-ahead window must outlast one scheduler interval, otherwise
    /// beats can fall between two passes and arrive late.
    pub fn sanitized(mut self) -> Self {
        let defaults = RhythmConfig::default();

        if !(self.transport.default_tempo_bpm.is_finite() && self.transport.default_tempo_bpm > 0.0)
        {
            log::warn!(
                "[Config] default_tempo_bpm {} invalid, using {}",
                self.transport.default_tempo_bpm,
                defaults.transport.default_tempo_bpm
            );
            self.transport.default_tempo_bpm = defaults.transport.default_tempo_bpm;
        }
        if self.transport.scheduler_interval_ms == 0 {
            self.transport.scheduler_interval_ms = defaults.transport.scheduler_interval_ms;
        }
        self.transport.scheduler_interval_ms = self
            .transport
            .scheduler_interval_ms
            .min(MAX_SCHEDULER_INTERVAL_MS);
        let min_lookahead = self.transport.scheduler_interval_ms as f64 * 2.0;
        if !(self.transport.lookahead_ms >= min_lookahead) {
            log::warn!(
                "[Config] lookahead_ms {} shorter than two scheduler intervals, raising to {}",
                self.transport.lookahead_ms,
                min_lookahead
            );
            self.transport.lookahead_ms = min_lookahead;
        }
        if self.transport.lookahead_ms > MAX_LOOKAHEAD_MS {
            log::warn!(
                "[Config] lookahead_ms {} too long, capping at {}",
                self.transport.lookahead_ms,
                MAX_LOOKAHEAD_MS
            );
            self.transport.lookahead_ms = MAX_LOOKAHEAD_MS;
        }
        if !(self.transport.start_delay_ms >= 0.0) {
            self.transport.start_delay_ms = defaults.transport.start_delay_ms;
        }
        if !(self.transport.tempo_ramp_ms >= 0.0) {
            self.transport.tempo_ramp_ms = defaults.transport.tempo_ramp_ms;
        }

        self.mix.default_volume = if self.mix.default_volume.is_finite() {
            self.mix.default_volume.clamp(0.0, 100.0)
        } else {
            defaults.mix.default_volume
        };
        // The click must stay below the kick
        if !(self.mix.click_offset_db < 0.0) {
            log::warn!(
                "[Config] click_offset_db {} not negative, using {}",
                self.mix.click_offset_db,
                defaults.mix.click_offset_db
            );
            self.mix.click_offset_db = defaults.mix.click_offset_db;
        }
        if !(self.mix.min_volume_db < 0.0) {
            self.mix.min_volume_db = defaults.mix.min_volume_db;
        }

        if !(self.visual.frame_rate_hz > 0.0) {
            self.visual.frame_rate_hz = defaults.visual.frame_rate_hz;
        }
        if !self.visual.latency_offset_ms.is_finite() {
            self.visual.latency_offset_ms = 0.0;
        }
        self.visual.broadcast_capacity = self.visual.broadcast_capacity.max(1);

        if self.audio.sample_rate == 0 {
            self.audio.sample_rate = defaults.audio.sample_rate;
        }
        self.audio.event_queue_capacity = self.audio.event_queue_capacity.max(4);
        self.audio.max_voices = self.audio.max_voices.max(2);

        self
    }

    pub fn lookahead_secs(&self) -> f64 {
        self.transport.lookahead_ms / 1000.0
    }

    pub fn start_delay_secs(&self) -> f64 {
        self.transport.start_delay_ms / 1000.0
    }

    pub fn tempo_ramp_secs(&self) -> f64 {
        self.transport.tempo_ramp_ms / 1000.0
    }
}
