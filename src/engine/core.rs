//! RhythmEngine: beat scheduling and audio/visual synchronization.
//!
//! The engine decides *what* sounds and *when* on the audio clock, then hands
//! each sound to the backend ahead of time; the renderer starts it on the
//! exact frame. Visual beat callbacks are queued at the same audio-clock time
//! and fired from a frame-aligned dispatch, so UI pulses follow the sound
//! rather than the jittery scheduling thread.
//!
//! State machine: `Uninitialized -> Stopped <-> Running -> Disposed`.
//! Only `initialize()` reports errors; every other control call logs and
//! carries on so rhythm mode never blocks gameplay.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, OnceCell};
use tokio_stream::wrappers::BroadcastStream;

use crate::audio::{GainStages, SoundKind};
use crate::config::{RhythmConfig, SchedulerMode, VisualDispatchMode};
use crate::engine::backend::{platform_factory, AudioBackend, BackendFactory};
use crate::engine::beats::{BeatEvent, BeatRegistry, BeatSubscription};
use crate::engine::ticker::Ticker;
use crate::engine::transport::Transport;
use crate::error::{log_audio_error, AudioError, ErrorCode};
use crate::telemetry::{DiagnosticError, LifecyclePhase, MetricEvent, TelemetryHub};

/// Observable engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Uninitialized,
    Stopped,
    Running,
    Disposed,
}

/// Mutable control state, serialized by one lock shared with the scheduler.
struct ControlState {
    tempo: f64,
    volume: f32,
    click_enabled: bool,
    gains: GainStages,
    transport: Option<Transport>,
    /// Bumped on every start/stop so a superseded scheduler thread can
    /// never touch a newer transport
    generation: u64,
    scheduler: Option<Ticker>,
    frame_pump: Option<Ticker>,
    last_pass: Option<Instant>,
}

struct EngineShared {
    config: RhythmConfig,
    control: Mutex<ControlState>,
    beats: Arc<BeatRegistry>,
    telemetry: Arc<TelemetryHub>,
    disposed: AtomicBool,
}

pub struct RhythmEngine {
    shared: Arc<EngineShared>,
    factory: BackendFactory,
    backend: OnceCell<Arc<dyn AudioBackend>>,
}

impl RhythmEngine {
    /// Create an engine with platform defaults.
    ///
    /// No audio resources are touched until `initialize()`.
    pub fn new() -> Self {
        Self::with_config(RhythmConfig::load())
    }

    pub fn with_config(config: RhythmConfig) -> Self {
        Self::with_backend_factory(config, platform_factory())
    }

    /// Create an engine whose audio graph is built by `factory`.
    pub fn with_backend_factory(config: RhythmConfig, factory: BackendFactory) -> Self {
        let config = config.sanitized();
        let gains = GainStages::from_volume(config.mix.default_volume, &config.mix);
        let control = ControlState {
            tempo: config.transport.default_tempo_bpm,
            volume: config.mix.default_volume,
            click_enabled: config.mix.metronome_click_enabled,
            gains,
            transport: None,
            generation: 0,
            scheduler: None,
            frame_pump: None,
            last_pass: None,
        };
        let beats = Arc::new(BeatRegistry::new(config.visual.broadcast_capacity));

        Self {
            shared: Arc::new(EngineShared {
                config,
                control: Mutex::new(control),
                beats,
                telemetry: Arc::new(TelemetryHub::default()),
                disposed: AtomicBool::new(false),
            }),
            factory,
            backend: OnceCell::new(),
        }
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Build the audio graph. Call after a user gesture.
    ///
    /// Idempotent: once it has succeeded, later calls resolve immediately and
    /// concurrent calls share one bootstrap.
    ///
    /// # Errors
    /// Returns `AudioUnavailable` if the platform backend cannot be built.
    /// The engine then stays uninitialized and a later call may retry.
    pub async fn initialize(&self) -> Result<(), AudioError> {
        if self.is_disposed() {
            log::debug!("[RhythmEngine] initialize ignored: engine disposed");
            return Ok(());
        }

        let shared = &self.shared;
        let factory = &self.factory;
        let result = self
            .backend
            .get_or_try_init(|| async move {
                let backend = factory.as_ref()(&shared.config)
                    .await
                    .map_err(AudioError::into_unavailable)?;
                shared.on_backend_ready(backend.as_ref());
                Ok::<_, AudioError>(backend)
            })
            .await;

        match result {
            Ok(backend) => {
                if self.is_disposed() {
                    // dispose() raced the bootstrap; release what was built
                    shared.release_backend(backend.as_ref());
                }
                Ok(())
            }
            Err(err) => {
                log_audio_error(&err, "initialize");
                shared
                    .telemetry
                    .record_error(DiagnosticError::AudioUnavailable, err.message());
                shared
                    .telemetry
                    .record_lifecycle(LifecyclePhase::InitializationFailed);
                Err(err)
            }
        }
    }

    /// Stop the transport, drop every listener and release the audio graph.
    /// Terminal: every later call is a no-op.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let backend = self.backend.get();
        let tickers = match (backend, self.shared.lock_control("dispose")) {
            (Some(backend), Some(mut state)) => self.shared.halt(&mut state, backend.as_ref()),
            _ => Vec::new(),
        };
        self.shared.beats.close();
        drop(tickers);

        if let Some(backend) = backend {
            self.shared.release_backend(backend.as_ref());
        }
        self.shared.telemetry.record_lifecycle(LifecyclePhase::Disposed);
        log::info!("[RhythmEngine] Disposed");
    }

    // ========================================================================
    // TRANSPORT
    // ========================================================================

    /// Start the transport at `tempo` BPM, restarting it if already running.
    pub fn start(&self, tempo: f64) {
        let Some(backend) = self.active_backend("start") else {
            return;
        };
        if !is_valid_tempo(tempo) {
            log_audio_error(&AudioError::TempoInvalid { bpm: tempo }, "start");
            return;
        }
        let Some(mut state) = self.shared.lock_control("start") else {
            return;
        };

        let superseded = self.shared.halt(&mut state, backend.as_ref());

        let config = &self.shared.config;
        let first_beat = backend.current_time() + config.start_delay_secs();
        state.tempo = tempo;
        state.transport = Some(Transport::new(tempo, first_beat));
        state.generation += 1;
        state.last_pass = None;

        // First pass runs synchronously so the opening beats are queued
        // before start() returns
        self.shared.schedule_ahead(backend.as_ref(), &mut state);

        if config.transport.scheduler_mode == SchedulerMode::Threaded {
            let shared = Arc::clone(&self.shared);
            let scheduler_backend = Arc::clone(backend);
            let generation = state.generation;
            let period = Duration::from_millis(config.transport.scheduler_interval_ms);
            match Ticker::spawn("rhythm-scheduler", period, move || {
                shared.scheduler_pass(scheduler_backend.as_ref(), generation);
            }) {
                Ok(ticker) => state.scheduler = Some(ticker),
                Err(err) => {
                    log_audio_error(&AudioError::from(err), "start scheduler");
                    let orphaned = self.shared.halt(&mut state, backend.as_ref());
                    drop(state);
                    drop(orphaned);
                    drop(superseded);
                    return;
                }
            }
        }

        if config.visual.dispatch_mode == VisualDispatchMode::Pump {
            let shared = Arc::clone(&self.shared);
            let pump_backend = Arc::clone(backend);
            let period = Duration::from_secs_f64(1.0 / config.visual.frame_rate_hz);
            match Ticker::spawn("rhythm-frame-pump", period, move || {
                shared.dispatch_due(pump_backend.as_ref());
            }) {
                Ok(ticker) => state.frame_pump = Some(ticker),
                Err(err) => log_audio_error(&AudioError::from(err), "start frame pump"),
            }
        }

        log::info!(
            "[RhythmEngine] Transport started at {} BPM, first beat at {:.3}s",
            tempo,
            first_beat
        );
        self.shared
            .telemetry
            .record_lifecycle(LifecyclePhase::TransportStarted);

        // Join superseded threads only after the control lock is released
        drop(state);
        drop(superseded);
    }

    /// Halt the transport. Queued beats that have not started never sound.
    pub fn stop(&self) {
        let Some(backend) = self.active_backend("stop") else {
            return;
        };
        let tickers = {
            let Some(mut state) = self.shared.lock_control("stop") else {
                return;
            };
            if state.transport.is_none() {
                return;
            }
            self.shared.halt(&mut state, backend.as_ref())
        };
        drop(tickers);
        log::info!("[RhythmEngine] Transport stopped");
    }

    /// Change tempo. While running the change is a linear ramp over the
    /// configured window; while stopped it applies to the next `start()`.
    pub fn set_tempo(&self, tempo: f64) {
        let Some(backend) = self.active_backend("set_tempo") else {
            return;
        };
        if !is_valid_tempo(tempo) {
            log_audio_error(&AudioError::TempoInvalid { bpm: tempo }, "set_tempo");
            return;
        }
        let Some(mut state) = self.shared.lock_control("set_tempo") else {
            return;
        };

        state.tempo = tempo;
        if let Some(transport) = state.transport.as_mut() {
            let ramp_secs = self.shared.config.tempo_ramp_secs();
            let from_bpm = transport.ramp_to(tempo, backend.current_time(), ramp_secs);
            log::info!(
                "[RhythmEngine] Tempo ramp {:.1} -> {:.1} BPM over {:.0}ms",
                from_bpm,
                tempo,
                ramp_secs * 1000.0
            );
            self.shared
                .telemetry
                .record_tempo_ramp(from_bpm, tempo, ramp_secs * 1000.0);
        }
    }

    // ========================================================================
    // MIX
    // ========================================================================

    /// Set the UI volume (0-100). 0 mutes. Affects sounds scheduled from now
    /// on; sounds already queued keep their gain.
    pub fn set_volume(&self, percent: f32) {
        let Some(backend) = self.active_backend("set_volume") else {
            return;
        };
        if !percent.is_finite() {
            log::warn!("[RhythmEngine] set_volume ignored: {} is not a number", percent);
            return;
        }
        let percent = percent.clamp(0.0, 100.0);
        let Some(mut state) = self.shared.lock_control("set_volume") else {
            return;
        };

        state.volume = percent;
        state.gains = GainStages::from_volume(percent, &self.shared.config.mix);
        backend.set_ambient_gain(state.gains.ambient);
        self.shared.telemetry.record_volume(percent, state.gains.kick);
    }

    pub fn toggle_metronome_click(&self, enabled: bool) {
        if self.active_backend("toggle_metronome_click").is_none() {
            return;
        }
        if let Some(mut state) = self.shared.lock_control("toggle_metronome_click") {
            state.click_enabled = enabled;
        }
    }

    // ========================================================================
    // BEATS
    // ========================================================================

    /// Register a beat listener. Listeners fire in registration order on the
    /// frame where their beat sounds.
    ///
    /// Valid before `initialize()`; inert after `dispose()`.
    pub fn on_beat<F>(&self, callback: F) -> BeatSubscription
    where
        F: Fn(&BeatEvent) + Send + Sync + 'static,
    {
        self.shared.beats.register(Arc::new(callback))
    }

    /// Async broadcast of dispatched beats.
    pub fn subscribe_beats(&self) -> broadcast::Receiver<BeatEvent> {
        self.shared.beats.subscribe()
    }

    pub fn beat_stream(&self) -> BroadcastStream<BeatEvent> {
        BroadcastStream::new(self.subscribe_beats())
    }

    // ========================================================================
    // HOST LOOP HOOKS
    // ========================================================================

    /// Run one scheduling pass. Drives the transport in manual scheduler mode;
    /// harmless in threaded mode. Returns the number of beats scheduled.
    pub fn tick(&self) -> usize {
        let Some(backend) = self.backend_if_live() else {
            return 0;
        };
        match self.shared.lock_control("tick") {
            Some(mut state) => self.shared.schedule_ahead(backend.as_ref(), &mut state),
            None => 0,
        }
    }

    /// Fire listeners for every beat whose audio time has arrived. Call once
    /// per rendered frame in host dispatch mode. Returns the beats dispatched.
    pub fn dispatch_frame(&self) -> usize {
        match self.backend_if_live() {
            Some(backend) => self.shared.dispatch_due(backend.as_ref()),
            None => 0,
        }
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub fn state(&self) -> EngineState {
        if self.is_disposed() {
            return EngineState::Disposed;
        }
        if !self.is_initialized() {
            return EngineState::Uninitialized;
        }
        if self.is_running() {
            EngineState::Running
        } else {
            EngineState::Stopped
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.backend.initialized()
    }

    pub fn is_running(&self) -> bool {
        self.shared
            .lock_control("is_running")
            .is_some_and(|state| state.transport.is_some())
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Tempo in effect now (mid-ramp while a tempo change is ramping).
    pub fn tempo(&self) -> f64 {
        let now = self.backend.get().map(|backend| backend.current_time());
        match self.shared.lock_control("tempo") {
            Some(state) => match (&state.transport, now) {
                (Some(transport), Some(now)) => transport.bpm_at(now),
                _ => state.tempo,
            },
            None => self.shared.config.transport.default_tempo_bpm,
        }
    }

    pub fn volume(&self) -> f32 {
        self.shared
            .lock_control("volume")
            .map_or(self.shared.config.mix.default_volume, |state| state.volume)
    }

    pub fn gains(&self) -> GainStages {
        self.shared
            .lock_control("gains")
            .map_or(GainStages::SILENT, |state| state.gains)
    }

    pub fn is_metronome_click_enabled(&self) -> bool {
        self.shared
            .lock_control("is_metronome_click_enabled")
            .is_some_and(|state| state.click_enabled)
    }

    /// Duration of the ramp applied by `set_tempo()` while running.
    pub fn tempo_ramp_duration(&self) -> Duration {
        Duration::from_secs_f64(self.shared.config.tempo_ramp_secs())
    }

    pub fn listener_count(&self) -> usize {
        self.shared.beats.listener_count()
    }

    /// Audio-clock time, once initialized.
    pub fn current_time(&self) -> Option<f64> {
        self.backend.get().map(|backend| backend.current_time())
    }

    pub fn backend_name(&self) -> Option<String> {
        self.backend.get().map(|backend| backend.name().to_string())
    }

    pub fn config(&self) -> &RhythmConfig {
        &self.shared.config
    }

    pub fn telemetry(&self) -> &Arc<TelemetryHub> {
        &self.shared.telemetry
    }

    pub fn subscribe_telemetry(&self) -> broadcast::Receiver<MetricEvent> {
        self.shared.telemetry.subscribe()
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    fn backend_if_live(&self) -> Option<&Arc<dyn AudioBackend>> {
        if self.is_disposed() {
            return None;
        }
        self.backend.get()
    }

    /// Backend for a control call, or a debug log explaining why it is ignored.
    fn active_backend(&self, operation: &str) -> Option<&Arc<dyn AudioBackend>> {
        if self.is_disposed() {
            log::debug!("[RhythmEngine] {} ignored: {}", operation, AudioError::Disposed);
            return None;
        }
        let backend = self.backend.get();
        if backend.is_none() {
            log::debug!(
                "[RhythmEngine] {} ignored: {}",
                operation,
                AudioError::NotInitialized
            );
        }
        backend
    }
}

impl EngineShared {
    fn lock_control(&self, operation: &str) -> Option<MutexGuard<'_, ControlState>> {
        match self.control.lock() {
            Ok(state) => Some(state),
            Err(_) => {
                log_audio_error(
                    &AudioError::LockPoisoned {
                        component: format!("control ({})", operation),
                    },
                    operation,
                );
                None
            }
        }
    }

    fn on_backend_ready(&self, backend: &dyn AudioBackend) {
        let volume = match self.lock_control("initialize") {
            Some(state) => {
                backend.set_ambient_gain(state.gains.ambient);
                state.volume
            }
            None => self.config.mix.default_volume,
        };
        log::info!(
            "[RhythmEngine] Audio graph ready on {} backend ({} Hz, volume {})",
            backend.name(),
            backend.sample_rate(),
            volume
        );
        self.telemetry.record_lifecycle(LifecyclePhase::Initialized);
    }

    fn release_backend(&self, backend: &dyn AudioBackend) {
        backend.set_ambient_gain(0.0);
        if let Err(err) = backend.shutdown() {
            let err = match err {
                AudioError::TeardownFailed { .. } => err,
                other => AudioError::TeardownFailed {
                    details: other.message(),
                },
            };
            log_audio_error(&err, "dispose");
            self.telemetry
                .record_error(DiagnosticError::TeardownFailed, err.message());
        }
    }

    /// Stop the transport under the control lock. Returns the tickers to be
    /// dropped (joined) once the lock is released.
    fn halt(&self, state: &mut ControlState, backend: &dyn AudioBackend) -> Vec<Ticker> {
        let was_running = state.transport.take().is_some();
        state.generation += 1;
        state.last_pass = None;

        backend.cancel_pending();
        self.beats.clear_pending();

        if was_running {
            self.telemetry
                .record_lifecycle(LifecyclePhase::TransportStopped);
        }

        [state.scheduler.take(), state.frame_pump.take()]
            .into_iter()
            .flatten()
            .collect()
    }

    /// Periodic pass from the scheduler thread of transport `generation`.
    fn scheduler_pass(&self, backend: &dyn AudioBackend, generation: u64) -> usize {
        let Some(mut state) = self.lock_control("scheduler") else {
            return 0;
        };
        if state.generation != generation {
            return 0;
        }

        let now = Instant::now();
        if let Some(previous) = state.last_pass.replace(now) {
            let elapsed_ms = now.duration_since(previous).as_secs_f32() * 1000.0;
            let lateness_ms = elapsed_ms - self.config.transport.scheduler_interval_ms as f32;
            self.telemetry.record_scheduler_jitter(lateness_ms);
        }

        self.schedule_ahead(backend, &mut state)
    }

    /// Hand every beat inside the look-ahead window to the backend.
    fn schedule_ahead(&self, backend: &dyn AudioBackend, state: &mut ControlState) -> usize {
        let overflow = backend.clock().take_overflow();
        if overflow > 0 {
            log::warn!(
                "[RhythmEngine] Renderer discarded {} event(s): pending list full",
                overflow
            );
            self.telemetry.record_error(
                DiagnosticError::ScheduleDropped,
                format!("{} event(s) discarded by the renderer", overflow),
            );
        }

        let ControlState {
            transport,
            gains,
            click_enabled,
            ..
        } = state;
        let Some(transport) = transport.as_mut() else {
            return 0;
        };

        let now = backend.current_time();
        let lookahead = self.config.lookahead_secs();

        let skipped = transport.skip_stale(now - lookahead);
        if skipped > 0 {
            log::warn!(
                "[RhythmEngine] Scheduler stalled; skipped {} stale beat(s)",
                skipped
            );
            self.telemetry.record_error(
                DiagnosticError::BeatsSkipped,
                format!("{} beat(s) older than {:.0}ms", skipped, lookahead * 1000.0),
            );
        }

        let mut scheduled = 0;
        while let Some(beat) = transport.next_due(now + lookahead) {
            self.schedule_sound(backend, SoundKind::Kick, beat.time, gains.kick);
            if *click_enabled {
                self.schedule_sound(backend, SoundKind::Click, beat.time, gains.click);
            }

            self.beats.enqueue(BeatEvent {
                index: beat.index,
                audio_time: beat.time,
                tempo_bpm: beat.bpm,
            });
            scheduled += 1;

            tracing::debug!(
                index = beat.index,
                time = beat.time,
                bpm = beat.bpm,
                lead_ms = (beat.time - now) * 1000.0,
                "beat scheduled"
            );
        }
        scheduled
    }

    fn schedule_sound(&self, backend: &dyn AudioBackend, kind: SoundKind, at: f64, gain: f32) {
        if let Err(err) = backend.schedule(kind, at, gain) {
            log_audio_error(&err, "schedule");
            self.telemetry
                .record_error(DiagnosticError::ScheduleDropped, err.message());
        }
    }

    /// Dispatch every queued beat whose audio time has been reached.
    fn dispatch_due(&self, backend: &dyn AudioBackend) -> usize {
        if self.disposed.load(Ordering::Acquire) {
            return 0;
        }
        let offset = self.config.visual.latency_offset_ms / 1000.0;
        let due = self.beats.take_due(backend.current_time() - offset);

        let mut dispatched = 0;
        for event in &due.events {
            // A stop() since the take cancels the rest, matching the audio cutoff
            if self.beats.is_revoked(&due) {
                log::debug!("[RhythmEngine] Dropping beat {} cancelled by stop", event.index);
                break;
            }
            dispatched += 1;
            let outcome = self.beats.dispatch(event);
            if outcome.panicked > 0 {
                self.telemetry.record_error(
                    DiagnosticError::ListenerPanicked,
                    format!("{} listener(s) on beat {}", outcome.panicked, event.index),
                );
            }
        }
        dispatched
    }
}

fn is_valid_tempo(tempo: f64) -> bool {
    tempo.is_finite() && tempo > 0.0
}

impl Default for RhythmEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RhythmEngine {
    fn drop(&mut self) {
        // Scheduler threads hold the shared state; stop them with the engine
        self.dispose();
    }
}
