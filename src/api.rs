// Public API for host bindings
// Free functions over one process-wide RhythmEngine so a UI layer can drive
// rhythm mode without owning the engine.

use once_cell::sync::Lazy;

use crate::engine::{BeatEvent, BeatSubscription, EngineState, RhythmEngine};
use crate::error::AudioError;

/// Process-wide engine. Built lazily with the packaged configuration; no
/// audio resources are touched until `initialize()`.
static ENGINE: Lazy<RhythmEngine> = Lazy::new(RhythmEngine::new);

/// The shared engine behind the free functions.
pub fn engine() -> &'static RhythmEngine {
    &ENGINE
}

/// Get the version of the rhythm engine
pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Build the audio graph. Call after a user gesture.
///
/// Idempotent; resolves immediately once initialized.
///
/// # Errors
/// `AudioError::AudioUnavailable` when the platform cannot provide audio
/// output. Rhythm mode should fall back to a silent experience.
pub async fn initialize() -> Result<(), AudioError> {
    ENGINE.initialize().await
}

/// Start the beat at `tempo` BPM. Ignored before `initialize()`.
pub fn start(tempo: f64) {
    ENGINE.start(tempo)
}

pub fn stop() {
    ENGINE.stop()
}

/// Change tempo; ramps smoothly while running.
pub fn set_tempo(tempo: f64) {
    ENGINE.set_tempo(tempo)
}

/// Set volume on the 0-100 UI scale. 0 mutes.
pub fn set_volume(percent: f32) {
    ENGINE.set_volume(percent)
}

pub fn toggle_metronome_click(enabled: bool) {
    ENGINE.toggle_metronome_click(enabled)
}

/// Register a beat listener; keep the handle to unregister it later.
pub fn on_beat<F>(callback: F) -> BeatSubscription
where
    F: Fn(&BeatEvent) + Send + Sync + 'static,
{
    ENGINE.on_beat(callback)
}

/// Release all audio resources. The shared engine cannot be restarted
/// afterwards within this process.
pub fn dispose() {
    ENGINE.dispose()
}

pub fn state() -> EngineState {
    ENGINE.state()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_version() {
        assert_eq!(get_version(), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_engine_is_shared() {
        assert!(std::ptr::eq(engine(), engine()));
    }

    #[test]
    fn test_controls_before_initialize_are_ignored() {
        // The shared engine is never initialized in unit tests
        start(120.0);
        set_tempo(90.0);
        set_volume(40.0);
        toggle_metronome_click(false);
        stop();
        assert_eq!(state(), EngineState::Uninitialized);
    }
}
