//! Core telemetry event types describing engine diagnostics exposed to the
//! CLI and to async subscribers.

use serde::{Deserialize, Serialize};

/// High-level lifecycle stages of the rhythm engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    Initialized,
    InitializationFailed,
    TransportStarted,
    TransportStopped,
    Disposed,
}

/// Diagnostic error codes surfaced via telemetry metrics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticError {
    AudioUnavailable,
    ScheduleDropped,
    BeatsSkipped,
    ListenerPanicked,
    TeardownFailed,
}

/// Metric events covering scheduler jitter, tempo and mix changes, and
/// lifecycle details.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MetricEvent {
    SchedulerJitter {
        avg_ms: f32,
        max_ms: f32,
        sample_count: usize,
    },
    Lifecycle {
        phase: LifecyclePhase,
        timestamp_ms: u64,
    },
    TempoRamp {
        from_bpm: f64,
        to_bpm: f64,
        duration_ms: f64,
    },
    VolumeChanged {
        percent: f32,
        kick_gain: f32,
    },
    Error {
        code: DiagnosticError,
        context: String,
    },
}
