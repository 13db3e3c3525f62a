//! Diagnostics telemetry collector and helpers.
//!
//! The collector multiplexes scheduler jitter, lifecycle, tempo/volume and
//! error events into a bounded history plus async broadcast stream. Each
//! engine owns one hub.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::broadcast;

pub mod events;

pub use events::{DiagnosticError, LifecyclePhase, MetricEvent};

/// Snapshot of collector state for CLI reporting.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TelemetrySnapshot {
    pub recent: Vec<MetricEvent>,
    pub total_events: u64,
    pub dropped_events: u64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Broadcast-based collector retaining a bounded history of metrics.
pub struct TelemetryCollector {
    tx: broadcast::Sender<MetricEvent>,
    history: Mutex<VecDeque<MetricEvent>>,
    history_capacity: usize,
    total_events: AtomicU64,
    dropped_history: AtomicU64,
}

impl TelemetryCollector {
    pub fn new(buffer: usize, history_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        let history_capacity = history_capacity.max(1);
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            history_capacity,
            total_events: AtomicU64::new(0),
            dropped_history: AtomicU64::new(0),
        }
    }

    pub fn publish(&self, event: MetricEvent) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        {
            let mut history = lock(&self.history);
            if history.len() == self.history_capacity {
                history.pop_front();
                self.dropped_history.fetch_add(1, Ordering::Relaxed);
            }
            history.push_back(event.clone());
        }

        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MetricEvent> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let history = lock(&self.history);
        TelemetrySnapshot {
            recent: history.iter().cloned().collect(),
            total_events: self.total_events.load(Ordering::Relaxed),
            dropped_events: self.dropped_history.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new(256, 64)
    }
}

/// Rolling window of scheduler wake-up lateness.
struct JitterTracker {
    samples: VecDeque<f32>,
    max_samples: usize,
    observed: u64,
}

impl JitterTracker {
    fn new(max_samples: usize) -> Self {
        let max_samples = max_samples.max(1);
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
            observed: 0,
        }
    }

    fn observe(&mut self, value: f32) -> (f32, f32, usize) {
        if self.samples.len() == self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(value.abs());
        self.observed += 1;

        let count = self.samples.len();
        let sum: f32 = self.samples.iter().copied().sum();
        let max = self
            .samples
            .iter()
            .copied()
            .fold(0.0_f32, |acc, next| acc.max(next));
        (sum / count as f32, max, count)
    }

    /// One report per full window keeps the history readable.
    fn should_report(&self) -> bool {
        self.observed % self.max_samples as u64 == 0
    }
}

/// Top-level hub wrapping collector state plus derived gauges.
pub struct TelemetryHub {
    collector: TelemetryCollector,
    jitter: Mutex<JitterTracker>,
}

impl TelemetryHub {
    pub fn new(channel_capacity: usize, history_capacity: usize, jitter_window: usize) -> Self {
        Self {
            collector: TelemetryCollector::new(channel_capacity, history_capacity),
            jitter: Mutex::new(JitterTracker::new(jitter_window)),
        }
    }

    pub fn collector(&self) -> &TelemetryCollector {
        &self.collector
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.collector.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MetricEvent> {
        self.collector.subscribe()
    }

    /// Record how late a scheduler pass woke up relative to its period.
    pub fn record_scheduler_jitter(&self, lateness_ms: f32) {
        let report = {
            let mut tracker = lock(&self.jitter);
            let stats = tracker.observe(lateness_ms);
            tracker.should_report().then_some(stats)
        };

        if let Some((avg_ms, max_ms, sample_count)) = report {
            self.collector.publish(MetricEvent::SchedulerJitter {
                avg_ms,
                max_ms,
                sample_count,
            });
        }
    }

    pub fn record_lifecycle(&self, phase: LifecyclePhase) {
        self.collector.publish(MetricEvent::Lifecycle {
            phase,
            timestamp_ms: now_timestamp_ms(),
        });
    }

    pub fn record_tempo_ramp(&self, from_bpm: f64, to_bpm: f64, duration_ms: f64) {
        self.collector.publish(MetricEvent::TempoRamp {
            from_bpm,
            to_bpm,
            duration_ms,
        });
    }

    pub fn record_volume(&self, percent: f32, kick_gain: f32) {
        self.collector
            .publish(MetricEvent::VolumeChanged { percent, kick_gain });
    }

    pub fn record_error(&self, code: DiagnosticError, context: impl Into<String>) {
        self.collector.publish(MetricEvent::Error {
            code,
            context: context.into(),
        });
    }
}

impl Default for TelemetryHub {
    fn default() -> Self {
        Self::new(256, 64, 32)
    }
}

fn now_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_preserves_order_within_history() {
        let collector = TelemetryCollector::new(8, 3);
        collector.publish(MetricEvent::SchedulerJitter {
            avg_ms: 1.0,
            max_ms: 2.0,
            sample_count: 1,
        });
        collector.publish(MetricEvent::VolumeChanged {
            percent: 50.0,
            kick_gain: 0.1,
        });
        collector.publish(MetricEvent::Lifecycle {
            phase: LifecyclePhase::Initialized,
            timestamp_ms: 0,
        });

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.recent.len(), 3);
        assert!(
            matches!(snapshot.recent[0], MetricEvent::SchedulerJitter { avg_ms, .. } if (avg_ms - 1.0).abs() < f32::EPSILON)
        );
        assert!(matches!(snapshot.recent[2], MetricEvent::Lifecycle { .. }));
    }

    #[test]
    fn collector_drops_history_when_full() {
        let collector = TelemetryCollector::new(8, 2);
        for percent in [10.0, 20.0, 30.0] {
            collector.publish(MetricEvent::VolumeChanged {
                percent,
                kick_gain: 0.0,
            });
        }

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.recent.len(), 2);
        assert_eq!(snapshot.total_events, 3);
        assert_eq!(snapshot.dropped_events, 1);
        assert!(
            matches!(snapshot.recent[0], MetricEvent::VolumeChanged { percent, .. } if (percent - 20.0).abs() < f32::EPSILON)
        );
    }

    #[test]
    fn hub_reports_jitter_once_per_window() {
        let hub = TelemetryHub::new(8, 16, 4);
        for lateness in [1.0, -3.0, 2.0, 0.5, 4.0] {
            hub.record_scheduler_jitter(lateness);
        }

        let reports: Vec<_> = hub
            .snapshot()
            .recent
            .into_iter()
            .filter(|event| matches!(event, MetricEvent::SchedulerJitter { .. }))
            .collect();
        assert_eq!(reports.len(), 1);
        match &reports[0] {
            MetricEvent::SchedulerJitter {
                avg_ms,
                max_ms,
                sample_count,
            } => {
                assert_eq!(*sample_count, 4);
                assert!((avg_ms - 1.625).abs() < 1e-6);
                assert!((max_ms - 3.0).abs() < 1e-6);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn hub_broadcasts_to_subscribers() {
        let hub = TelemetryHub::default();
        let mut rx = hub.subscribe();
        hub.record_error(DiagnosticError::BeatsSkipped, "2 beats");
        match rx.try_recv().unwrap() {
            MetricEvent::Error { code, context } => {
                assert_eq!(code, DiagnosticError::BeatsSkipped);
                assert_eq!(context, "2 beats");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
