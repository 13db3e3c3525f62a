//! Integration tests for the rhythm engine public surface
//!
//! These tests drive the engine on the offline backend so the audio clock is
//! stepped deterministically, covering:
//! - Start/stop cycles and beat spacing
//! - Listener registration bookkeeping
//! - Initialization idempotence and the uninitialized state
//! - Volume mapping and mute behaviour
//! - Tempo ramps

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Notify;

use rhythm_engine::audio::GainStages;
use rhythm_engine::config::{MixConfig, RhythmConfig, SchedulerMode, VisualDispatchMode};
use rhythm_engine::engine::{AudioBackend, BackendFactory, BackendFuture, OfflineBackend};
use rhythm_engine::telemetry::MetricEvent;
use rhythm_engine::{AudioError, BeatEvent, EngineState, RhythmEngine};

const SR: u32 = 48000;
const STEP_FRAMES: usize = 1200;

fn host_driven_config() -> RhythmConfig {
    let mut config = RhythmConfig::default();
    config.transport.scheduler_mode = SchedulerMode::Manual;
    config.visual.dispatch_mode = VisualDispatchMode::Host;
    config
}

fn offline_engine(config: RhythmConfig) -> (RhythmEngine, Arc<OfflineBackend>) {
    let backend = Arc::new(OfflineBackend::new(SR, &config.audio));
    let engine =
        RhythmEngine::with_backend_factory(config, OfflineBackend::factory(Arc::clone(&backend)));
    (engine, backend)
}

fn run_for(engine: &RhythmEngine, backend: &OfflineBackend, secs: f64) -> Vec<f32> {
    let steps = (secs * SR as f64 / STEP_FRAMES as f64).round() as usize;
    let mut out = Vec::with_capacity(steps * STEP_FRAMES);
    for _ in 0..steps {
        engine.tick();
        out.extend(backend.render(STEP_FRAMES).unwrap());
        engine.dispatch_frame();
    }
    out
}

fn collect_beats(engine: &RhythmEngine) -> Arc<Mutex<Vec<BeatEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _subscription = engine.on_beat(move |event| sink.lock().unwrap().push(*event));
    seen
}

fn steady_interval(beats: &[BeatEvent]) -> f64 {
    let tail = &beats[beats.len() - 2..];
    tail[1].audio_time - tail[0].audio_time
}

fn energy(samples: &[f32]) -> f64 {
    samples.iter().map(|&s| (s as f64) * (s as f64)).sum()
}

/// start(T), stop(), start(T) yields the same steady-state interval
#[tokio::test]
async fn test_restart_does_not_drift() {
    for tempo in [40.0, 90.0, 120.0, 174.5, 240.0] {
        let (engine, backend) = offline_engine(host_driven_config());
        engine.initialize().await.unwrap();
        let seen = collect_beats(&engine);
        let expected = 60.0 / tempo;
        let window = expected * 3.5;

        engine.start(tempo);
        run_for(&engine, &backend, window);
        engine.stop();
        let first: Vec<_> = seen.lock().unwrap().drain(..).collect();

        run_for(&engine, &backend, 0.35);
        engine.start(tempo);
        run_for(&engine, &backend, window);
        let second: Vec<_> = seen.lock().unwrap().clone();

        assert!(first.len() >= 3, "tempo {}: {} beats", tempo, first.len());
        assert_eq!(first.len(), second.len(), "tempo {}", tempo);
        let a = steady_interval(&first);
        let b = steady_interval(&second);
        assert!((a - expected).abs() < 1e-9, "tempo {}: {}", tempo, a);
        assert!((a - b).abs() < 1e-9, "tempo {}: {} vs {}", tempo, a, b);
    }
}

/// Invocations per beat equal the listeners registered at dispatch time
#[tokio::test]
async fn test_invocations_match_registered_listeners() {
    let (engine, backend) = offline_engine(host_driven_config());
    engine.initialize().await.unwrap();
    let mut dispatched = engine.subscribe_beats();

    let calls = Arc::new(Mutex::new(Vec::<u64>::new()));
    let mut live = Vec::new();
    let mut expected: HashMap<u64, usize> = HashMap::new();
    let mut rng = StdRng::seed_from_u64(0x5eed);

    engine.start(240.0);
    for _ in 0..400 {
        if rng.gen_bool(0.3) {
            if live.is_empty() || rng.gen_bool(0.6) {
                let calls = Arc::clone(&calls);
                live.push(engine.on_beat(move |event| calls.lock().unwrap().push(event.index)));
            } else {
                let victim = live.swap_remove(rng.gen_range(0..live.len()));
                assert!(victim.unregister());
            }
        }
        assert_eq!(engine.listener_count(), live.len());

        engine.tick();
        backend.render(STEP_FRAMES).unwrap();
        engine.dispatch_frame();
        while let Ok(beat) = dispatched.try_recv() {
            expected.insert(beat.index, live.len());
        }
    }

    assert!(expected.len() >= 30);
    let mut observed: HashMap<u64, usize> = HashMap::new();
    for index in calls.lock().unwrap().iter() {
        *observed.entry(*index).or_default() += 1;
    }
    for (index, count) in &expected {
        assert_eq!(
            observed.get(index).copied().unwrap_or(0),
            *count,
            "beat {}",
            index
        );
    }
}

/// Three listeners, the second unregistered mid-stream
#[tokio::test]
async fn test_unregistering_second_listener_keeps_order() {
    let (engine, backend) = offline_engine(host_driven_config());
    engine.initialize().await.unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let handles: Vec<_> = ["first", "second", "third"]
        .into_iter()
        .map(|name| {
            let order = Arc::clone(&order);
            engine.on_beat(move |event: &BeatEvent| order.lock().unwrap().push((event.index, name)))
        })
        .collect();

    engine.start(120.0);
    run_for(&engine, &backend, 0.3);
    handles[1].unregister();
    run_for(&engine, &backend, 0.5);

    let next_beat: Vec<_> = order
        .lock()
        .unwrap()
        .iter()
        .filter(|(index, _)| *index == 1)
        .map(|(_, name)| *name)
        .collect();
    assert_eq!(next_beat, vec!["first", "third"]);
}

/// Initializing N times sounds exactly like initializing once
#[tokio::test]
async fn test_repeated_initialize_matches_single() {
    let mut config = host_driven_config();
    config.mix.ambient_enabled = true;

    let (once, once_backend) = offline_engine(config.clone());
    once.initialize().await.unwrap();

    let (many, many_backend) = offline_engine(config);
    for _ in 0..5 {
        many.initialize().await.unwrap();
    }

    once.start(100.0);
    many.start(100.0);
    let a = run_for(&once, &once_backend, 1.5);
    let b = run_for(&many, &many_backend, 1.5);

    assert!(energy(&a) > 0.0);
    assert_eq!(a, b);
}

#[test]
fn test_volume_mapping_is_monotonic() {
    let mix = MixConfig::default();
    let mut previous = GainStages::from_volume(0.0, &mix);
    assert_eq!(previous.kick, 0.0);

    for step in 1..=200 {
        let gains = GainStages::from_volume(step as f32 * 0.5, &mix);
        assert!(gains.kick >= previous.kick);
        assert!(gains.click >= previous.click);
        assert!(gains.click < gains.kick);
        previous = gains;
    }
    assert!((previous.kick - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_louder_volume_renders_louder() {
    let mut energies = Vec::new();
    for volume in [10.0, 40.0, 70.0, 100.0] {
        let (engine, backend) = offline_engine(host_driven_config());
        engine.initialize().await.unwrap();
        engine.set_volume(volume);
        engine.start(120.0);
        energies.push(energy(&run_for(&engine, &backend, 1.0)));
    }

    for pair in energies.windows(2) {
        assert!(pair[0] < pair[1], "{:?}", energies);
    }
}

/// Mute sounds like stop while beats keep flowing
#[tokio::test]
async fn test_mute_matches_stop_but_keeps_beats() {
    let (muted, muted_backend) = offline_engine(host_driven_config());
    muted.initialize().await.unwrap();
    let seen = collect_beats(&muted);
    muted.set_volume(0.0);
    muted.start(120.0);
    let muted_out = run_for(&muted, &muted_backend, 2.0);

    let (stopped, stopped_backend) = offline_engine(host_driven_config());
    stopped.initialize().await.unwrap();
    let stopped_out = run_for(&stopped, &stopped_backend, 2.0);

    assert_eq!(muted_out, stopped_out);
    assert!(muted.is_running());
    assert_eq!(muted.state(), EngineState::Running);
    assert_eq!(seen.lock().unwrap().len(), 4);
}

/// start(120) then set_tempo(60) ramps over the fixed window
#[tokio::test]
async fn test_tempo_change_ramps_over_fixed_window() {
    let (engine, backend) = offline_engine(host_driven_config());
    engine.initialize().await.unwrap();
    let seen = collect_beats(&engine);

    engine.start(120.0);
    engine.set_tempo(60.0);
    assert_eq!(engine.tempo_ramp_duration(), Duration::from_millis(500));

    run_for(&engine, &backend, 0.25);
    let mid_ramp = engine.tempo();
    assert!(mid_ramp < 120.0 && mid_ramp > 60.0, "tempo {}", mid_ramp);
    run_for(&engine, &backend, 4.0);

    let beats = seen.lock().unwrap().clone();
    let intervals: Vec<f64> = beats
        .windows(2)
        .map(|pair| pair[1].audio_time - pair[0].audio_time)
        .collect();
    assert!(intervals[0] > 0.5 && intervals[0] < 1.0);
    assert!((intervals[intervals.len() - 1] - 1.0).abs() < 1e-9);

    let ramp = engine
        .telemetry()
        .snapshot()
        .recent
        .into_iter()
        .find_map(|event| match event {
            MetricEvent::TempoRamp { duration_ms, .. } => Some(duration_ms),
            _ => None,
        });
    assert_eq!(ramp, Some(500.0));
}

/// stop() while initialize() is still in flight
#[tokio::test]
async fn test_stop_before_initialize_completes() {
    let config = host_driven_config();
    let backend = Arc::new(OfflineBackend::new(SR, &config.audio));
    let gate = Arc::new(Notify::new());
    let factory: BackendFactory = {
        let backend = Arc::clone(&backend);
        let gate = Arc::clone(&gate);
        Arc::new(move |_config: &RhythmConfig| {
            let backend = Arc::clone(&backend);
            let gate = Arc::clone(&gate);
            Box::pin(async move {
                gate.notified().await;
                Ok::<_, AudioError>(backend as Arc<dyn AudioBackend>)
            }) as BackendFuture
        })
    };
    let engine = RhythmEngine::with_backend_factory(config, factory);

    let init = engine.initialize();
    tokio::pin!(init);
    assert!(futures::poll!(&mut init).is_pending());

    engine.stop();
    engine.set_volume(30.0);
    assert_eq!(engine.state(), EngineState::Uninitialized);

    gate.notify_one();
    init.await.unwrap();
    assert_eq!(engine.state(), EngineState::Stopped);
    assert_eq!(engine.volume(), 70.0);
}

#[tokio::test]
async fn test_unavailable_audio_leaves_engine_usable() {
    let factory: BackendFactory = Arc::new(|_config: &RhythmConfig| {
        Box::pin(async {
            Err::<Arc<dyn AudioBackend>, _>(AudioError::StreamOpenFailed {
                reason: "device busy".to_string(),
            })
        }) as BackendFuture
    });
    let engine = RhythmEngine::with_backend_factory(host_driven_config(), factory);

    let err = engine.initialize().await.unwrap_err();
    assert!(matches!(err, AudioError::AudioUnavailable { .. }));

    let _subscription = engine.on_beat(|_event| {});
    engine.start(120.0);
    engine.set_tempo(80.0);
    engine.stop();
    engine.dispose();
    assert_eq!(engine.state(), EngineState::Disposed);
}
