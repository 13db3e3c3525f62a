use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use rhythm_engine::config::{RhythmConfig, SchedulerMode, VisualDispatchMode};
use rhythm_engine::engine::OfflineBackend;
use rhythm_engine::telemetry::TelemetrySnapshot;
use rhythm_engine::{BeatEvent, BeatSubscription, RhythmEngine};

fn main() -> ExitCode {
    rhythm_engine::init_logging();
    let cli = Cli::parse();
    match cli.execute() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("rhythm-cli error: {err:?}");
            ExitCode::from(1)
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "rhythm-cli", about = "Drive the rhythm engine from the command line")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

impl Cli {
    fn execute(self) -> Result<()> {
        match self.command {
            Command::Play(args) => play_command(args),
            Command::Render(args) => render_command(args),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play the beat on the default output device and print a summary.
    Play(PlayArgs),
    /// Render the beat offline to a WAV file and print a summary.
    Render(RenderArgs),
}

#[derive(Args, Debug, Clone)]
struct TransportArgs {
    /// Starting tempo in BPM.
    #[arg(long, default_value_t = 120.0)]
    bpm: f64,
    /// Session length in seconds.
    #[arg(long, default_value_t = 4.0)]
    seconds: f64,
    /// Volume on the 0-100 UI scale.
    #[arg(long, default_value_t = 70.0)]
    volume: f32,
    /// Disable the metronome click layered on each beat.
    #[arg(long)]
    no_click: bool,
    /// Ramp to this tempo mid-session.
    #[arg(long)]
    ramp_to: Option<f64>,
    /// Seconds into the session at which the tempo change is requested.
    #[arg(long, default_value_t = 2.0)]
    ramp_at: f64,
    /// JSON configuration file (defaults to the packaged configuration).
    #[arg(long)]
    config: Option<PathBuf>,
}

impl TransportArgs {
    fn validate(&self) -> Result<()> {
        if !(self.bpm.is_finite() && self.bpm > 0.0) {
            bail!("--bpm must be a positive number, got {}", self.bpm);
        }
        if let Some(target) = self.ramp_to {
            if !(target.is_finite() && target > 0.0) {
                bail!("--ramp-to must be a positive number, got {}", target);
            }
        }
        if !(self.seconds.is_finite() && self.seconds > 0.0) {
            bail!("--seconds must be positive, got {}", self.seconds);
        }
        if !(0.0..=100.0).contains(&self.volume) {
            bail!("--volume must be within 0-100, got {}", self.volume);
        }
        Ok(())
    }

    fn load_config(&self) -> RhythmConfig {
        match &self.config {
            Some(path) => RhythmConfig::load_from_file(path),
            None => RhythmConfig::load(),
        }
    }

    fn apply_mix(&self, engine: &RhythmEngine) {
        engine.set_volume(self.volume);
        engine.toggle_metronome_click(!self.no_click);
    }
}

#[derive(Args, Debug, Clone)]
struct PlayArgs {
    #[command(flatten)]
    transport: TransportArgs,
}

#[derive(Args, Debug, Clone)]
struct RenderArgs {
    #[command(flatten)]
    transport: TransportArgs,
    /// Destination WAV file.
    #[arg(long)]
    out: PathBuf,
    /// Output sample rate in Hz.
    #[arg(long, default_value_t = 48_000)]
    sample_rate: u32,
    /// Mix in the ambient bed under the beat.
    #[arg(long)]
    ambient: bool,
}

/// Collects dispatched beats for the summary.
struct BeatRecorder {
    beats: Arc<Mutex<Vec<BeatEvent>>>,
    subscription: BeatSubscription,
}

impl BeatRecorder {
    fn attach(engine: &RhythmEngine) -> Self {
        let beats = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&beats);
        let subscription = engine.on_beat(move |event| {
            sink.lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(*event);
        });
        Self {
            beats,
            subscription,
        }
    }

    fn finish(self) -> Vec<BeatEvent> {
        self.subscription.unregister();
        let beats = self
            .beats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        beats.clone()
    }
}

#[derive(Debug, Serialize)]
struct IntervalStats {
    min_secs: f64,
    max_secs: f64,
    mean_secs: f64,
}

impl IntervalStats {
    fn from_beats(beats: &[BeatEvent]) -> Option<Self> {
        let intervals: Vec<f64> = beats
            .windows(2)
            .map(|pair| pair[1].audio_time - pair[0].audio_time)
            .collect();
        if intervals.is_empty() {
            return None;
        }
        Some(Self {
            min_secs: intervals.iter().copied().fold(f64::INFINITY, f64::min),
            max_secs: intervals.iter().copied().fold(0.0, f64::max),
            mean_secs: intervals.iter().sum::<f64>() / intervals.len() as f64,
        })
    }
}

#[derive(Debug, Serialize)]
struct RunSummary {
    backend: Option<String>,
    seconds: f64,
    start_bpm: f64,
    end_bpm: f64,
    beat_count: usize,
    first_beat_at: Option<f64>,
    intervals: Option<IntervalStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    peak_amplitude: Option<f32>,
    telemetry: TelemetrySnapshot,
}

impl RunSummary {
    fn collect(engine: &RhythmEngine, args: &TransportArgs, beats: &[BeatEvent]) -> Self {
        Self {
            backend: engine.backend_name(),
            seconds: args.seconds,
            start_bpm: args.bpm,
            end_bpm: engine.tempo(),
            beat_count: beats.len(),
            first_beat_at: beats.first().map(|beat| beat.audio_time),
            intervals: IntervalStats::from_beats(beats),
            output: None,
            peak_amplitude: None,
            telemetry: engine.telemetry().snapshot(),
        }
    }

    fn print_json(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("serializing run summary")?;
        println!("{json}");
        Ok(())
    }
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")
}

fn play_command(args: PlayArgs) -> Result<()> {
    let transport = args.transport;
    transport.validate()?;

    let engine = RhythmEngine::with_config(transport.load_config());
    let runtime = build_runtime()?;
    runtime
        .block_on(engine.initialize())
        .context("initializing audio output")?;

    let recorder = BeatRecorder::attach(&engine);
    transport.apply_mix(&engine);
    engine.start(transport.bpm);

    let started = Instant::now();
    let deadline = started + Duration::from_secs_f64(transport.seconds);
    let mut pending_ramp = transport.ramp_to;
    while Instant::now() < deadline {
        if started.elapsed().as_secs_f64() >= transport.ramp_at {
            if let Some(target) = pending_ramp.take() {
                engine.set_tempo(target);
            }
        }
        thread::sleep(Duration::from_millis(20));
    }

    engine.stop();
    let beats = recorder.finish();
    let summary = RunSummary::collect(&engine, &transport, &beats);
    engine.dispose();
    summary.print_json()
}

fn render_command(args: RenderArgs) -> Result<()> {
    let transport = &args.transport;
    transport.validate()?;
    if args.sample_rate == 0 {
        bail!("--sample-rate must be positive");
    }

    let mut config = transport.load_config();
    config.transport.scheduler_mode = SchedulerMode::Manual;
    config.visual.dispatch_mode = VisualDispatchMode::Host;
    config.audio.sample_rate = args.sample_rate;
    config.mix.ambient_enabled = args.ambient;
    let config = config.sanitized();

    let backend = Arc::new(OfflineBackend::new(args.sample_rate, &config.audio));
    let block_frames = (u64::from(args.sample_rate) * config.transport.scheduler_interval_ms / 1000)
        .max(1) as usize;
    let engine =
        RhythmEngine::with_backend_factory(config, OfflineBackend::factory(Arc::clone(&backend)));
    build_runtime()?
        .block_on(engine.initialize())
        .context("initializing offline renderer")?;

    let recorder = BeatRecorder::attach(&engine);
    transport.apply_mix(&engine);
    engine.start(transport.bpm);

    let total_frames = (transport.seconds * f64::from(args.sample_rate)).round() as usize;
    let mut samples = Vec::with_capacity(total_frames);
    let mut pending_ramp = transport.ramp_to;
    while samples.len() < total_frames {
        if engine.current_time().unwrap_or_default() >= transport.ramp_at {
            if let Some(target) = pending_ramp.take() {
                engine.set_tempo(target);
            }
        }
        engine.tick();
        let frames = block_frames.min(total_frames - samples.len());
        samples.extend(backend.render(frames)?);
        engine.dispatch_frame();
    }
    engine.stop();

    write_wav(&args.out, args.sample_rate, &samples)?;

    let beats = recorder.finish();
    let mut summary = RunSummary::collect(&engine, transport, &beats);
    summary.output = Some(args.out.clone());
    summary.peak_amplitude = Some(samples.iter().fold(0.0_f32, |peak, s| peak.max(s.abs())));
    engine.dispose();
    summary.print_json()
}

fn write_wav(path: &Path, sample_rate: u32, samples: &[f32]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("creating output directory")?;
    }
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("creating {}", path.display()))?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer
        .finalize()
        .with_context(|| format!("finalizing {}", path.display()))
}
