//! Backend abstractions for the rhythm engine core.
//!
//! A backend owns a running audio graph: an output stream (or a simulated
//! one) whose callback drives a [`Renderer`]. The engine only talks to the
//! graph through the audio clock and the sound event queue, so platform
//! differences stay behind [`AudioBackend`].

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use futures::future::BoxFuture;
use tokio::sync::oneshot;

use crate::audio::{event_queue, AudioClock, EventSender, Renderer, SoundBank, SoundEvent, SoundKind};
use crate::config::{AudioConfig, RhythmConfig};
use crate::error::AudioError;

/// Trait implemented by platform-specific audio backends.
///
/// Required methods expose the graph; everything the scheduler needs is
/// provided on top of them.
pub trait AudioBackend: Send + Sync {
    fn name(&self) -> &str;
    fn clock(&self) -> &Arc<AudioClock>;
    fn sender(&self) -> &EventSender;

    /// Release the output device. Must be idempotent.
    fn shutdown(&self) -> Result<(), AudioError>;

    /// Current audio-clock time in seconds.
    fn current_time(&self) -> f64 {
        self.clock().now_secs()
    }

    fn sample_rate(&self) -> u32 {
        self.clock().sample_rate()
    }

    /// Queue a one-shot at an exact audio-clock time.
    fn schedule(&self, kind: SoundKind, at_secs: f64, gain: f32) -> Result<SoundEvent, AudioError> {
        self.sender().schedule(kind, at_secs, gain)
    }

    /// Prevent every queued-but-unstarted event from sounding.
    fn cancel_pending(&self) -> u64 {
        self.clock().bump_epoch()
    }

    fn set_ambient_gain(&self, gain: f32) {
        self.clock().set_ambient_gain(gain);
    }
}

pub type BackendFuture = BoxFuture<'static, Result<Arc<dyn AudioBackend>, AudioError>>;

/// Builds the audio graph during `initialize()`.
pub type BackendFactory = Arc<dyn Fn(&RhythmConfig) -> BackendFuture + Send + Sync>;

/// Clock, sender and renderer wired to one event queue.
pub struct AudioGraph {
    pub clock: Arc<AudioClock>,
    pub sender: EventSender,
    pub renderer: Renderer,
}

impl AudioGraph {
    pub fn build(sample_rate: u32, audio: &AudioConfig) -> Self {
        let clock = Arc::new(AudioClock::new(sample_rate));
        let (sender, consumer) = event_queue(audio.event_queue_capacity, Arc::clone(&clock));
        let bank = Arc::new(SoundBank::new(sample_rate));
        let renderer = Renderer::new(
            Arc::clone(&clock),
            consumer,
            bank,
            audio.max_voices,
            audio.event_queue_capacity * 2,
        );
        Self {
            clock,
            sender,
            renderer,
        }
    }
}

/// Control-side handles returned once a stream is playing.
pub struct GraphHandles {
    pub clock: Arc<AudioClock>,
    pub sender: EventSender,
    pub device: String,
}

/// Dedicated thread that owns a platform stream.
///
/// Platform stream handles are generally not `Send`, so the stream is opened,
/// started, held and finally dropped on one thread. The control side only
/// keeps a shutdown channel and the join handle.
pub(crate) struct StreamOwner {
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl StreamOwner {
    /// Spawn the owner thread and wait until `open` reports the stream state.
    pub(crate) async fn spawn<S, F>(name: &str, open: F) -> Result<(Self, GraphHandles), AudioError>
    where
        S: 'static,
        F: FnOnce() -> Result<(S, GraphHandles), AudioError> + Send + 'static,
    {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let owner_name = name.to_string();

        let worker = thread::Builder::new().name(name.to_string()).spawn(move || {
            let (stream, handles) = match open() {
                Ok(opened) => opened,
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };
            if ready_tx.send(Ok(handles)).is_err() {
                log::warn!("[{}] Initializer went away before stream was ready", owner_name);
                return;
            }

            // Blocks until shutdown() or the owner is dropped
            let _ = shutdown_rx.recv();
            drop(stream);
            log::info!("[{}] Output stream released", owner_name);
        })?;

        let owner = Self {
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            worker: Mutex::new(Some(worker)),
        };

        let handles = match ready_rx.await {
            Ok(Ok(handles)) => handles,
            Ok(Err(err)) => {
                let _ = owner.shutdown();
                return Err(err);
            }
            Err(_) => {
                let _ = owner.shutdown();
                return Err(AudioError::StreamFailure {
                    reason: "audio thread exited before the stream was ready".to_string(),
                });
            }
        };

        Ok((owner, handles))
    }

    pub(crate) fn shutdown(&self) -> Result<(), AudioError> {
        let shutdown_tx = self
            .shutdown_tx
            .lock()
            .map_err(|_| AudioError::LockPoisoned {
                component: "stream_owner".to_string(),
            })?
            .take();
        if let Some(tx) = shutdown_tx {
            let _ = tx.send(());
        }

        let worker = self
            .worker
            .lock()
            .map_err(|_| AudioError::LockPoisoned {
                component: "stream_owner".to_string(),
            })?
            .take();
        if let Some(handle) = worker {
            if handle.thread().id() == thread::current().id() {
                return Ok(());
            }
            handle.join().map_err(|_| AudioError::TeardownFailed {
                details: "audio owner thread panicked".to_string(),
            })?;
        }
        Ok(())
    }
}

impl Drop for StreamOwner {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::warn!("[StreamOwner] {}", err);
        }
    }
}

/// Factory building the platform's real-time backend.
pub fn platform_factory() -> BackendFactory {
    Arc::new(|config: &RhythmConfig| {
        let audio = config.audio.clone();
        Box::pin(async move {
            let backend = PlatformBackend::open(audio).await?;
            Ok::<_, AudioError>(Arc::new(backend) as Arc<dyn AudioBackend>)
        }) as BackendFuture
    })
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "android")] {
        mod oboe;
        pub use self::oboe::OboeBackend;
        type PlatformBackend = OboeBackend;
    } else {
        mod cpal;
        pub use self::cpal::CpalBackend;
        type PlatformBackend = CpalBackend;
    }
}

mod offline;
pub use offline::OfflineBackend;
