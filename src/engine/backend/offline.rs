//! Offline backend - renders the audio graph on demand instead of from a
//! device callback.
//!
//! The audio clock only moves when `render` is called, which makes the whole
//! engine deterministic: the CLI uses it to bounce WAV files and tests use it
//! to step time precisely.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::audio::{AudioClock, EventSender, Renderer};
use crate::config::{AudioConfig, RhythmConfig};
use crate::error::AudioError;

use super::{AudioBackend, AudioGraph, BackendFactory, BackendFuture};

pub struct OfflineBackend {
    clock: Arc<AudioClock>,
    sender: EventSender,
    renderer: Mutex<Renderer>,
    shut_down: AtomicBool,
}

impl OfflineBackend {
    pub fn new(sample_rate: u32, audio: &AudioConfig) -> Self {
        let AudioGraph {
            clock,
            sender,
            renderer,
        } = AudioGraph::build(sample_rate, audio);
        Self {
            clock,
            sender,
            renderer: Mutex::new(renderer),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Render into `out`, advancing the audio clock by `out.len()` frames.
    pub fn render_into(&self, out: &mut [f32]) -> Result<(), AudioError> {
        let mut renderer = self.renderer.lock().map_err(|_| AudioError::LockPoisoned {
            component: "offline_renderer".to_string(),
        })?;
        renderer.render(out);
        Ok(())
    }

    /// Render `frames` mono samples.
    pub fn render(&self, frames: usize) -> Result<Vec<f32>, AudioError> {
        let mut out = vec![0.0; frames];
        self.render_into(&mut out)?;
        Ok(out)
    }

    pub fn render_seconds(&self, secs: f64) -> Result<Vec<f32>, AudioError> {
        let frames = self.clock.time_to_frame(secs) as usize;
        self.render(frames)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Factory handing out this backend to `initialize()`.
    pub fn factory(backend: Arc<Self>) -> BackendFactory {
        Arc::new(move |_config: &RhythmConfig| {
            let backend = Arc::clone(&backend);
            Box::pin(async move { Ok::<_, AudioError>(backend as Arc<dyn AudioBackend>) })
                as BackendFuture
        })
    }
}

impl AudioBackend for OfflineBackend {
    fn name(&self) -> &str {
        "offline"
    }

    fn clock(&self) -> &Arc<AudioClock> {
        &self.clock
    }

    fn sender(&self) -> &EventSender {
        &self.sender
    }

    fn shutdown(&self) -> Result<(), AudioError> {
        self.shut_down.store(true, Ordering::Release);
        Ok(())
    }
}
