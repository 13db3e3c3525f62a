//! Oboe-based audio backend for Android
//!
//! Opens a low-latency mono float output stream whose data callback hosts the
//! [`Renderer`]. Oboe picks AAudio or OpenSL ES underneath.

use std::sync::Arc;

use oboe::{
    AudioOutputCallback, AudioOutputStreamSafe, AudioStream, AudioStreamAsync, AudioStreamBuilder,
    DataCallbackResult, Output, PerformanceMode, SharingMode,
};

use crate::audio::{AudioClock, EventSender, Renderer};
use crate::config::AudioConfig;
use crate::error::AudioError;

use super::{AudioBackend, AudioGraph, GraphHandles, StreamOwner};

/// Output callback running the renderer on Oboe's real-time thread.
struct RendererCallback {
    renderer: Renderer,
}

impl AudioOutputCallback for RendererCallback {
    type FrameType = (f32, oboe::Mono);

    fn on_audio_ready(
        &mut self,
        _stream: &mut dyn AudioOutputStreamSafe,
        frames: &mut [f32],
    ) -> DataCallbackResult {
        self.renderer.render(frames);
        DataCallbackResult::Continue
    }
}

pub struct OboeBackend {
    clock: Arc<AudioClock>,
    sender: EventSender,
    owner: StreamOwner,
}

impl OboeBackend {
    /// Open and start the output stream.
    ///
    /// # Errors
    /// Returns `StreamOpenFailed` if Oboe cannot open or start the stream.
    pub async fn open(audio: AudioConfig) -> Result<Self, AudioError> {
        let (owner, handles) =
            StreamOwner::spawn("rhythm-oboe-output", move || open_output_stream(&audio)).await?;

        log::info!(
            "[OboeBackend] Output stream running at {} Hz",
            handles.clock.sample_rate()
        );

        Ok(Self {
            clock: handles.clock,
            sender: handles.sender,
            owner,
        })
    }
}

impl AudioBackend for OboeBackend {
    fn name(&self) -> &str {
        "oboe"
    }

    fn clock(&self) -> &Arc<AudioClock> {
        &self.clock
    }

    fn sender(&self) -> &EventSender {
        &self.sender
    }

    fn shutdown(&self) -> Result<(), AudioError> {
        self.owner.shutdown()
    }
}

fn open_output_stream(
    audio: &AudioConfig,
) -> Result<(AudioStreamAsync<Output, RendererCallback>, GraphHandles), AudioError> {
    let AudioGraph {
        clock,
        sender,
        renderer,
    } = AudioGraph::build(audio.sample_rate, audio);

    let mut stream = AudioStreamBuilder::default()
        .set_performance_mode(PerformanceMode::LowLatency)
        .set_sharing_mode(SharingMode::Exclusive)
        .set_direction::<Output>()
        .set_sample_rate(audio.sample_rate as i32)
        .set_channel_count::<oboe::Mono>()
        .set_format::<f32>()
        .set_callback(RendererCallback { renderer })
        .open_stream()
        .map_err(|e| AudioError::StreamOpenFailed {
            reason: format!("Output stream: {:?}", e),
        })?;

    stream.start().map_err(|e| AudioError::StreamOpenFailed {
        reason: format!("Failed to start output stream: {:?}", e),
    })?;

    Ok((
        stream,
        GraphHandles {
            clock,
            sender,
            device: "oboe".to_string(),
        },
    ))
}
