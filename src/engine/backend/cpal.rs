//! CPAL-based audio backend for desktop platforms (Linux, macOS, Windows)
//!
//! Opens the default output device at its native sample rate and format,
//! renders mono blocks through the [`Renderer`] and fans them out to every
//! channel of the interleaved device buffer.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample};

use crate::audio::{AudioClock, EventSender, Renderer};
use crate::config::AudioConfig;
use crate::error::AudioError;

use super::{AudioBackend, AudioGraph, GraphHandles, StreamOwner};

/// Largest mono block rendered in one pass; bigger device buffers are chunked
const MAX_BLOCK_FRAMES: usize = 1024;

pub struct CpalBackend {
    clock: Arc<AudioClock>,
    sender: EventSender,
    device: String,
    owner: StreamOwner,
}

impl CpalBackend {
    /// Open and start the default output stream.
    ///
    /// # Errors
    /// - `AudioUnavailable` if the host has no output device
    /// - `StreamOpenFailed` if the device rejects its default configuration
    pub async fn open(audio: AudioConfig) -> Result<Self, AudioError> {
        let (owner, handles) =
            StreamOwner::spawn("rhythm-cpal-output", move || open_output_stream(&audio)).await?;

        log::info!(
            "[CpalBackend] Output stream running on '{}' at {} Hz",
            handles.device,
            handles.clock.sample_rate()
        );

        Ok(Self {
            clock: handles.clock,
            sender: handles.sender,
            device: handles.device,
            owner,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &str {
        "cpal"
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

fn open_output_stream(audio: &AudioConfig) -> Result<(cpal::Stream, GraphHandles), AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| AudioError::AudioUnavailable {
            reason: "No default output device found".to_string(),
        })?;
    let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

    let supported = device
        .default_output_config()
        .map_err(|e| AudioError::StreamOpenFailed {
            reason: format!("Failed to get default output config: {:?}", e),
        })?;
    let sample_format = supported.sample_format();
    let stream_config: cpal::StreamConfig = supported.into();

    let AudioGraph {
        clock,
        sender,
        renderer,
    } = AudioGraph::build(stream_config.sample_rate.0, audio);

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, renderer),
        SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, renderer),
        SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, renderer),
        other => {
            return Err(AudioError::StreamOpenFailed {
                reason: format!("Unsupported output sample format {:?}", other),
            })
        }
    }?;

    stream.play().map_err(|e| AudioError::StreamOpenFailed {
        reason: format!("Failed to start output stream: {:?}", e),
    })?;

    Ok((
        stream,
        GraphHandles {
            clock,
            sender,
            device: device_name,
        },
    ))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut renderer: Renderer,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = (config.channels as usize).max(1);
    let mut mono = vec![0.0_f32; MAX_BLOCK_FRAMES];

    let err_fn = |err| log::error!("[CpalBackend] Output stream error: {}", err);

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for chunk in data.chunks_mut(MAX_BLOCK_FRAMES * channels) {
                    let block = &mut mono[..chunk.len() / channels];
                    renderer.render(block);
                    for (frame, &sample) in chunk.chunks_mut(channels).zip(block.iter()) {
                        let value = T::from_sample(sample);
                        frame.iter_mut().for_each(|out| *out = value);
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::StreamOpenFailed {
            reason: format!("{:?}", e),
        })
}
