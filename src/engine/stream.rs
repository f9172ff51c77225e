//! Output device plumbing.
//!
//! The engine renders at a fixed rate chosen before it is built, so the device
//! is opened first: [`open_output`] picks the default output device and a
//! stream config matching the requested rate when the device supports it.
//! [`start`] then moves the engine into the cpal callback.

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    BufferSize, Device, SampleRate, Stream, StreamConfig,
};

use crate::{config::EngineConfig, engine::AudioEngine, error::Error};

/// A running output stream. Audio stops when this is dropped.
pub struct AudioOutput {
    _stream: Stream,
    pub sample_rate: u32,
    pub channels: u16,
}

/// The default output device and the config the engine should render at.
pub fn open_output(config: &EngineConfig) -> Result<(Device, StreamConfig), Error> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no default output device available".into()))?;
    let default = device
        .default_output_config()
        .map_err(|e| Error::Audio(format!("failed to fetch default output config: {e}")))?;

    let channels = config.channels.unwrap_or_else(|| default.channels());
    let wanted = SampleRate(config.sample_rate);
    let supported = device
        .supported_output_configs()
        .map(|mut ranges| {
            ranges.any(|range| {
                range.channels() == channels
                    && range.min_sample_rate() <= wanted
                    && wanted <= range.max_sample_rate()
            })
        })
        .unwrap_or(false);

    let sample_rate = if supported {
        wanted
    } else {
        log::warn!(
            "output device does not support {} Hz with {channels} channels, using {} Hz",
            config.sample_rate,
            default.sample_rate().0
        );
        default.sample_rate()
    };

    Ok((
        device,
        StreamConfig {
            channels,
            sample_rate,
            buffer_size: BufferSize::Default,
        },
    ))
}

/// Move `engine` into a cpal output callback and start playback.
pub fn start(device: &Device, stream_config: &StreamConfig, mut engine: AudioEngine) -> Result<AudioOutput, Error> {
    let channels = stream_config.channels as usize;
    if engine.sample_rate() as u32 != stream_config.sample_rate.0 {
        log::warn!(
            "engine renders at {} Hz but the stream runs at {} Hz",
            engine.sample_rate(),
            stream_config.sample_rate.0
        );
    }

    let stream = device
        .build_output_stream(
            stream_config,
            move |data: &mut [f32], _| engine.process(data, channels),
            |err| log::error!("audio stream error: {err}"),
            None,
        )
        .map_err(|e| Error::Audio(format!("failed to build output stream: {e}")))?;

    stream
        .play()
        .map_err(|e| Error::Audio(format!("failed to start output stream: {e}")))?;

    log::info!(
        "audio running: {} Hz, {} channels",
        stream_config.sample_rate.0,
        stream_config.channels
    );

    Ok(AudioOutput {
        _stream: stream,
        sample_rate: stream_config.sample_rate.0,
        channels: stream_config.channels,
    })
}
