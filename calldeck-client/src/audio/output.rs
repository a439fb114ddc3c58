//! Audio output using cpal
//!
//! Opens the output device at the fixed 16 kHz synthesis rate and runs the
//! render callback on the device's real-time schedule. The callback only
//! drains the lock-free command channel through [`RenderState`]; device
//! errors are flagged atomically for the control side to observe.

use crate::audio::convert::SAMPLE_RATE;
use crate::audio::queue::RenderState;
use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Audio output manager owning the device and stream.
///
/// Not Send: the cpal `Stream` must live on the thread that created it, so
/// the playback engine keeps this on a dedicated audio thread.
pub struct AudioOutput {
    device: Device,
    config: StreamConfig,
    stream: Option<Stream>,
    /// Stream error flag, set by the device error callback
    error_flag: Arc<AtomicBool>,
}

impl AudioOutput {
    /// Open the default output device at 16 kHz.
    ///
    /// # Arguments
    /// - `buffer_size`: Output buffer size in frames (None = device default;
    ///   smaller values lower latency)
    ///
    /// # Errors
    /// - No default output device
    /// - Device has no f32 configuration covering 16 kHz
    pub fn new(buffer_size: Option<u32>) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))?;

        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Using default audio device: {}", name);

        let mut config = Self::pick_config(&device)?;

        if let Some(size) = buffer_size {
            config.buffer_size = cpal::BufferSize::Fixed(size);
            debug!("Using requested buffer size: {} frames", size);
        }

        debug!(
            "Audio config: sample_rate={}, channels={}, buffer_size={:?}",
            config.sample_rate.0, config.channels, config.buffer_size
        );

        Ok(Self {
            device,
            config,
            stream: None,
            error_flag: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Pick an f32 output configuration at the fixed 16 kHz rate.
    ///
    /// Prefers the fewest channels on offer; the mono render sample is
    /// duplicated across whatever channel count the device requires.
    fn pick_config(device: &Device) -> Result<StreamConfig> {
        let supported = device
            .supported_output_configs()
            .map_err(|e| Error::AudioOutput(format!("Failed to get device configs: {}", e)))?;

        let best = supported
            .filter(|range| {
                range.sample_format() == SampleFormat::F32
                    && range.min_sample_rate().0 <= SAMPLE_RATE
                    && range.max_sample_rate().0 >= SAMPLE_RATE
            })
            .min_by_key(|range| range.channels());

        match best {
            Some(range) => Ok(range.with_sample_rate(SampleRate(SAMPLE_RATE)).config()),
            None => Err(Error::AudioOutput(format!(
                "No f32 output configuration supports {} Hz",
                SAMPLE_RATE
            ))),
        }
    }

    /// Start the audio stream with the render state as its callback.
    ///
    /// The callback runs on the device's real-time thread and must not
    /// block; [`RenderState::fill`] only try-pops the command channel and
    /// reads buffered chunks. The explicit `play()` also covers devices
    /// that come up in a suspended power state.
    pub fn start(&mut self, mut render: RenderState) -> Result<()> {
        info!("Starting audio stream");

        let channels = self.config.channels as usize;
        let error_flag = Arc::clone(&self.error_flag);

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    render.fill(data, channels);
                },
                move |err| {
                    error!("Audio stream error: {}", err);
                    error_flag.store(true, Ordering::SeqCst);
                },
                None,
            )
            .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;

        self.stream = Some(stream);

        info!("Audio stream started successfully");
        Ok(())
    }

    /// Stop audio playback and drop the stream.
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                debug!("Failed to pause stream on stop: {}", e);
            }
            drop(stream);
            info!("Audio stream stopped");
        }
    }

    /// Shared handle to the stream error flag.
    pub fn error_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.error_flag)
    }

    /// Get channel count.
    pub fn channels(&self) -> u16 {
        self.config.channels
    }

    /// Get sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}
