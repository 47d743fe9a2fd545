//! Audio output device abstraction.
//!
//! The session schedules mono float audio through [`AudioOutput`]. The real
//! speaker implementation ([`CpalOutput`]) is only built with the
//! `playback` feature, since cpal needs the platform audio headers.

use crate::error::Result;

/// A mono float output device with a pending-buffer queue
pub trait AudioOutput {
    /// Open the device for audio at `sample_rate`. Output stays stopped.
    fn connect(&mut self, sample_rate: u32) -> Result<()>;

    /// Queue samples after everything already scheduled, or replace all
    /// pending audio when `interrupt` is set
    fn schedule(&mut self, samples: &[f32], interrupt: bool);

    /// Begin (or continue) consuming the queue
    fn start(&mut self) -> Result<()>;

    /// Stop output and discard pending audio
    fn stop(&mut self);

    /// Release the device
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;
}

/// Linear-interpolation resampling between source and device rates
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).round() as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let index = (pos.floor() as usize).min(last);
            let next = (index + 1).min(last);
            let frac = (pos - index as f64) as f32;
            samples[index] + (samples[next] - samples[index]) * frac
        })
        .collect()
}

#[cfg(feature = "playback")]
pub use device::CpalOutput;

#[cfg(feature = "playback")]
mod device {
    use super::{resample, AudioOutput};
    use crate::error::{NarrateError, Result};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Speaker output via the default cpal host
    pub struct CpalOutput {
        stream: Option<cpal::Stream>,
        queue: Arc<Mutex<VecDeque<f32>>>,
        source_rate: u32,
        device_rate: u32,
    }

    impl CpalOutput {
        pub fn new() -> Self {
            Self {
                stream: None,
                queue: Arc::new(Mutex::new(VecDeque::new())),
                source_rate: 0,
                device_rate: 0,
            }
        }

        /// Mono at the source rate when the device supports it, else the
        /// device default (samples are then resampled and duplicated per channel)
        fn pick_config(device: &cpal::Device, sample_rate: u32) -> Result<cpal::StreamConfig> {
            let wanted = cpal::SampleRate(sample_rate);

            if let Ok(ranges) = device.supported_output_configs() {
                for range in ranges {
                    if range.channels() == 1
                        && range.sample_format() == cpal::SampleFormat::F32
                        && range.min_sample_rate() <= wanted
                        && wanted <= range.max_sample_rate()
                    {
                        return Ok(range.with_sample_rate(wanted).config());
                    }
                }
            }

            let default = device
                .default_output_config()
                .map_err(|e| NarrateError::DeviceStart(e.to_string()))?;
            if default.sample_format() != cpal::SampleFormat::F32 {
                return Err(NarrateError::DeviceStart(format!(
                    "unsupported device sample format {:?}",
                    default.sample_format()
                )));
            }
            Ok(default.config())
        }
    }

    impl Default for CpalOutput {
        fn default() -> Self {
            Self::new()
        }
    }

    impl AudioOutput for CpalOutput {
        fn connect(&mut self, sample_rate: u32) -> Result<()> {
            self.disconnect();

            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| NarrateError::DeviceStart("No audio output device found".into()))?;

            let config = Self::pick_config(&device, sample_rate)?;
            let channels = config.channels.max(1) as usize;
            let queue = Arc::clone(&self.queue);

            let stream = device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let Ok(mut queue) = queue.lock() else {
                            data.fill(0.0);
                            return;
                        };
                        // Same sample on every channel of the frame
                        for frame in data.chunks_mut(channels) {
                            let sample = queue.pop_front().unwrap_or(0.0);
                            frame.fill(sample);
                        }
                    },
                    |err| log::error!("Audio output error: {}", err),
                    None,
                )
                .map_err(|e| NarrateError::DeviceStart(e.to_string()))?;

            // Some hosts start streams on creation
            let _ = stream.pause();

            log::debug!(
                "Output device connected: {} channel(s) at {} Hz",
                config.channels,
                config.sample_rate.0
            );

            self.source_rate = sample_rate;
            self.device_rate = config.sample_rate.0;
            self.stream = Some(stream);
            Ok(())
        }

        fn schedule(&mut self, samples: &[f32], interrupt: bool) {
            let converted = resample(samples, self.source_rate, self.device_rate);
            if let Ok(mut queue) = self.queue.lock() {
                if interrupt {
                    queue.clear();
                }
                queue.extend(converted);
            }
        }

        fn start(&mut self) -> Result<()> {
            let stream = self
                .stream
                .as_ref()
                .ok_or_else(|| NarrateError::DeviceStart("output device is not connected".into()))?;
            stream
                .play()
                .map_err(|e| NarrateError::DeviceStart(e.to_string()))
        }

        fn stop(&mut self) {
            if let Some(stream) = &self.stream {
                if let Err(e) = stream.pause() {
                    log::debug!("Failed to pause output stream: {}", e);
                }
            }
            if let Ok(mut queue) = self.queue.lock() {
                queue.clear();
            }
        }

        fn disconnect(&mut self) {
            self.stop();
            self.stream = None;
        }

        fn is_connected(&self) -> bool {
            self.stream.is_some()
        }
    }
}
