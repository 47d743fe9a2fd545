// Accumulated sample buffer for one utterance, plus file export

use crate::error::{NarrateError, Result};
use std::path::Path;
use std::process::Command;
use std::time::Duration;
use tempfile::NamedTempFile;

/// One logical, seekable timeline of mono float samples
#[derive(Debug, Clone)]
pub struct AudioTimeline {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioTimeline {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            samples: Vec::new(),
            sample_rate: sample_rate.max(1),
        }
    }

    /// Append one chunk's samples directly after the previous chunk
    pub fn append(&mut self, samples: &[f32]) {
        self.samples.extend_from_slice(samples);
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        duration_of(self.samples.len(), self.sample_rate)
    }

    /// Sample index for a position, clamped to the generated audio
    pub fn index_at(&self, position: Duration) -> usize {
        let index = (position.as_secs_f64() * self.sample_rate as f64).round() as usize;
        index.min(self.samples.len())
    }

    /// Everything generated from `position` onward
    pub fn slice_from(&self, position: Duration) -> &[f32] {
        &self.samples[self.index_at(position)..]
    }

    /// Write the timeline to `path`; the extension picks the format.
    ///
    /// `.wav` is written directly as 16-bit PCM. `.m4a` is rendered to a
    /// temporary WAV and converted with `afconvert`.
    pub fn export(&self, path: &Path) -> Result<()> {
        if self.samples.is_empty() {
            return Err(NarrateError::export(path, "no audio has been generated"));
        }

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        match extension.as_str() {
            "wav" => self.write_wav(path),
            "m4a" => self.write_m4a(path),
            other => Err(NarrateError::export(
                path,
                format!("unsupported format '{}' (use .wav or .m4a)", other),
            )),
        }
    }

    fn write_wav(&self, path: &Path) -> Result<()> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer =
            hound::WavWriter::create(path, spec).map_err(|e| NarrateError::export(path, e))?;

        for sample in &self.samples {
            let scaled = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer
                .write_sample(scaled)
                .map_err(|e| NarrateError::export(path, e))?;
        }

        writer.finalize().map_err(|e| NarrateError::export(path, e))
    }

    fn write_m4a(&self, path: &Path) -> Result<()> {
        let temp = NamedTempFile::with_suffix(".wav").map_err(|e| NarrateError::export(path, e))?;
        self.write_wav(temp.path())?;

        let status = Command::new("afconvert")
            .arg("-f")
            .arg("m4af") // M4A container
            .arg("-d")
            .arg("aac")
            .arg("-b")
            .arg("128000")
            .arg(temp.path())
            .arg(path)
            .status()
            .map_err(|e| NarrateError::export(path, format!("failed to run afconvert: {}", e)))?;

        if !status.success() {
            return Err(NarrateError::export(
                path,
                format!("afconvert failed with status: {}", status),
            ));
        }

        Ok(())
    }
}

/// Duration of `count` samples at `sample_rate`
pub fn duration_of(count: usize, sample_rate: u32) -> Duration {
    Duration::from_secs_f64(count as f64 / sample_rate.max(1) as f64)
}
