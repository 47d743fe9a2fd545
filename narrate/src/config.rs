// narrate configuration management

use crate::chunker::DEFAULT_MAX_SENTENCES;
use crate::error::{NarrateError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::ops::RangeInclusive;
use std::path::PathBuf;

const DEFAULT_VOICE: &str = "af_heart";
const DEFAULT_LANGUAGE: &str = "en-us";
const DEFAULT_SPEED: f32 = 1.0;
const DEFAULT_SAMPLE_RATE: u32 = 24_000;
const DEFAULT_ENGINE: &str = "kokoro-engine";

pub const SPEED_RANGE: RangeInclusive<f32> = 0.5..=2.0;
pub const RATING_RANGE: RangeInclusive<u8> = 1..=5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrateConfig {
    /// Selected voice id
    #[serde(default = "default_voice")]
    pub voice: String,

    /// Language code passed to the engine
    #[serde(default = "default_language")]
    pub language: String,

    /// Speech-speed multiplier
    #[serde(default = "default_speed")]
    pub speed: f32,

    #[serde(default = "default_max_sentences")]
    pub max_sentences_per_chunk: usize,

    /// Sample rate of the engine's output
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// External synthesis program
    #[serde(default = "default_engine")]
    pub engine_command: String,

    #[serde(default)]
    pub engine_args: Vec<String>,

    /// Voice embedding resource (JSON)
    #[serde(default)]
    pub voices_path: Option<PathBuf>,

    /// Per-voice rating, 1 to 5
    #[serde(default)]
    pub ratings: BTreeMap<String, u8>,
}

fn default_voice() -> String {
    DEFAULT_VOICE.to_string()
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

fn default_speed() -> f32 {
    DEFAULT_SPEED
}

fn default_max_sentences() -> usize {
    DEFAULT_MAX_SENTENCES
}

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

fn default_engine() -> String {
    DEFAULT_ENGINE.to_string()
}

impl Default for NarrateConfig {
    fn default() -> Self {
        Self {
            voice: default_voice(),
            language: default_language(),
            speed: default_speed(),
            max_sentences_per_chunk: default_max_sentences(),
            sample_rate: default_sample_rate(),
            engine_command: default_engine(),
            engine_args: Vec::new(),
            voices_path: None,
            ratings: BTreeMap::new(),
        }
    }
}

impl NarrateConfig {
    /// Get the config directory path.
    ///
    /// Can be overridden via the `NARRATE_CONFIG_DIR` environment variable.
    pub fn config_dir() -> Result<PathBuf> {
        if let Ok(override_dir) = std::env::var("NARRATE_CONFIG_DIR") {
            return Ok(PathBuf::from(override_dir));
        }
        let home = dirs::home_dir()
            .ok_or_else(|| NarrateError::Config("Could not determine home directory".into()))?;
        Ok(home.join(".config").join("cli-programs"))
    }

    /// Get the config file path: ~/.config/cli-programs/narrate.toml
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("narrate.toml"))
    }

    /// Load config from file, returning default if file doesn't exist
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)?;
        Self::parse(&content)
            .map_err(|e| NarrateError::Config(format!("{}: {}", path.display(), e)))
    }

    fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| NarrateError::Config(e.to_string()))?;
        fs::write(&path, content)?;
        Ok(())
    }

    pub fn set_speed(&mut self, speed: f32) -> Result<()> {
        if !SPEED_RANGE.contains(&speed) {
            return Err(NarrateError::Config(format!(
                "speed must be between {} and {}, got {}",
                SPEED_RANGE.start(),
                SPEED_RANGE.end(),
                speed
            )));
        }
        self.speed = speed;
        Ok(())
    }

    pub fn set_max_sentences(&mut self, max_sentences: usize) -> Result<()> {
        if max_sentences == 0 {
            return Err(NarrateError::Config(
                "chunk size must be at least one sentence".into(),
            ));
        }
        self.max_sentences_per_chunk = max_sentences;
        Ok(())
    }

    pub fn rate_voice(&mut self, voice: &str, rating: u8) -> Result<()> {
        if !RATING_RANGE.contains(&rating) {
            return Err(NarrateError::Config(format!(
                "rating must be between {} and {}, got {}",
                RATING_RANGE.start(),
                RATING_RANGE.end(),
                rating
            )));
        }
        self.ratings.insert(voice.to_string(), rating);
        Ok(())
    }

    pub fn rating(&self, voice: &str) -> Option<u8> {
        self.ratings.get(voice).copied()
    }
}
