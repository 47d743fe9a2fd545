//! Error types for the narrate library

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using NarrateError
pub type Result<T> = std::result::Result<T, NarrateError>;

/// Errors that can occur while generating, playing or exporting speech
#[derive(Debug, Error)]
pub enum NarrateError {
    /// The synthesis engine failed for a single chunk
    #[error("Synthesis failed: {0}")]
    Synthesis(String),

    /// The audio output device could not be opened or started
    #[error("Audio device failed to start: {0}")]
    DeviceStart(String),

    /// Writing an audio file failed
    #[error("Failed to export audio to {path}: {message}")]
    Export { path: PathBuf, message: String },

    /// A voice id that the voice store does not know about
    #[error("Unknown voice '{voice}'. Available: {available}")]
    UnknownVoice { voice: String, available: String },

    /// The packaged voice resource could not be loaded
    #[error("Failed to load voices from {path}: {message}")]
    VoiceStore { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NarrateError {
    pub(crate) fn export(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Export {
            path: path.into(),
            message: message.to_string(),
        }
    }
}
