// Speech synthesis engine trait and the external-command backend

use crate::error::{NarrateError, Result};
use crate::voices::VoiceEmbedding;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::process::{Command, Stdio};

/// A word as reported by the engine, with offsets in seconds from the
/// start of the chunk it was generated for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineToken {
    pub text: String,
    #[serde(default)]
    pub start_ts: Option<f64>,
    #[serde(default)]
    pub end_ts: Option<f64>,
    #[serde(default)]
    pub whitespace: bool,
}

/// Output of one synthesis call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Synthesis {
    pub samples: Vec<f32>,
    #[serde(default)]
    pub tokens: Vec<EngineToken>,
}

/// Neural TTS engine - all engines implement this.
///
/// `generate` blocks for as long as inference takes and is only ever
/// called from the background generation context, one call at a time.
pub trait SpeechSynthesizer: Send + Sync {
    fn generate(
        &self,
        voice: &VoiceEmbedding,
        language: &str,
        text: &str,
        speed: f32,
    ) -> Result<Synthesis>;

    /// Sample rate of the audio returned by `generate`
    fn sample_rate(&self) -> u32;

    /// Engine name
    fn name(&self) -> &str;
}

#[derive(Serialize)]
struct EngineRequest<'a> {
    voice: &'a str,
    embedding: &'a [f32],
    language: &'a str,
    text: &'a str,
    speed: f32,
}

/// Runs an external engine program once per chunk.
///
/// The request is written to the program's stdin as JSON and the program
/// answers on stdout with `{"samples": [...], "tokens": [...]}`.
pub struct CommandSynthesizer {
    program: String,
    args: Vec<String>,
    sample_rate: u32,
}

impl CommandSynthesizer {
    pub fn new(program: impl Into<String>, args: Vec<String>, sample_rate: u32) -> Self {
        Self {
            program: program.into(),
            args,
            sample_rate,
        }
    }

    fn parse_output(stdout: &[u8]) -> Result<Synthesis> {
        serde_json::from_slice(stdout)
            .map_err(|e| NarrateError::Synthesis(format!("invalid engine output: {}", e)))
    }
}

impl SpeechSynthesizer for CommandSynthesizer {
    fn generate(
        &self,
        voice: &VoiceEmbedding,
        language: &str,
        text: &str,
        speed: f32,
    ) -> Result<Synthesis> {
        let request = EngineRequest {
            voice: &voice.id,
            embedding: &voice.data,
            language,
            text,
            speed,
        };
        let payload = serde_json::to_vec(&request)
            .map_err(|e| NarrateError::Synthesis(format!("failed to encode request: {}", e)))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                NarrateError::Synthesis(format!("failed to spawn '{}': {}", self.program, e))
            })?;

        // Pass text via stdin to avoid shell escaping issues
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .map_err(|e| NarrateError::Synthesis(format!("failed to write request: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| NarrateError::Synthesis(format!("failed to wait for engine: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(NarrateError::Synthesis(format!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        Self::parse_output(&output.stdout)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn name(&self) -> &str {
        &self.program
    }
}
