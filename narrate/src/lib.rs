//! Streaming text-to-speech with a follow-along cursor.
//!
//! Text is split into sentence chunks, synthesized one chunk at a time in
//! the background, and played as soon as the first chunk is ready while
//! later chunks are still being generated. Word timings from the engine
//! drive a highlighted-token index for the current playback position.

pub mod audio;
pub mod chunker;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod playback;
pub mod session;
pub mod synth;
pub mod token;
pub mod voices;

#[cfg(test)]
mod testing;

pub use audio::AudioTimeline;
pub use chunker::{chunk, Chunk};
pub use config::NarrateConfig;
pub use error::{NarrateError, Result};
pub use output::AudioOutput;
#[cfg(feature = "playback")]
pub use output::CpalOutput;
pub use pipeline::{CancelHandle, GenerationRequest, GenerationSummary};
pub use session::{Narrator, SessionEvent, SessionState};
pub use synth::{CommandSynthesizer, SpeechSynthesizer};
pub use token::{Timing, Token, TokenTimeline};
pub use voices::{VoiceEmbedding, VoiceStore};
