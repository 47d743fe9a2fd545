//! Generation pipeline.
//!
//! Chunks are synthesized strictly in order, one blocking engine call at a
//! time, on a background thread. Each finished chunk is rebased onto the
//! utterance timeline and handed to the foreground as an immutable
//! [`ChunkAudio`] message; the foreground is the only place that mutates
//! session state.

use crate::audio::duration_of;
use crate::chunker::Chunk;
use crate::synth::SpeechSynthesizer;
use crate::token::Token;
use crate::voices::VoiceEmbedding;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Cooperative cancellation flag shared with the background loop.
///
/// Checked before each chunk starts; an in-flight engine call always runs
/// to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Everything needed to synthesize one utterance
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub chunks: Vec<Chunk>,
    pub voice: Arc<VoiceEmbedding>,
    pub language: String,
    pub speed: f32,
}

/// One synthesized chunk, already placed on the utterance timeline
#[derive(Debug, Clone)]
pub struct ChunkAudio {
    pub index: usize,
    pub samples: Vec<f32>,
    /// Rebased tokens, preceded by a separator for every chunk but the first
    pub tokens: Vec<Token>,
    /// Audio duration of all chunks delivered before this one
    pub offset: Duration,
    pub duration: Duration,
}

/// How a generation run ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerationSummary {
    pub delivered: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Messages from the background loop to the foreground
#[derive(Debug)]
pub enum PipelineEvent {
    ChunkReady(ChunkAudio),
    /// Sent exactly once, after the last chunk or after cancellation
    Finished(GenerationSummary),
}

/// Synthesize `request` chunk by chunk on the calling thread.
///
/// A chunk whose synthesis fails is logged and skipped. Stops before the
/// next chunk once `cancel` is set; chunks already delivered stay valid.
pub fn generate(
    synth: &dyn SpeechSynthesizer,
    request: &GenerationRequest,
    cancel: &CancelHandle,
    mut on_chunk_ready: impl FnMut(ChunkAudio),
) -> GenerationSummary {
    let sample_rate = synth.sample_rate();
    let mut summary = GenerationSummary::default();
    let mut samples_so_far = 0usize;

    for chunk in &request.chunks {
        if cancel.is_cancelled() {
            log::info!("Generation cancelled before chunk {}", chunk.index);
            summary.cancelled = true;
            break;
        }

        let started = Instant::now();
        let synthesis = match synth.generate(
            &request.voice,
            &request.language,
            &chunk.text,
            request.speed,
        ) {
            Ok(synthesis) => synthesis,
            Err(e) => {
                log::warn!("Skipping chunk {}: {}", chunk.index, e);
                summary.failed += 1;
                continue;
            }
        };

        let offset = duration_of(samples_so_far, sample_rate);
        let duration = duration_of(synthesis.samples.len(), sample_rate);
        samples_so_far += synthesis.samples.len();

        let mut tokens = Vec::with_capacity(synthesis.tokens.len() + 1);
        if chunk.index > 0 {
            tokens.push(Token::separator());
        }
        tokens.extend(synthesis.tokens.into_iter().map(|t| {
            Token::rebased(t.text, t.start_ts, t.end_ts, t.whitespace, offset)
        }));

        log::debug!(
            "Chunk {} synthesized in {:?}: {:.2}s of audio, {} tokens",
            chunk.index,
            started.elapsed(),
            duration.as_secs_f64(),
            tokens.len()
        );

        summary.delivered += 1;
        on_chunk_ready(ChunkAudio {
            index: chunk.index,
            samples: synthesis.samples,
            tokens,
            offset,
            duration,
        });
    }

    summary
}

/// A generation run on the blocking thread pool
pub struct Generation {
    cancel: CancelHandle,
    events: mpsc::UnboundedReceiver<PipelineEvent>,
    finished: Option<GenerationSummary>,
}

impl Generation {
    /// Start synthesizing `request` in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        synth: Arc<dyn SpeechSynthesizer>,
        request: GenerationRequest,
        cancel: CancelHandle,
    ) -> Self {
        let (tx, events) = mpsc::unbounded_channel();

        let loop_cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            let summary = generate(synth.as_ref(), &request, &loop_cancel, |chunk| {
                // Receiver gone means the session was dropped
                if tx.send(PipelineEvent::ChunkReady(chunk)).is_err() {
                    loop_cancel.cancel();
                }
            });
            let _ = tx.send(PipelineEvent::Finished(summary));
        });

        Self {
            cancel,
            events,
            finished: None,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Next message from the background loop, `None` once it has exited
    pub async fn recv(&mut self) -> Option<PipelineEvent> {
        self.events.recv().await
    }

    /// Cancel and wait until the background loop has exited.
    ///
    /// Chunks still arriving are discarded. Once this returns no engine call
    /// from this run is in flight. Cancel-safe: an interrupted wait can be
    /// resumed by calling it again.
    pub async fn retire(&mut self) -> GenerationSummary {
        self.cancel.cancel();

        while let Some(event) = self.events.recv().await {
            if let PipelineEvent::Finished(summary) = event {
                self.finished = Some(summary);
            }
        }

        let mut summary = self.finished.take().unwrap_or_default();
        summary.cancelled = true;
        summary
    }
}
