//! Narration session: the foreground owner of all playback state.
//!
//! A [`Narrator`] runs one utterance at a time. Generation happens on a
//! background thread and reaches the session only as [`PipelineEvent`]s,
//! which [`Narrator::next_event`] applies together with the playback tick.

use crate::chunker::{self, DEFAULT_MAX_SENTENCES};
use crate::error::Result;
use crate::output::AudioOutput;
use crate::pipeline::{
    CancelHandle, ChunkAudio, Generation, GenerationRequest, GenerationSummary, PipelineEvent,
};
use crate::playback::{PlaybackEngine, TickOutcome};
use crate::synth::SpeechSynthesizer;
use crate::token::{Token, TokenTimeline};
use crate::voices::VoiceEmbedding;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Something the caller may want to re-render for
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A chunk was appended to the timeline
    ChunkReady {
        index: usize,
        offset: Duration,
        duration: Duration,
    },
    /// The background loop is done; fires once per `say`
    GenerationFinished(GenerationSummary),
    /// Periodic playback position update
    Position {
        elapsed: Duration,
        active_token: Option<usize>,
    },
    /// Playback reached the end of the finished utterance
    PlaybackFinished,
    /// The device could not start; the session has been stopped
    PlaybackFailed(String),
}

/// Coarse session state derived from the playback flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No utterance loaded
    Idle,
    /// Audio loaded and playback at its end
    Stopped,
    /// Waiting for the first chunk
    Generating,
    Playing,
    Paused,
}

enum Wake {
    Pipeline(Option<PipelineEvent>),
    Tick,
}

pub struct Narrator {
    synth: Arc<dyn SpeechSynthesizer>,
    engine: PlaybackEngine,
    tokens: TokenTimeline,
    generation: Option<Generation>,
    /// Cancelled run whose loop has not exited yet
    retiring: Option<Generation>,
    pending: VecDeque<SessionEvent>,
    is_generating: bool,
    active_token: Option<usize>,
    max_sentences: usize,
}

impl Narrator {
    pub fn new(synth: Arc<dyn SpeechSynthesizer>, output: Box<dyn AudioOutput>) -> Self {
        let engine = PlaybackEngine::new(output, synth.sample_rate());
        Self {
            synth,
            engine,
            tokens: TokenTimeline::new(),
            generation: None,
            retiring: None,
            pending: VecDeque::new(),
            is_generating: false,
            active_token: None,
            max_sentences: DEFAULT_MAX_SENTENCES,
        }
    }

    pub fn with_max_sentences(mut self, max_sentences: usize) -> Self {
        self.max_sentences = max_sentences.max(1);
        self
    }

    /// Start narrating `text`, retiring any previous utterance first.
    ///
    /// Waits for the previous run's in-flight engine call to finish, so two
    /// generation loops never overlap; the previous run's
    /// `GenerationFinished` is queued for [`Narrator::next_event`].
    ///
    /// Returns the number of chunks queued for synthesis. Fails only when
    /// the output device cannot be opened, in which case nothing is queued.
    pub async fn say(
        &mut self,
        text: &str,
        voice: Arc<VoiceEmbedding>,
        language: &str,
        speed: f32,
    ) -> Result<usize> {
        self.stop();
        if let Some(summary) = self.finish_retiring().await {
            self.pending.push_back(SessionEvent::GenerationFinished(summary));
        }

        let chunks = chunker::chunk(text, self.max_sentences);
        if chunks.is_empty() {
            log::info!("Nothing to say");
            return Ok(0);
        }

        self.engine.connect()?;

        let count = chunks.len();
        log::info!(
            "Narrating {} chunk(s) with voice '{}' via {}",
            count,
            voice.id,
            self.synth.name()
        );

        let request = GenerationRequest {
            chunks,
            voice,
            language: language.to_string(),
            speed,
        };
        self.generation = Some(Generation::spawn(
            Arc::clone(&self.synth),
            request,
            CancelHandle::new(),
        ));
        self.is_generating = true;
        Ok(count)
    }

    /// Wait for the next thing that changes the session.
    ///
    /// A run retired by `stop`, `clear_audio` or a device failure still
    /// reports `GenerationFinished` (marked cancelled) once its loop exits.
    /// Returns `None` once there is nothing left to wait for: no generation
    /// running and playback stopped or paused.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        if let Some(event) = self.pending.pop_front() {
            return Some(event);
        }
        if let Some(summary) = self.finish_retiring().await {
            return Some(SessionEvent::GenerationFinished(summary));
        }

        loop {
            if self.generation.is_none() && !self.engine.is_ticking() {
                return None;
            }

            let wake = tokio::select! {
                biased;
                event = recv_from(&mut self.generation) => Wake::Pipeline(event),
                _ = self.engine.next_tick() => Wake::Tick,
            };

            match wake {
                Wake::Pipeline(Some(PipelineEvent::ChunkReady(chunk))) => {
                    return Some(self.apply_chunk(chunk));
                }
                Wake::Pipeline(Some(PipelineEvent::Finished(summary))) => {
                    self.generation = None;
                    self.is_generating = false;
                    log::info!(
                        "Generation finished: {} delivered, {} failed{}",
                        summary.delivered,
                        summary.failed,
                        if summary.cancelled { ", cancelled" } else { "" }
                    );
                    return Some(SessionEvent::GenerationFinished(summary));
                }
                Wake::Pipeline(None) => {
                    // Loop exited without reporting, e.g. the engine panicked
                    log::warn!("Generation ended without a summary");
                    self.generation = None;
                    self.is_generating = false;
                }
                Wake::Tick => return Some(self.apply_tick()),
            }
        }
    }

    fn apply_chunk(&mut self, chunk: ChunkAudio) -> SessionEvent {
        if let Err(e) = self.engine.append(&chunk.samples) {
            log::error!("{}", e);
            self.stop();
            return SessionEvent::PlaybackFailed(e.to_string());
        }
        self.tokens.extend(chunk.tokens);

        SessionEvent::ChunkReady {
            index: chunk.index,
            offset: chunk.offset,
            duration: chunk.duration,
        }
    }

    fn apply_tick(&mut self) -> SessionEvent {
        match self.engine.tick(self.is_generating) {
            TickOutcome::Position(elapsed) => {
                self.active_token = self.tokens.active_token(elapsed);
                SessionEvent::Position {
                    elapsed,
                    active_token: self.active_token,
                }
            }
            TickOutcome::Ended(_) => {
                self.active_token = None;
                SessionEvent::PlaybackFinished
            }
        }
    }

    pub fn pause(&mut self) {
        self.engine.pause();
    }

    pub fn resume(&mut self) -> Result<()> {
        self.engine.resume()?;
        self.refresh_active_token();
        Ok(())
    }

    pub fn toggle_play_pause(&mut self) -> Result<()> {
        if self.engine.is_playing() {
            self.pause();
            Ok(())
        } else {
            self.resume()
        }
    }

    /// Jump to `target_secs`, clamped to the audio generated so far
    pub fn seek(&mut self, target_secs: f64) -> Result<()> {
        self.engine.seek(target_secs)?;
        self.refresh_active_token();
        Ok(())
    }

    /// Stop producing further chunks; delivered audio stays playable
    pub fn cancel_generation(&mut self) {
        if let Some(generation) = &self.generation {
            generation.cancel();
        }
    }

    /// Retire the session and release the output device
    pub fn stop(&mut self) {
        self.retire();
        self.engine.stop();
    }

    /// Retire the session but keep the output device connected
    pub fn clear_audio(&mut self) {
        self.retire();
        self.engine.reset();
    }

    fn retire(&mut self) {
        if let Some(generation) = self.generation.take() {
            log::debug!("Retiring in-flight generation");
            generation.cancel();
            self.retiring = Some(generation);
        }
        self.is_generating = false;
        self.tokens.clear();
        self.active_token = None;
    }

    /// Wait for a retired run's loop to exit and collect its summary
    async fn finish_retiring(&mut self) -> Option<GenerationSummary> {
        let generation = self.retiring.as_mut()?;
        let summary = generation.retire().await;
        self.retiring = None;
        log::debug!("Retired generation exited after {} chunk(s)", summary.delivered);
        Some(summary)
    }

    fn refresh_active_token(&mut self) {
        self.active_token = self.tokens.active_token(self.engine.current_time());
    }

    /// Write everything generated so far to `path`
    pub fn export(&self, path: &Path) -> Result<()> {
        self.engine.timeline().export(path)
    }

    pub fn state(&self) -> SessionState {
        if self.engine.is_playing() {
            SessionState::Playing
        } else if self.has_audio() && self.current_time() < self.total_duration() {
            SessionState::Paused
        } else if self.is_generating {
            SessionState::Generating
        } else if self.has_audio() {
            SessionState::Stopped
        } else {
            SessionState::Idle
        }
    }

    pub fn is_playing(&self) -> bool {
        self.engine.is_playing()
    }

    pub fn is_generating(&self) -> bool {
        self.is_generating
    }

    pub fn has_audio(&self) -> bool {
        self.engine.has_audio()
    }

    pub fn current_time(&self) -> Duration {
        self.engine.current_time()
    }

    pub fn total_duration(&self) -> Duration {
        self.engine.total_duration()
    }

    pub fn active_token_index(&self) -> Option<usize> {
        self.active_token
    }

    pub fn tokens(&self) -> &[Token] {
        self.tokens.tokens()
    }

    /// Plain text of everything spoken so far
    pub fn spoken_text(&self) -> String {
        self.tokens.spoken_text(self.current_time())
    }
}

impl Drop for Narrator {
    fn drop(&mut self) {
        self.retire();
        if let Some(generation) = &self.retiring {
            generation.cancel();
        }
    }
}

async fn recv_from(generation: &mut Option<Generation>) -> Option<PipelineEvent> {
    match generation {
        Some(generation) => generation.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingOutput, ScriptedSynth};
    use crate::NarrateError;
    use tokio::time::advance;

    fn narrator(synth: ScriptedSynth, output: &RecordingOutput) -> (Narrator, Arc<ScriptedSynth>) {
        let synth = Arc::new(synth);
        let narrator = Narrator::new(synth.clone(), Box::new(output.clone())).with_max_sentences(1);
        (narrator, synth)
    }

    fn voice() -> Arc<VoiceEmbedding> {
        Arc::new(VoiceEmbedding::named("af_heart"))
    }

    /// Pump events until generation finishes, ignoring position ticks
    async fn drain_generation(narrator: &mut Narrator) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Some(event) = narrator.next_event().await {
            if matches!(event, SessionEvent::Position { .. }) {
                continue;
            }
            let done = matches!(
                event,
                SessionEvent::GenerationFinished(_) | SessionEvent::PlaybackFailed(_)
            );
            events.push(event);
            if done {
                break;
            }
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_say_plays_every_chunk() {
        let output = RecordingOutput::new();
        let (mut narrator, synth) = narrator(ScriptedSynth::new(10), &output);

        let count = narrator.say("One. Two. Three.", voice(), "en-us", 1.0).await.unwrap();
        assert_eq!(count, 3);
        assert!(narrator.is_generating());

        let events = drain_generation(&mut narrator).await;
        let ready: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::ChunkReady { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(ready, vec![0, 1, 2]);
        assert!(matches!(events.last(), Some(SessionEvent::GenerationFinished(_))));

        assert!(!narrator.is_generating());
        assert!(narrator.is_playing());
        assert_eq!(narrator.total_duration(), Duration::from_secs(3));
        assert_eq!(narrator.tokens().len(), 5);
        assert_eq!(synth.calls(), vec!["One.", "Two.", "Three."]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sample_count_is_sum_of_chunks() {
        let output = RecordingOutput::new();
        let synth = ScriptedSynth::new(10).with_lengths(&[("One.", 7), ("Two.", 13)]);
        let (mut narrator, _synth) = narrator(synth, &output);

        narrator.say("One. Two. Three.", voice(), "en-us", 1.0).await.unwrap();
        drain_generation(&mut narrator).await;
        narrator.seek(0.0).unwrap();

        assert_eq!(output.log().queue.len(), 7 + 13 + 10);
        assert_eq!(narrator.total_duration(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_text_does_nothing() {
        let output = RecordingOutput::new();
        let (mut narrator, synth) = narrator(ScriptedSynth::new(10), &output);

        assert_eq!(narrator.say("  \n\n ", voice(), "en-us", 1.0).await.unwrap(), 0);
        assert!(!narrator.is_generating());
        assert!(narrator.next_event().await.is_none());
        assert!(synth.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_failure_leaves_no_state() {
        let output = RecordingOutput::failing_connect();
        let (mut narrator, synth) = narrator(ScriptedSynth::new(10), &output);

        let err = narrator.say("One. Two.", voice(), "en-us", 1.0).await.unwrap_err();
        assert!(matches!(err, NarrateError::DeviceStart(_)));
        assert!(!narrator.is_generating());
        assert!(!narrator.has_audio());
        assert!(narrator.tokens().is_empty());
        assert!(narrator.next_event().await.is_none());
        assert!(synth.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_failure_stops_session() {
        let output = RecordingOutput::failing_start();
        let (mut narrator, _synth) = narrator(ScriptedSynth::new(10), &output);

        narrator.say("One. Two.", voice(), "en-us", 1.0).await.unwrap();
        let events = drain_generation(&mut narrator).await;

        assert!(matches!(events.last(), Some(SessionEvent::PlaybackFailed(_))));
        assert!(!narrator.is_generating());
        assert!(!narrator.has_audio());
        assert!(narrator.tokens().is_empty());
        assert_eq!(narrator.state(), SessionState::Idle);

        // The aborted run still reports that it finished
        match narrator.next_event().await {
            Some(SessionEvent::GenerationFinished(summary)) => assert!(summary.cancelled),
            other => panic!("expected GenerationFinished, got {:?}", other),
        }
        assert!(narrator.next_event().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_finished_fires_once_after_cancel() {
        let output = RecordingOutput::new();
        let (mut narrator, _synth) = narrator(ScriptedSynth::new(10), &output);

        narrator.say("One. Two. Three. Four. Five.", voice(), "en-us", 1.0).await.unwrap();
        narrator.cancel_generation();

        let events = drain_generation(&mut narrator).await;
        let finished = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::GenerationFinished(_)))
            .count();
        assert_eq!(finished, 1);
        assert!(!narrator.is_generating());

        // Whatever was delivered before cancellation stays playable
        let delivered = events.len() - 1;
        assert_eq!(narrator.total_duration(), Duration::from_secs(delivered as u64));
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_to_natural_end() {
        let output = RecordingOutput::new();
        let (mut narrator, _synth) = narrator(ScriptedSynth::new(10), &output);

        narrator.say("One. Two.", voice(), "en-us", 1.0).await.unwrap();

        let mut events = Vec::new();
        while let Some(event) = narrator.next_event().await {
            events.push(event);
        }

        assert_eq!(events.last(), Some(&SessionEvent::PlaybackFinished));
        let positions: Vec<Duration> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Position { elapsed, .. } => Some(*elapsed),
                _ => None,
            })
            .collect();
        assert!(positions.windows(2).all(|w| w[0] <= w[1]));

        assert!(!narrator.is_playing());
        assert_eq!(narrator.current_time(), Duration::from_secs(2));
        assert_eq!(narrator.active_token_index(), None);
        assert_eq!(narrator.state(), SessionState::Stopped);
        assert!(narrator.has_audio());
    }

    #[tokio::test(start_paused = true)]
    async fn test_seek_updates_active_token() {
        let output = RecordingOutput::new();
        let (mut narrator, _synth) = narrator(ScriptedSynth::new(10), &output);

        narrator.say("One. Two.", voice(), "en-us", 1.0).await.unwrap();
        drain_generation(&mut narrator).await;

        narrator.seek(1.5).unwrap();
        assert_eq!(narrator.active_token_index(), Some(2));
        assert_eq!(narrator.spoken_text(), "One. Two. ");

        narrator.seek(0.5).unwrap();
        assert_eq!(narrator.active_token_index(), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_resume_keeps_position() {
        let output = RecordingOutput::new();
        let (mut narrator, _synth) = narrator(ScriptedSynth::new(10), &output);

        narrator.say("One. Two.", voice(), "en-us", 1.0).await.unwrap();
        drain_generation(&mut narrator).await;

        narrator.seek(0.0).unwrap();
        advance(Duration::from_millis(300)).await;
        narrator.toggle_play_pause().unwrap();
        assert_eq!(narrator.state(), SessionState::Paused);

        advance(Duration::from_secs(5)).await;
        narrator.toggle_play_pause().unwrap();
        assert_eq!(narrator.state(), SessionState::Playing);
        assert_eq!(narrator.current_time(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_clears_session() {
        let output = RecordingOutput::new();
        let (mut narrator, _synth) = narrator(ScriptedSynth::new(10), &output);

        narrator.say("One. Two.", voice(), "en-us", 1.0).await.unwrap();
        drain_generation(&mut narrator).await;
        narrator.stop();

        assert!(!narrator.is_playing());
        assert!(!narrator.has_audio());
        assert!(narrator.tokens().is_empty());
        assert_eq!(narrator.current_time(), Duration::ZERO);
        assert_eq!(narrator.state(), SessionState::Idle);
        assert!(!output.log().connected);
        assert!(narrator.next_event().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_audio_keeps_device() {
        let output = RecordingOutput::new();
        let (mut narrator, _synth) = narrator(ScriptedSynth::new(10), &output);

        narrator.say("One.", voice(), "en-us", 1.0).await.unwrap();
        drain_generation(&mut narrator).await;
        narrator.clear_audio();

        assert!(!narrator.has_audio());
        assert!(output.log().connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_say_retires_previous() {
        let output = RecordingOutput::new();
        let (mut narrator, synth) = narrator(ScriptedSynth::new(10), &output);

        narrator.say("One. Two.", voice(), "en-us", 1.0).await.unwrap();
        drain_generation(&mut narrator).await;

        narrator.say("Three.", voice(), "en-us", 1.0).await.unwrap();
        assert!(!narrator.has_audio());
        assert!(narrator.tokens().is_empty());

        drain_generation(&mut narrator).await;
        assert_eq!(narrator.total_duration(), Duration::from_secs(1));
        assert_eq!(narrator.tokens().len(), 1);
        assert_eq!(synth.calls().last().map(String::as_str), Some("Three."));
        assert_eq!(output.log().connects, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_export_without_audio_fails() {
        let output = RecordingOutput::new();
        let (narrator, _synth) = narrator(ScriptedSynth::new(10), &output);
        let err = narrator.export(Path::new("/tmp/narrate-empty.wav")).unwrap_err();
        assert!(matches!(err, NarrateError::Export { .. }));
    }

    #[tokio::test]
    async fn test_stop_mid_generation_reports_finished() {
        let output = RecordingOutput::new();
        let synth = ScriptedSynth::new(10).with_delay(Duration::from_millis(300));
        let (mut narrator, synth) = narrator(synth, &output);

        narrator.say("One. Two. Three.", voice(), "en-us", 1.0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        narrator.stop();
        assert!(!narrator.is_generating());

        match narrator.next_event().await {
            Some(SessionEvent::GenerationFinished(summary)) => assert!(summary.cancelled),
            other => panic!("expected GenerationFinished, got {:?}", other),
        }
        assert_eq!(synth.in_flight(), 0);
        assert!(synth.calls().len() <= 1);
        assert!(narrator.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_say_while_generating_waits_for_previous_run() {
        let output = RecordingOutput::new();
        let synth = ScriptedSynth::new(10).with_delay(Duration::from_millis(300));
        let (mut narrator, synth) = narrator(synth, &output);

        narrator.say("One. Two. Three.", voice(), "en-us", 1.0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        narrator.say("Four. Five.", voice(), "en-us", 1.0).await.unwrap();

        // The replaced run reports first, then the new one runs to completion
        match narrator.next_event().await {
            Some(SessionEvent::GenerationFinished(summary)) => assert!(summary.cancelled),
            other => panic!("expected GenerationFinished, got {:?}", other),
        }
        let events = drain_generation(&mut narrator).await;
        assert!(matches!(
            events.last(),
            Some(SessionEvent::GenerationFinished(summary)) if !summary.cancelled
        ));

        assert_eq!(synth.max_in_flight(), 1);
        let calls = synth.calls();
        assert!(!calls.iter().any(|c| c == "Two." || c == "Three."));
        assert_eq!(calls[calls.len() - 2..], ["Four.", "Five."]);
        assert_eq!(narrator.tokens().len(), 3);
    }
}
