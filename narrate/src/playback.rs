//! Playback engine: schedules timeline audio on the output device and
//! tracks the playback position from wall-clock anchors.
//!
//! Position is never read back from the device. While playing it is
//! `anchor_elapsed + (now - anchor)`; while stopped or paused it is frozen.
//! All times use `tokio::time::Instant` so tests can drive the clock.

use crate::audio::AudioTimeline;
use crate::error::Result;
use crate::output::AudioOutput;
use std::time::Duration;
use tokio::time::Instant;

/// Interval of the position/highlight tick
pub const TICK_INTERVAL: Duration = Duration::from_millis(50);

/// Wall-clock anchor for the playback position
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaybackClock {
    anchor: Option<Instant>,
    anchor_elapsed: Duration,
}

impl PlaybackClock {
    /// Run from `elapsed`, starting at `now`
    pub fn start_at(&mut self, elapsed: Duration, now: Instant) {
        self.anchor_elapsed = elapsed;
        self.anchor = Some(now);
    }

    /// Fold the running time into the anchor and stop
    pub fn pause(&mut self, now: Instant) {
        if let Some(anchor) = self.anchor.take() {
            self.anchor_elapsed += now.saturating_duration_since(anchor);
        }
    }

    /// Stop at a fixed position
    pub fn stop_at(&mut self, elapsed: Duration) {
        self.anchor = None;
        self.anchor_elapsed = elapsed;
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        match self.anchor {
            Some(anchor) => self.anchor_elapsed + now.saturating_duration_since(anchor),
            None => self.anchor_elapsed,
        }
    }

    pub fn is_running(&self) -> bool {
        self.anchor.is_some()
    }
}

/// Repeating tick that can be dropped at any time to invalidate it.
///
/// Missed ticks are skipped rather than replayed.
#[derive(Debug)]
pub struct Ticker {
    next: Instant,
    period: Duration,
}

impl Ticker {
    pub fn start(period: Duration) -> Self {
        Self {
            next: Instant::now() + period,
            period,
        }
    }

    /// Wait for the next tick. Cancel-safe.
    pub async fn tick(&mut self) {
        tokio::time::sleep_until(self.next).await;
        let now = Instant::now();
        self.next += self.period;
        if self.next <= now {
            self.next = now + self.period;
        }
    }
}

/// Result of one periodic tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Still playing at this position
    Position(Duration),
    /// Playback reached the end of the finished timeline
    Ended(Duration),
}

/// Owns the sample timeline and the output device for one session
pub struct PlaybackEngine {
    output: Box<dyn AudioOutput>,
    timeline: AudioTimeline,
    clock: PlaybackClock,
    ticker: Option<Ticker>,
    started: bool,
}

impl PlaybackEngine {
    pub fn new(output: Box<dyn AudioOutput>, sample_rate: u32) -> Self {
        Self {
            output,
            timeline: AudioTimeline::new(sample_rate),
            clock: PlaybackClock::default(),
            ticker: None,
            started: false,
        }
    }

    /// Open the output device if it is not open already
    pub fn connect(&mut self) -> Result<()> {
        if self.output.is_connected() {
            return Ok(());
        }
        self.output.connect(self.timeline.sample_rate())
    }

    /// Add a generated chunk to the timeline.
    ///
    /// The first chunk of a session starts playback; later chunks are queued
    /// behind it while playing, or only stored while paused. A chunk that
    /// lands after the clock ran past the previous end resumes from that end.
    pub fn append(&mut self, samples: &[f32]) -> Result<()> {
        let previous_total = self.timeline.duration();
        self.timeline.append(samples);

        if !self.started {
            return self.play_from_chunk_ready(samples);
        }

        if self.is_playing() {
            let now = Instant::now();
            if self.clock.elapsed(now) > previous_total {
                self.clock.start_at(previous_total, now);
            }
            self.enqueue(samples);
        }
        Ok(())
    }

    /// Start playback of the first available chunk
    pub fn play_from_chunk_ready(&mut self, samples: &[f32]) -> Result<()> {
        self.connect()?;
        self.output.schedule(samples, true);
        self.output.start()?;
        self.clock.start_at(Duration::ZERO, Instant::now());
        self.ticker = Some(Ticker::start(TICK_INTERVAL));
        self.started = true;
        log::debug!("Playback started with {} samples", samples.len());
        Ok(())
    }

    /// Queue audio behind everything already scheduled
    pub fn enqueue(&mut self, samples: &[f32]) {
        self.output.schedule(samples, false);
    }

    pub fn pause(&mut self) {
        if !self.is_playing() {
            return;
        }
        self.output.stop();
        self.clock.pause(Instant::now());
        self.ticker = None;
        log::debug!("Paused at {:?}", self.clock.elapsed(Instant::now()));
    }

    pub fn resume(&mut self) -> Result<()> {
        if self.is_playing() || self.timeline.is_empty() {
            return Ok(());
        }

        let elapsed = self.clock.elapsed(Instant::now());
        if elapsed >= self.timeline.duration() {
            self.seek_to(Duration::ZERO)
        } else {
            self.seek_to(elapsed)
        }
    }

    /// Restart output at `target_secs`, clamped to the audio generated so far
    pub fn seek(&mut self, target_secs: f64) -> Result<()> {
        self.seek_to(clamp_position(target_secs, self.timeline.duration()))
    }

    fn seek_to(&mut self, target: Duration) -> Result<()> {
        let target = target.min(self.timeline.duration());

        self.ticker = None;
        self.output.stop();
        self.clock.stop_at(target);

        if self.timeline.is_empty() {
            return Ok(());
        }

        self.connect()?;
        self.output.schedule(self.timeline.slice_from(target), true);
        self.output.start()?;

        self.clock.start_at(target, Instant::now());
        self.ticker = Some(Ticker::start(TICK_INTERVAL));
        self.started = true;
        log::debug!("Seeked to {:?}", target);
        Ok(())
    }

    /// Stop output and drop all audio, keeping the device connection
    pub fn reset(&mut self) {
        self.ticker = None;
        self.output.stop();
        self.clock.stop_at(Duration::ZERO);
        self.timeline.clear();
        self.started = false;
    }

    /// Stop output, drop all audio and release the device
    pub fn stop(&mut self) {
        self.reset();
        self.output.disconnect();
    }

    /// Advance the position; ends playback once the finished timeline is exhausted
    pub fn tick(&mut self, generating: bool) -> TickOutcome {
        let now = Instant::now();
        let elapsed = self.clock.elapsed(now);
        let total = self.timeline.duration();

        if elapsed < total {
            return TickOutcome::Position(elapsed);
        }

        if generating {
            // Underrun: hold at the end of what exists until the next chunk arrives
            if self.clock.is_running() {
                self.clock.start_at(total, now);
            }
            return TickOutcome::Position(total);
        }

        self.clock.stop_at(total);
        self.ticker = None;
        self.output.stop();
        log::debug!("Playback finished at {:?}", total);
        TickOutcome::Ended(total)
    }

    /// Wait for the next tick; pending forever while no tick is scheduled
    pub async fn next_tick(&mut self) {
        match self.ticker.as_mut() {
            Some(ticker) => ticker.tick().await,
            None => std::future::pending().await,
        }
    }

    pub fn is_ticking(&self) -> bool {
        self.ticker.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.clock.is_running()
    }

    pub fn has_audio(&self) -> bool {
        !self.timeline.is_empty()
    }

    /// Current position, never past the generated audio
    pub fn current_time(&self) -> Duration {
        self.clock
            .elapsed(Instant::now())
            .min(self.timeline.duration())
    }

    pub fn total_duration(&self) -> Duration {
        self.timeline.duration()
    }

    pub fn timeline(&self) -> &AudioTimeline {
        &self.timeline
    }
}

fn clamp_position(target_secs: f64, total: Duration) -> Duration {
    if !target_secs.is_finite() || target_secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(target_secs)
        .unwrap_or(total)
        .min(total)
}
