// Test doubles for the engine and the output device

use crate::error::{NarrateError, Result};
use crate::output::AudioOutput;
use crate::pipeline::CancelHandle;
use crate::synth::{EngineToken, SpeechSynthesizer, Synthesis};
use crate::voices::VoiceEmbedding;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Sample rate of [`ScriptedSynth`]: ten samples per second keeps durations readable
pub const SCRIPTED_RATE: u32 = 10;

/// Engine that returns a fixed number of samples per chunk and one token
/// spanning the whole chunk
pub struct ScriptedSynth {
    default_len: usize,
    lengths: HashMap<String, usize>,
    failing: Vec<String>,
    cancel_after: Option<(usize, CancelHandle)>,
    delay: Duration,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedSynth {
    pub fn new(default_len: usize) -> Self {
        Self {
            default_len,
            lengths: HashMap::new(),
            failing: Vec::new(),
            cancel_after: None,
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_lengths(mut self, lengths: &[(&str, usize)]) -> Self {
        for (text, len) in lengths {
            self.lengths.insert(text.to_string(), *len);
        }
        self
    }

    pub fn failing_on(mut self, text: &str) -> Self {
        self.failing.push(text.to_string());
        self
    }

    /// Request cancellation while the `n`th call is still in flight
    pub fn cancelling_after(mut self, n: usize, cancel: CancelHandle) -> Self {
        self.cancel_after = Some((n, cancel));
        self
    }

    /// Block every call for `delay` of real time
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Most engine calls ever running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn synthesize(&self, text: &str) -> Result<Synthesis> {
        let call_count = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(text.to_string());
            calls.len()
        };

        if let Some((n, cancel)) = &self.cancel_after {
            if call_count >= *n {
                cancel.cancel();
            }
        }

        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        if self.failing.iter().any(|t| t == text) {
            return Err(NarrateError::Synthesis(format!("scripted failure for '{}'", text)));
        }

        let len = self.lengths.get(text).copied().unwrap_or(self.default_len);
        Ok(Synthesis {
            samples: vec![0.25; len],
            tokens: vec![EngineToken {
                text: text.to_string(),
                start_ts: Some(0.0),
                end_ts: Some(len as f64 / SCRIPTED_RATE as f64),
                whitespace: true,
            }],
        })
    }
}

impl SpeechSynthesizer for ScriptedSynth {
    fn generate(
        &self,
        _voice: &VoiceEmbedding,
        _language: &str,
        text: &str,
        _speed: f32,
    ) -> Result<Synthesis> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let result = self.synthesize(text);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn sample_rate(&self) -> u32 {
        SCRIPTED_RATE
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// What a [`RecordingOutput`] has been asked to do
#[derive(Debug, Default)]
pub struct OutputLog {
    pub connected: bool,
    pub running: bool,
    /// Audio pending since the last interrupt
    pub queue: Vec<f32>,
    pub interrupts: usize,
    pub connects: usize,
    pub disconnects: usize,
    pub fail_connect: bool,
    pub fail_start: bool,
}

/// Output device that records every call instead of making sound
#[derive(Clone, Default)]
pub struct RecordingOutput {
    log: Arc<Mutex<OutputLog>>,
}

impl RecordingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_connect() -> Self {
        let output = Self::new();
        output.log.lock().unwrap().fail_connect = true;
        output
    }

    pub fn failing_start() -> Self {
        let output = Self::new();
        output.log.lock().unwrap().fail_start = true;
        output
    }

    pub fn log(&self) -> std::sync::MutexGuard<'_, OutputLog> {
        self.log.lock().unwrap()
    }
}

impl AudioOutput for RecordingOutput {
    fn connect(&mut self, _sample_rate: u32) -> Result<()> {
        let mut log = self.log();
        if log.fail_connect {
            return Err(NarrateError::DeviceStart("no device".to_string()));
        }
        log.connected = true;
        log.connects += 1;
        Ok(())
    }

    fn schedule(&mut self, samples: &[f32], interrupt: bool) {
        let mut log = self.log();
        if interrupt {
            log.queue.clear();
            log.interrupts += 1;
        }
        log.queue.extend_from_slice(samples);
    }

    fn start(&mut self) -> Result<()> {
        let mut log = self.log();
        if log.fail_start {
            return Err(NarrateError::DeviceStart("device busy".to_string()));
        }
        log.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        let mut log = self.log();
        log.running = false;
        log.queue.clear();
    }

    fn disconnect(&mut self) {
        self.stop();
        let mut log = self.log();
        log.connected = false;
        log.disconnects += 1;
    }

    fn is_connected(&self) -> bool {
        self.log().connected
    }
}
