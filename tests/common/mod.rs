//! Shared test utilities
//!
//! Scripted stand-ins for the microphone, backends, and speaker. Audio and
//! playback follow tokio's clock, so tests run with paused time.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use fridge_companion::agent::{ChatMessage, ImageFrame, InferenceBackend};
use fridge_companion::presentation::Presenter;
use fridge_companion::turn::InferenceResponse;
use fridge_companion::voice::{
    AudioClip, AudioInput, AudioOutput, KeywordEngine, Synthesizer, Transcriber, VoiceParams,
    samples_to_wav,
};
use fridge_companion::{Error, Result};

pub const RATE: u32 = 16_000;

/// Shared, ordered record of what the fakes did
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.entries().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

/// Counters for a [`ScriptedInput`]
#[derive(Default)]
pub struct InputProbe {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
}

impl InputProbe {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Microphone that replays an amplitude script from the moment it opens
///
/// Each `(until, amplitude)` segment covers time since open up to `until`;
/// after the last segment the input is silent.
pub struct ScriptedInput {
    script: Vec<(Duration, f32)>,
    opened_at: Option<Instant>,
    emitted: u64,
    fail_open: bool,
    probe: Arc<InputProbe>,
}

impl ScriptedInput {
    pub fn new(script: Vec<(Duration, f32)>) -> (Self, Arc<InputProbe>) {
        let probe = Arc::new(InputProbe::default());
        let input = Self {
            script,
            opened_at: None,
            emitted: 0,
            fail_open: false,
            probe: Arc::clone(&probe),
        };
        (input, probe)
    }

    /// Speech for `speech`, then silence
    pub fn speech_then_silence(speech: Duration) -> (Self, Arc<InputProbe>) {
        Self::new(vec![(speech, 0.2)])
    }

    /// Input whose device never starts
    pub fn broken() -> (Self, Arc<InputProbe>) {
        let (mut input, probe) = Self::new(Vec::new());
        input.fail_open = true;
        (input, probe)
    }

    fn amplitude_at(&self, t: Duration) -> f32 {
        self.script
            .iter()
            .find(|(until, _)| t < *until)
            .map_or(0.0, |(_, amplitude)| *amplitude)
    }
}

impl AudioInput for ScriptedInput {
    fn open(&mut self) -> Result<()> {
        if self.fail_open {
            return Err(Error::Audio("device busy".to_string()));
        }
        self.opened_at = Some(Instant::now());
        self.emitted = 0;
        self.probe.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        if self.opened_at.take().is_some() {
            self.probe.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn drain(&mut self) -> Vec<f32> {
        let Some(opened_at) = self.opened_at else {
            return Vec::new();
        };

        let elapsed = opened_at.elapsed();
        let total = (elapsed.as_secs_f64() * f64::from(RATE)) as u64;
        let samples = (self.emitted..total)
            .map(|i| {
                let t = Duration::from_secs_f64(i as f64 / f64::from(RATE));
                let amplitude = self.amplitude_at(t);
                if i % 2 == 0 { amplitude } else { -amplitude }
            })
            .collect();
        self.emitted = total;
        samples
    }

    fn is_open(&self) -> bool {
        self.opened_at.is_some()
    }

    fn sample_rate(&self) -> u32 {
        RATE
    }
}

/// Transcriber replying from a queue, then with a default
pub struct FakeTranscriber {
    replies: Mutex<VecDeque<Result<String>>>,
    default: String,
    pub calls: AtomicUsize,
}

impl FakeTranscriber {
    pub fn new(default: &str) -> Arc<Self> {
        Self::scripted(Vec::new(), default)
    }

    pub fn scripted(replies: Vec<Result<String>>, default: &str) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            default: default.to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, samples: &[f32], _sample_rate: u32, _channels: u16) -> Result<String> {
        assert!(!samples.is_empty(), "transcriber called without audio");
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;

        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(self.default.clone()))
    }
}

/// What the backend was asked
#[derive(Debug, Clone)]
pub struct InferenceCall {
    pub history: Vec<ChatMessage>,
    pub images: usize,
}

/// Inference backend replying from a queue after a delay
pub struct FakeBackend {
    replies: Mutex<VecDeque<Result<String>>>,
    delay: Duration,
    pub calls: Mutex<Vec<InferenceCall>>,
}

impl FakeBackend {
    pub fn new(replies: Vec<Result<String>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            delay: Duration::from_secs(1),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<InferenceCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceBackend for FakeBackend {
    async fn generate(&self, history: &[ChatMessage], images: &[ImageFrame]) -> Result<String> {
        self.calls.lock().unwrap().push(InferenceCall {
            history: history.to_vec(),
            images: images.len(),
        });
        tokio::time::sleep(self.delay).await;

        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Inference("no scripted reply".to_string())))
    }
}

/// Synthesizer producing a short WAV, failing for chosen texts
pub struct FakeSynth {
    failing: Vec<String>,
    journal: Journal,
}

impl FakeSynth {
    pub fn new(journal: Journal, failing: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            failing: failing.iter().map(ToString::to_string).collect(),
            journal,
        })
    }
}

#[async_trait]
impl Synthesizer for FakeSynth {
    async fn synthesize(&self, text: &str, _voice: &VoiceParams) -> Result<Vec<u8>> {
        self.journal.push(format!("synth:{text}"));
        tokio::time::sleep(Duration::from_millis(100)).await;

        if self.failing.iter().any(|f| f == text) {
            return Err(Error::Tts(format!("cannot say {text}")));
        }
        samples_to_wav(&vec![0.1; RATE as usize / 2], RATE, 1)
    }
}

/// Speaker that takes as long as the clip and records each playback
pub struct RecordingOutput {
    journal: Journal,
    pub playing: AtomicUsize,
    pub max_concurrent: AtomicUsize,
}

impl RecordingOutput {
    pub fn new(journal: Journal) -> Arc<Self> {
        Arc::new(Self {
            journal,
            playing: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl AudioOutput for RecordingOutput {
    async fn play(&self, clip: AudioClip) -> Result<()> {
        let now = self.playing.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);
        self.journal.push("play");

        tokio::time::sleep(clip.duration()).await;

        self.journal.push("done");
        self.playing.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Keyword engine driven by the test; detections are sent as events
#[derive(Default)]
pub struct ManualEngine {
    pub starts: Arc<AtomicUsize>,
    pub stops: Arc<AtomicUsize>,
}

impl ManualEngine {
    pub fn new() -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let engine = Self::default();
        let starts = Arc::clone(&engine.starts);
        let stops = Arc::clone(&engine.stops);
        (engine, starts, stops)
    }
}

impl KeywordEngine for ManualEngine {
    fn start(&mut self) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Presenter remembering every reply
#[derive(Default)]
pub struct RecordingPresenter {
    pub responses: Mutex<Vec<InferenceResponse>>,
}

impl RecordingPresenter {
    pub fn responses(&self) -> Vec<InferenceResponse> {
        self.responses.lock().unwrap().clone()
    }
}

impl Presenter for RecordingPresenter {
    fn present(&self, response: &InferenceResponse) {
        self.responses.lock().unwrap().push(response.clone());
    }
}
