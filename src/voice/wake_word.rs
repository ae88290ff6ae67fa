//! Wake word detection
//!
//! [`WakeWordListener`] wraps a keyword spotting engine and holds the
//! microphone while it listens. [`TranscriptSpotter`] is the built-in engine:
//! it segments microphone audio by energy and checks each segment's
//! transcript for a configured phrase.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

use super::capture::{AudioInput, rms_energy};
use super::mic::{MicLease, MicOwner, MicrophoneGuard};
use super::stt::Transcriber;
use crate::turn::{EventSender, TurnEvent};
use crate::{Error, Result};

/// Minimum audio energy threshold to consider speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum duration of speech to trigger (in samples at 16kHz)
const MIN_SPEECH_SAMPLES: usize = 4800; // 0.3 seconds

/// Silence duration to consider end of utterance (in samples)
const SILENCE_SAMPLES: usize = 8000; // 0.5 seconds

/// How often the spotter drains the input
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A keyword spotting engine
///
/// Engines report detections by sending [`TurnEvent::KeywordDetected`] on
/// the event channel they were built with.
pub trait KeywordEngine: Send {
    /// Begin listening
    ///
    /// # Errors
    ///
    /// Returns error if the engine cannot open its audio source
    fn start(&mut self) -> Result<()>;

    /// Stop listening and close the audio source
    fn stop(&mut self);
}

/// Listener lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Not listening
    Stopped,
    /// Engine running with the microphone held
    Listening,
}

/// Idempotent start/stop wrapper around a keyword engine
pub struct WakeWordListener {
    engine: Option<Box<dyn KeywordEngine>>,
    unavailable: Option<String>,
    guard: MicrophoneGuard,
    lease: Option<MicLease>,
    state: ListenerState,
}

impl WakeWordListener {
    /// Wrap the result of engine construction
    ///
    /// A failed construction leaves the listener permanently stopped; every
    /// `start` reports [`Error::EngineUnavailable`].
    pub fn new(engine: Result<Box<dyn KeywordEngine>>, guard: MicrophoneGuard) -> Self {
        let (engine, unavailable) = match engine {
            Ok(engine) => (Some(engine), None),
            Err(e) => {
                tracing::error!(error = %e, "wake word engine unavailable");
                (None, Some(e.to_string()))
            }
        };

        Self {
            engine,
            unavailable,
            guard,
            lease: None,
            state: ListenerState::Stopped,
        }
    }

    /// Start listening; no-op if already listening
    ///
    /// # Errors
    ///
    /// Returns [`Error::EngineUnavailable`] if the engine was never built,
    /// [`Error::AlreadyHeld`] if the recorder holds the microphone, or the
    /// engine's own start error
    pub fn start(&mut self) -> Result<()> {
        if self.state == ListenerState::Listening {
            return Ok(());
        }

        let Some(engine) = self.engine.as_mut() else {
            let reason = self.unavailable.clone().unwrap_or_default();
            return Err(Error::EngineUnavailable(reason));
        };

        let lease = self.guard.acquire(MicOwner::WakeWord)?;
        engine.start()?;

        self.lease = Some(lease);
        self.state = ListenerState::Listening;
        tracing::info!("wake word listening");
        Ok(())
    }

    /// Stop listening; no-op if already stopped
    pub fn stop(&mut self) {
        if self.state == ListenerState::Stopped {
            return;
        }

        if let Some(engine) = self.engine.as_mut() {
            engine.stop();
        }
        self.lease = None;
        self.state = ListenerState::Stopped;
        tracing::debug!("wake word stopped");
    }

    /// Handle an engine callback
    ///
    /// Returns true and stops the listener when the detection counts;
    /// callbacks arriving while stopped are ignored.
    pub fn on_detected(&mut self, keyword: usize) -> bool {
        if self.state == ListenerState::Stopped {
            tracing::debug!(keyword, "detection ignored, listener stopped");
            return false;
        }

        tracing::info!(keyword, "wake word detected");
        self.stop();
        true
    }

    /// Current lifecycle state
    #[must_use]
    pub const fn state(&self) -> ListenerState {
        self.state
    }

    /// Check if the engine was built
    #[must_use]
    pub const fn is_available(&self) -> bool {
        self.engine.is_some()
    }
}

/// Energy-based speech segmenter feeding the transcript check
#[derive(Debug, Default)]
struct SpeechSegmenter {
    in_speech: bool,
    speech_buffer: Vec<f32>,
    silence_counter: usize,
}

impl SpeechSegmenter {
    /// Feed samples; returns a complete segment once speech is followed by silence
    fn process(&mut self, samples: &[f32]) -> Option<Vec<f32>> {
        let energy = rms_energy(samples);
        let is_speech = energy > ENERGY_THRESHOLD;

        if !self.in_speech {
            if is_speech {
                self.in_speech = true;
                self.speech_buffer.clear();
                self.speech_buffer.extend_from_slice(samples);
                self.silence_counter = 0;
                tracing::trace!(energy, "speech detected, listening");
            }
            return None;
        }

        self.speech_buffer.extend_from_slice(samples);
        if is_speech {
            self.silence_counter = 0;
        } else {
            self.silence_counter += samples.len();
        }

        if self.silence_counter > SILENCE_SAMPLES && self.speech_buffer.len() > MIN_SPEECH_SAMPLES {
            tracing::debug!(samples = self.speech_buffer.len(), "speech segment complete");
            let segment = std::mem::take(&mut self.speech_buffer);
            self.reset();
            return Some(segment);
        }

        // Too much silence without enough speech
        if self.silence_counter > SILENCE_SAMPLES * 2 {
            tracing::trace!("timeout - resetting");
            self.reset();
        }

        None
    }

    fn reset(&mut self) {
        self.in_speech = false;
        self.speech_buffer.clear();
        self.silence_counter = 0;
    }
}

/// Index of the first phrase contained in a transcript
#[must_use]
pub fn match_keyword(keywords: &[String], transcript: &str) -> Option<usize> {
    let normalized = transcript.to_lowercase();
    keywords
        .iter()
        .position(|phrase| normalized.contains(phrase.as_str()))
}

/// Read keyword phrases from a file, one per line
///
/// # Errors
///
/// Returns [`Error::EngineUnavailable`] if the file cannot be read
pub fn load_keyword_file(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::EngineUnavailable(format!("keyword model {}: {e}", path.display()))
    })?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(String::from)
        .collect())
}

/// Keyword engine that transcribes speech segments and matches phrases
pub struct TranscriptSpotter {
    keywords: Arc<[String]>,
    input: Arc<Mutex<Box<dyn AudioInput>>>,
    transcriber: Arc<dyn Transcriber>,
    events: EventSender,
    active: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl TranscriptSpotter {
    /// Create a spotter for the given phrases
    ///
    /// # Errors
    ///
    /// Returns [`Error::EngineUnavailable`] if no usable phrase is configured
    pub fn new(
        keywords: Vec<String>,
        input: Box<dyn AudioInput>,
        transcriber: Arc<dyn Transcriber>,
        events: EventSender,
    ) -> Result<Self> {
        let keywords: Vec<String> = keywords
            .into_iter()
            .map(|w| w.trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();

        if keywords.is_empty() {
            return Err(Error::EngineUnavailable(
                "no wake word phrases configured".to_string(),
            ));
        }

        tracing::debug!(keywords = ?keywords, "transcript spotter initialized");

        Ok(Self {
            keywords: keywords.into(),
            input: Arc::new(Mutex::new(input)),
            transcriber,
            events,
            active: Arc::new(AtomicBool::new(false)),
            task: None,
        })
    }

    async fn run(
        keywords: Arc<[String]>,
        input: Arc<Mutex<Box<dyn AudioInput>>>,
        transcriber: Arc<dyn Transcriber>,
        events: EventSender,
        active: Arc<AtomicBool>,
    ) {
        let mut segmenter = SpeechSegmenter::default();
        let mut ticker = tokio::time::interval(POLL_INTERVAL);

        loop {
            ticker.tick().await;

            let (window, sample_rate, channels) = {
                let mut input = lock(&input);
                if !active.load(Ordering::Acquire) {
                    return;
                }
                (input.drain(), input.sample_rate(), input.channels())
            };

            let Some(segment) = segmenter.process(&window) else {
                continue;
            };

            let transcript = match transcriber.transcribe(&segment, sample_rate, channels).await {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(error = %e, "wake word transcription failed");
                    continue;
                }
            };

            if let Some(keyword) = match_keyword(&keywords, &transcript) {
                tracing::debug!(keyword, transcript = %transcript, "phrase matched");
                let _ = events.send(TurnEvent::KeywordDetected { keyword });
                return;
            }
        }
    }
}

impl KeywordEngine for TranscriptSpotter {
    fn start(&mut self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::EngineUnavailable(e.to_string()))?;

        {
            let mut input = lock(&self.input);
            input.open()?;
            self.active.store(true, Ordering::Release);
        }

        self.task = Some(runtime.spawn(Self::run(
            Arc::clone(&self.keywords),
            Arc::clone(&self.input),
            Arc::clone(&self.transcriber),
            self.events.clone(),
            Arc::clone(&self.active),
        )));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }

        let mut input = lock(&self.input);
        self.active.store(false, Ordering::Release);
        input.close();
    }
}

impl Drop for TranscriptSpotter {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingEngine {
        starts: Arc<Mutex<u32>>,
        stops: Arc<Mutex<u32>>,
    }

    impl KeywordEngine for CountingEngine {
        fn start(&mut self) -> Result<()> {
            *self.starts.lock().unwrap() += 1;
            Ok(())
        }

        fn stop(&mut self) {
            *self.stops.lock().unwrap() += 1;
        }
    }

    fn counting_listener() -> (WakeWordListener, MicrophoneGuard, Arc<Mutex<u32>>, Arc<Mutex<u32>>) {
        let starts = Arc::new(Mutex::new(0));
        let stops = Arc::new(Mutex::new(0));
        let engine = CountingEngine {
            starts: Arc::clone(&starts),
            stops: Arc::clone(&stops),
        };
        let guard = MicrophoneGuard::new();
        let listener = WakeWordListener::new(Ok(Box::new(engine)), guard.clone());
        (listener, guard, starts, stops)
    }

    #[test]
    fn test_start_stop_idempotent() {
        let (mut listener, guard, starts, stops) = counting_listener();

        listener.stop();
        assert_eq!(*stops.lock().unwrap(), 0);

        listener.start().unwrap();
        listener.start().unwrap();
        assert_eq!(*starts.lock().unwrap(), 1);
        assert_eq!(guard.holder(), Some(MicOwner::WakeWord));

        listener.stop();
        listener.stop();
        assert_eq!(*stops.lock().unwrap(), 1);
        assert!(!guard.is_held());
    }

    #[test]
    fn test_detection_stops_listener() {
        let (mut listener, guard, _, _) = counting_listener();

        assert!(!listener.on_detected(0));

        listener.start().unwrap();
        assert!(listener.on_detected(0));
        assert_eq!(listener.state(), ListenerState::Stopped);
        assert!(!guard.is_held());

        assert!(!listener.on_detected(0));
    }

    #[test]
    fn test_unavailable_engine_never_starts() {
        let guard = MicrophoneGuard::new();
        let mut listener = WakeWordListener::new(
            Err(Error::EngineUnavailable("missing model".to_string())),
            guard.clone(),
        );

        for _ in 0..3 {
            assert!(matches!(listener.start(), Err(Error::EngineUnavailable(_))));
        }
        assert_eq!(listener.state(), ListenerState::Stopped);
        assert!(!guard.is_held());
    }

    #[test]
    fn test_start_fails_while_recorder_holds_mic() {
        let (mut listener, guard, starts, _) = counting_listener();
        let _lease = guard.acquire(MicOwner::Recorder).unwrap();

        assert!(matches!(
            listener.start(),
            Err(Error::AlreadyHeld(MicOwner::Recorder))
        ));
        assert_eq!(*starts.lock().unwrap(), 0);
    }

    #[test]
    fn test_match_keyword() {
        let keywords = vec!["hey fridge".to_string(), "hello fridge".to_string()];

        assert_eq!(match_keyword(&keywords, "hello world"), None);
        assert_eq!(match_keyword(&keywords, "Hey Fridge, what's up?"), Some(0));
        assert_eq!(match_keyword(&keywords, "uh, hello fridge"), Some(1));
    }

    #[test]
    fn test_segmenter_needs_speech_then_silence() {
        let mut segmenter = SpeechSegmenter::default();
        let speech = vec![0.2f32; 1600];
        let silence = vec![0.0f32; 1600];

        assert!(segmenter.process(&silence).is_none());
        for _ in 0..5 {
            assert!(segmenter.process(&speech).is_none());
        }

        let mut segment = None;
        for _ in 0..6 {
            segment = segment.or_else(|| segmenter.process(&silence));
        }
        let segment = segment.unwrap();
        assert!(segment.len() > MIN_SPEECH_SAMPLES);
    }

    #[test]
    fn test_keyword_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keywords.txt");
        std::fs::write(&path, "# phrases\nhey fridge\n\n  hello fridge  \n").unwrap();

        let keywords = load_keyword_file(&path).unwrap();
        assert_eq!(keywords, vec!["hey fridge", "hello fridge"]);

        let missing = load_keyword_file(&dir.path().join("nope.txt"));
        assert!(matches!(missing, Err(Error::EngineUnavailable(_))));
    }
}
