//! Command recorder
//!
//! Records one bounded command after the wake word (or during a follow-up
//! window), optionally cut short by trailing silence, and hands the audio to
//! a [`Transcriber`]. Every started capture ends with exactly one
//! [`TurnEvent::ListenWindowEnded`], whatever went wrong along the way.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior};

use super::capture::{AudioInput, mean_abs_amplitude};
use super::mic::MicLease;
use super::stt::Transcriber;
use crate::turn::{EventSender, StopTrigger, TurnEvent};
use crate::{Error, Result};

/// Non-speech markers some Whisper builds emit instead of an empty string
const PLACEHOLDER_TOKENS: &[&str] = &[
    "[BLANK_AUDIO]",
    "[NO_SPEECH]",
    "[SILENCE]",
    "[MUSIC]",
    "[INAUDIBLE]",
    "(silence)",
    "(music)",
    "(inaudible)",
    "(blank audio)",
];

/// Default polling interval when voice activity detection is off
const DRAIN_INTERVAL: Duration = Duration::from_millis(100);

/// Deadline used when a capture limit overflows the clock
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Outcome of a command capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    text: String,
    succeeded: bool,
}

impl Transcript {
    /// Build a transcript from raw backend output
    ///
    /// Placeholder tokens and surrounding whitespace are removed; nothing
    /// left means the capture failed.
    #[must_use]
    pub fn from_raw(raw: &str) -> Self {
        let mut text = raw.to_string();
        for token in PLACEHOLDER_TOKENS {
            text = remove_ignore_case(&text, token);
        }
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let succeeded = !text.is_empty();

        Self { text, succeeded }
    }

    /// A failed capture
    #[must_use]
    pub const fn failed() -> Self {
        Self {
            text: String::new(),
            succeeded: false,
        }
    }

    /// Transcribed text (empty on failure)
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether speech was recognised
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.succeeded
    }
}

fn remove_ignore_case(haystack: &str, needle: &str) -> String {
    let mut out = String::with_capacity(haystack.len());
    let mut rest = 0;

    // ASCII-only fold; offsets always come from the haystack itself
    for (at, _) in haystack.char_indices() {
        if at < rest {
            continue;
        }
        let matched = haystack
            .get(at..at + needle.len())
            .is_some_and(|window| window.eq_ignore_ascii_case(needle));
        if matched {
            out.push_str(&haystack[rest..at]);
            out.push(' ');
            rest = at + needle.len();
        }
    }
    out.push_str(&haystack[rest..]);
    out
}

/// Voice activity detection settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadSettings {
    /// Mean absolute amplitude below which a window counts as silence
    pub threshold: f32,
    /// Trailing silence that ends the capture
    pub silence: Duration,
    /// Window length between checks
    pub interval: Duration,
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            threshold: 0.01,
            silence: Duration::from_millis(1500),
            interval: Duration::from_millis(100),
        }
    }
}

/// Recorder lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    /// Ready to record
    Idle,
    /// Device open, buffering audio
    Recording,
    /// Device closed, transcription in flight
    Stopping,
}

/// One in-progress recording
#[derive(Debug)]
pub struct CommandCapture {
    id: u64,
    started_at: Instant,
    max_duration: Duration,
    silence: Duration,
    heard_speech: bool,
    samples: Vec<f32>,
}

impl CommandCapture {
    fn new(id: u64, max_duration: Duration) -> Self {
        Self {
            id,
            started_at: Instant::now(),
            max_duration,
            silence: Duration::ZERO,
            heard_speech: false,
            samples: Vec::new(),
        }
    }

    /// Capture identifier
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Hard deadline for this capture
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.started_at
            .checked_add(self.max_duration)
            .unwrap_or_else(|| self.started_at + FAR_FUTURE)
    }

    /// Trailing silence accumulated so far
    #[must_use]
    pub const fn silence(&self) -> Duration {
        self.silence
    }

    /// Append a window of audio and update the silence timer
    ///
    /// Silence only accumulates once speech has been heard. Returns true when
    /// the trailing silence reached the configured threshold.
    fn observe(&mut self, window: &[f32], vad: Option<&VadSettings>) -> bool {
        self.samples.extend_from_slice(window);

        let Some(vad) = vad else {
            return false;
        };

        if mean_abs_amplitude(window) >= vad.threshold {
            self.heard_speech = true;
            self.silence = Duration::ZERO;
        } else if self.heard_speech {
            self.silence += vad.interval;
        }

        self.heard_speech && self.silence >= vad.silence
    }

    /// Freeze the capture, trimmed to what was actually recorded
    fn finalize(mut self, sample_rate: u32, channels: u16) -> Vec<f32> {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let limit = (self.max_duration.as_secs_f64()
            * f64::from(sample_rate)
            * f64::from(channels)) as usize;
        self.samples.truncate(limit);
        self.samples.shrink_to_fit();
        self.samples
    }
}

/// Records bounded commands and transcribes them
pub struct CommandRecorder {
    input: Arc<Mutex<Box<dyn AudioInput>>>,
    transcriber: Arc<dyn Transcriber>,
    vad: Option<VadSettings>,
    state: Arc<Mutex<RecorderState>>,
    cancel: Arc<Mutex<Option<Arc<Notify>>>>,
    next_id: AtomicU64,
    events: EventSender,
}

impl CommandRecorder {
    /// Create a recorder over an input device and transcription backend
    pub fn new(
        input: Box<dyn AudioInput>,
        transcriber: Arc<dyn Transcriber>,
        vad: Option<VadSettings>,
        events: EventSender,
    ) -> Self {
        Self {
            input: Arc::new(Mutex::new(input)),
            transcriber,
            vad,
            state: Arc::new(Mutex::new(RecorderState::Idle)),
            cancel: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(0),
            events,
        }
    }

    /// Start recording a command
    ///
    /// The lease is held until the device closes. The result arrives as a
    /// [`TurnEvent::ListenWindowEnded`] carrying the returned capture id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyRecording`] unless the recorder is idle
    pub fn start_capture(&self, max_duration: Duration, lease: MicLease) -> Result<u64> {
        {
            let mut state = lock(&self.state);
            if *state != RecorderState::Idle {
                tracing::warn!(state = ?*state, "capture requested while busy");
                return Err(Error::AlreadyRecording);
            }
            *state = RecorderState::Recording;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = Arc::new(Notify::new());
        *lock(&self.cancel) = Some(Arc::clone(&cancel));

        tracing::info!(capture = id, ?max_duration, vad = self.vad.is_some(), "capture started");

        let task = CaptureTask {
            capture: CommandCapture::new(id, max_duration),
            input: Arc::clone(&self.input),
            transcriber: Arc::clone(&self.transcriber),
            vad: self.vad,
            cancel,
            lease,
            window_end: WindowEnd {
                capture: id,
                state: Arc::clone(&self.state),
                cancel_slot: Arc::clone(&self.cancel),
                events: self.events.clone(),
                trigger: StopTrigger::Cancelled,
                sent: false,
            },
        };

        tokio::spawn(task.run());
        Ok(id)
    }

    /// Stop the current capture early
    ///
    /// No-op when nothing is recording or the capture is already stopping.
    pub fn stop_capture(&self) {
        if let Some(cancel) = lock(&self.cancel).take() {
            tracing::debug!("capture stop requested");
            cancel.notify_one();
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> RecorderState {
        *lock(&self.state)
    }

    /// Check if the recorder can start a capture
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state() == RecorderState::Idle
    }
}

struct CaptureTask {
    capture: CommandCapture,
    input: Arc<Mutex<Box<dyn AudioInput>>>,
    transcriber: Arc<dyn Transcriber>,
    vad: Option<VadSettings>,
    cancel: Arc<Notify>,
    lease: MicLease,
    window_end: WindowEnd,
}

impl CaptureTask {
    async fn run(mut self) {
        let id = self.capture.id;
        let (samples, trigger, sample_rate, channels) = self.record().await;
        self.window_end.trigger = trigger;

        *lock(&self.window_end.state) = RecorderState::Stopping;
        // Whoever takes the slot first wins; a late stop_capture finds it empty
        lock(&self.window_end.cancel_slot).take();
        drop(self.lease);

        #[allow(clippy::cast_precision_loss)]
        let seconds = samples.len() as f32 / (sample_rate.max(1) as f32 * f32::from(channels.max(1)));
        tracing::info!(capture = id, ?trigger, seconds, "capture stopped");

        if samples.is_empty() {
            tracing::warn!(capture = id, error = %Error::EmptyCapture, "not transcribing");
            self.window_end.finish(Transcript::failed());
            return;
        }

        let _ = self.window_end.events.send(TurnEvent::CaptureStopped {
            capture: id,
            trigger,
        });

        let transcript = match self
            .transcriber
            .transcribe(&samples, sample_rate, channels)
            .await
        {
            Ok(raw) => {
                let transcript = Transcript::from_raw(&raw);
                if !transcript.succeeded() {
                    tracing::warn!(capture = id, raw = %raw, "transcript empty");
                }
                transcript
            }
            Err(e) => {
                tracing::warn!(capture = id, error = %e, "transcription failed");
                Transcript::failed()
            }
        };

        self.window_end.finish(transcript);
    }

    /// Buffer audio until the deadline, trailing silence, or cancellation
    async fn record(&mut self) -> (Vec<f32>, StopTrigger, u32, u16) {
        let opened = {
            let mut input = lock(&self.input);
            input
                .open()
                .map(|()| (input.sample_rate(), input.channels()))
        };

        let (sample_rate, channels) = match opened {
            Ok(format) => format,
            Err(e) => {
                tracing::error!(capture = self.capture.id, error = %e, "failed to open input");
                return (Vec::new(), StopTrigger::DeviceFailed, 0, 0);
            }
        };

        let interval = self.vad.map_or(DRAIN_INTERVAL, |v| v.interval);
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let deadline = tokio::time::sleep_until(self.capture.deadline());
        tokio::pin!(deadline);

        let trigger = loop {
            tokio::select! {
                biased;
                () = self.cancel.notified() => break StopTrigger::Cancelled,
                () = &mut deadline => break StopTrigger::Deadline,
                _ = ticker.tick() => {
                    let window = lock(&self.input).drain();
                    if self.capture.observe(&window, self.vad.as_ref()) {
                        break StopTrigger::Silence;
                    }
                }
            }
        };

        let tail = {
            let mut input = lock(&self.input);
            let tail = input.drain();
            input.close();
            tail
        };
        self.capture.samples.extend_from_slice(&tail);

        let capture = std::mem::replace(&mut self.capture, CommandCapture::new(0, Duration::ZERO));
        let samples = capture.finalize(sample_rate, channels);
        (samples, trigger, sample_rate, channels)
    }
}

/// Delivers the capture's single `ListenWindowEnded`
///
/// If the task is dropped before finishing (abort, panic in a backend), the
/// drop path still resets the recorder and reports a failed transcript.
struct WindowEnd {
    capture: u64,
    state: Arc<Mutex<RecorderState>>,
    cancel_slot: Arc<Mutex<Option<Arc<Notify>>>>,
    events: EventSender,
    trigger: StopTrigger,
    sent: bool,
}

impl WindowEnd {
    fn finish(&mut self, transcript: Transcript) {
        if self.sent {
            return;
        }
        self.sent = true;

        lock(&self.cancel_slot).take();
        *lock(&self.state) = RecorderState::Idle;

        tracing::debug!(
            capture = self.capture,
            succeeded = transcript.succeeded(),
            "listen window ended"
        );

        if self
            .events
            .send(TurnEvent::ListenWindowEnded {
                capture: self.capture,
                transcript,
                trigger: self.trigger,
            })
            .is_err()
        {
            tracing::debug!(capture = self.capture, "controller gone, window end dropped");
        }
    }
}

impl Drop for WindowEnd {
    fn drop(&mut self) {
        if !self.sent {
            tracing::warn!(capture = self.capture, "capture task ended without a result");
            self.finish(Transcript::failed());
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
