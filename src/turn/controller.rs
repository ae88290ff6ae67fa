//! Dialogue turn controller
//!
//! A single task owns [`TurnState`] and drives one turn at a time:
//! wake word, command capture, inference, spoken reply, and an optional
//! follow-up window. Components report back through [`TurnEvent`]s; external
//! callers talk to the task through a [`ControllerHandle`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};

use super::event::{EventReceiver, EventSender, StopTrigger, TurnEvent, TurnState};
use super::response::parse_response;
use crate::agent::{ChatMessage, ImageFrame, InferenceBackend};
use crate::presentation::Presenter;
use crate::voice::{
    CommandRecorder, MicOwner, MicrophoneGuard, SpeechQueue, Transcript, WakeWordListener,
};
use crate::{Error, Result};

/// Number of image slots (primary view and comparison view)
pub const IMAGE_SLOTS: usize = 2;

/// Turn timing and policy
#[derive(Debug, Clone)]
pub struct DialogueSettings {
    /// Capture length after the wake word
    pub command_duration: Duration,
    /// Capture length of the follow-up window
    pub followup_duration: Duration,
    /// Listen for a follow-up after speaking, without the wake word
    pub followup_enabled: bool,
    /// Wait after revoking the wake word's microphone; zero yields one tick
    pub mic_release_grace: Duration,
    /// Spoken when a turn fails after capture
    pub apology: Option<String>,
    /// First message of every conversation
    pub system_prompt: String,
}

impl Default for DialogueSettings {
    fn default() -> Self {
        Self {
            command_duration: Duration::from_secs(5),
            followup_duration: Duration::from_secs(10),
            followup_enabled: true,
            mic_release_grace: Duration::ZERO,
            apology: None,
            system_prompt: String::new(),
        }
    }
}

/// Components the controller sequences
pub struct TurnComponents {
    /// Shared microphone guard
    pub guard: MicrophoneGuard,
    /// Wake word listener
    pub listener: WakeWordListener,
    /// Command recorder
    pub recorder: CommandRecorder,
    /// Speech output queue
    pub speech: SpeechQueue,
    /// Inference backend
    pub backend: Arc<dyn InferenceBackend>,
    /// Reply presentation
    pub presenter: Arc<dyn Presenter>,
}

enum Command {
    Submit {
        text: String,
        reply: oneshot::Sender<Result<()>>,
    },
    ListenNow {
        reply: oneshot::Sender<Result<()>>,
    },
    CaptureImage {
        slot: usize,
        frame: ImageFrame,
    },
}

/// Handle for talking to a running controller
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<TurnState>,
}

impl ControllerHandle {
    /// Current turn state
    #[must_use]
    pub fn state(&self) -> TurnState {
        *self.state.borrow()
    }

    /// Watch state transitions
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TurnState> {
        self.state.clone()
    }

    /// Wait until the controller reaches `target`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Shutdown`] if the controller stops first
    pub async fn wait_for(&self, target: TurnState) -> Result<()> {
        let mut state = self.state.clone();
        state
            .wait_for(|s| *s == target)
            .await
            .map(|_| ())
            .map_err(|_| Error::Shutdown)
    }

    /// Start an inference turn from text, skipping capture
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] unless the controller is idle with no request
    /// in flight, or [`Error::Shutdown`] if it has stopped
    pub async fn submit(&self, text: impl Into<String>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Submit {
            text: text.into(),
            reply,
        })?;
        rx.await.map_err(|_| Error::Shutdown)?
    }

    /// Open a command capture without the wake word
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] unless the controller is idle
    pub async fn listen_now(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ListenNow { reply })?;
        rx.await.map_err(|_| Error::Shutdown)?
    }

    /// Hold a camera frame for the next inference request
    ///
    /// Slot 0 is the primary view, slot 1 the comparison view.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Shutdown`] if the controller has stopped
    pub fn capture_image(&self, slot: usize, frame: ImageFrame) -> Result<()> {
        self.send(Command::CaptureImage { slot, frame })
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::Shutdown)
    }
}

/// The turn-taking state machine
pub struct DialogueController {
    settings: DialogueSettings,
    parts: TurnComponents,
    events_tx: EventSender,
    events_rx: EventReceiver,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<TurnState>,
    history: Vec<ChatMessage>,
    images: [Option<ImageFrame>; IMAGE_SLOTS],
    processing: bool,
    capture: Option<u64>,
    request: Option<u64>,
    next_request: u64,
}

impl DialogueController {
    /// Create a controller and its handle
    ///
    /// `events` must be the channel the components were built with.
    #[must_use]
    pub fn new(
        settings: DialogueSettings,
        parts: TurnComponents,
        events: (EventSender, EventReceiver),
    ) -> (Self, ControllerHandle) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(TurnState::Idle);

        let history = if settings.system_prompt.trim().is_empty() {
            Vec::new()
        } else {
            vec![ChatMessage::system(settings.system_prompt.clone())]
        };

        let controller = Self {
            settings,
            parts,
            events_tx: events.0,
            events_rx: events.1,
            commands: commands_rx,
            state: state_tx,
            history,
            images: Default::default(),
            processing: false,
            capture: None,
            request: None,
            next_request: 0,
        };

        let handle = ControllerHandle {
            commands: commands_tx,
            state: state_rx,
        };

        (controller, handle)
    }

    /// Run until `shutdown` resolves
    ///
    /// # Errors
    ///
    /// Currently always returns `Ok`; errors inside a turn end that turn
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);

        tracing::info!("dialogue controller started");
        self.enter_idle();

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("shutdown requested");
                    break;
                }
                Some(event) = self.events_rx.recv() => self.handle_event(event).await,
                Some(command) = self.commands.recv() => self.handle_command(command).await,
            }
        }

        self.parts.listener.stop();
        self.parts.recorder.stop_capture();
        tracing::info!("dialogue controller stopped");
        Ok(())
    }

    fn current(&self) -> TurnState {
        *self.state.borrow()
    }

    fn set_state(&self, next: TurnState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::info!(from = %previous, to = %next, "turn state changed");
        }
    }

    async fn handle_event(&mut self, event: TurnEvent) {
        match event {
            TurnEvent::KeywordDetected { keyword } => self.on_keyword(keyword).await,
            TurnEvent::CaptureStopped { capture, trigger } => self.on_capture_stopped(capture, trigger),
            TurnEvent::ListenWindowEnded {
                capture,
                transcript,
                trigger,
            } => self.on_window_ended(capture, transcript, trigger),
            TurnEvent::InferenceFinished { request, outcome } => {
                self.on_inference_finished(request, outcome);
            }
            TurnEvent::PlaybackQueueDrained => self.on_playback_drained().await,
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit { text, reply } => {
                let result = self.submit(text);
                let _ = reply.send(result);
            }
            Command::ListenNow { reply } => {
                let result = if self.current() == TurnState::Idle && !self.processing {
                    self.begin_capture(self.settings.command_duration, TurnState::Capturing)
                        .await
                } else {
                    Err(Error::Busy)
                };
                let _ = reply.send(result);
            }
            Command::CaptureImage { slot, frame } => {
                if let Some(held) = self.images.get_mut(slot) {
                    tracing::debug!(slot, bytes = frame.bytes().len(), "image captured");
                    *held = Some(frame);
                } else {
                    tracing::warn!(slot, "no such image slot");
                }
            }
        }
    }

    async fn on_keyword(&mut self, keyword: usize) {
        if self.current() != TurnState::Idle {
            tracing::debug!(keyword, state = %self.current(), "wake word ignored mid-turn");
            return;
        }
        if !self.parts.listener.on_detected(keyword) {
            return;
        }

        self.set_state(TurnState::WakeArmed);
        if let Err(e) = self
            .begin_capture(self.settings.command_duration, TurnState::Capturing)
            .await
        {
            tracing::error!(error = %e, "could not start command capture");
        }
    }

    /// Hand the microphone to the recorder and start a capture
    ///
    /// Falls back to idle on failure.
    async fn begin_capture(&mut self, duration: Duration, next: TurnState) -> Result<()> {
        self.parts.listener.stop();
        self.parts.guard.force_revoke(MicOwner::WakeWord);

        if self.settings.mic_release_grace.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.settings.mic_release_grace).await;
        }

        let started = self
            .parts
            .guard
            .acquire(MicOwner::Recorder)
            .and_then(|lease| self.parts.recorder.start_capture(duration, lease));

        match started {
            Ok(capture) => {
                self.capture = Some(capture);
                self.set_state(next);
                Ok(())
            }
            Err(e) => {
                self.enter_idle();
                Err(e)
            }
        }
    }

    fn on_capture_stopped(&mut self, capture: u64, trigger: StopTrigger) {
        if self.capture != Some(capture) {
            return;
        }
        if matches!(self.current(), TurnState::Capturing | TurnState::FollowupWindow) {
            tracing::debug!(capture, ?trigger, "transcribing");
            self.set_state(TurnState::Transcribing);
        }
    }

    fn on_window_ended(&mut self, capture: u64, transcript: Transcript, trigger: StopTrigger) {
        if self.capture != Some(capture) {
            tracing::debug!(capture, "stale listen window ignored");
            return;
        }
        self.capture = None;

        if !transcript.succeeded() {
            tracing::info!(capture, ?trigger, "nothing heard, ending turn");
            self.enter_idle();
            return;
        }

        tracing::info!(capture, text = %transcript.text(), "command heard");
        if let Err(e) = self.start_inference(transcript.text().to_string()) {
            tracing::error!(error = %e, "inference not started");
            self.enter_idle();
        }
    }

    fn submit(&mut self, text: String) -> Result<()> {
        if self.current() != TurnState::Idle || self.processing {
            tracing::warn!(state = %self.current(), "submit rejected, turn in flight");
            return Err(Error::Busy);
        }
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(Error::Inference("empty prompt".to_string()));
        }

        self.parts.listener.stop();
        self.start_inference(text)
    }

    fn start_inference(&mut self, text: String) -> Result<()> {
        if self.processing {
            return Err(Error::Busy);
        }
        self.processing = true;

        self.next_request += 1;
        let request = self.next_request;
        self.request = Some(request);

        self.history.push(ChatMessage::user(text));
        let history = self.history.clone();
        let images: Vec<ImageFrame> = self.images.iter_mut().filter_map(Option::take).collect();

        self.set_state(TurnState::AwaitingInference);
        tracing::debug!(request, images = images.len(), "inference requested");

        let backend = Arc::clone(&self.parts.backend);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let outcome = backend.generate(&history, &images).await;
            let _ = events.send(TurnEvent::InferenceFinished { request, outcome });
        });

        Ok(())
    }

    fn on_inference_finished(&mut self, request: u64, outcome: Result<String>) {
        if self.request != Some(request) {
            tracing::debug!(request, "stale inference result ignored");
            return;
        }
        self.request = None;
        self.processing = false;

        let raw = match outcome {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "inference failed");
                // Keep the history alternating user/assistant
                self.history.pop();
                self.speak_apology();
                return;
            }
        };

        self.history.push(ChatMessage::assistant(raw.clone()));
        let response = parse_response(&raw);
        self.parts.presenter.present(&response);

        if response.message.is_empty() {
            tracing::info!("reply had nothing to say");
            self.speak_apology();
        } else {
            self.speak(&response.message);
        }
    }

    fn speak_apology(&mut self) {
        match self.settings.apology.clone() {
            Some(apology) => self.speak(&apology),
            None => self.enter_idle(),
        }
    }

    fn speak(&mut self, text: &str) {
        self.parts.speech.enqueue(text);
        if self.parts.speech.is_speaking() {
            self.set_state(TurnState::Speaking);
        } else {
            self.enter_idle();
        }
    }

    async fn on_playback_drained(&mut self) {
        if self.current() != TurnState::Speaking {
            return;
        }

        if !self.settings.followup_enabled {
            self.enter_idle();
            return;
        }

        if let Err(e) = self
            .begin_capture(self.settings.followup_duration, TurnState::FollowupWindow)
            .await
        {
            tracing::error!(error = %e, "could not open follow-up window");
        }
    }

    /// End the turn and re-arm the wake word
    fn enter_idle(&mut self) {
        self.capture = None;
        self.set_state(TurnState::Idle);

        if !self.parts.listener.is_available() {
            return;
        }
        if let Err(e) = self.parts.listener.start() {
            tracing::warn!(error = %e, "wake word not re-armed");
        }
    }
}
