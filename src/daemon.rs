//! Daemon - the companion service
//!
//! Wires the microphone, wake word, recorder, backends, and speech queue into
//! a dialogue controller and runs it until interrupted.

use std::sync::Arc;

use crate::agent::{InferenceBackend, OllamaClient};
use crate::config::TtsProvider;
use crate::presentation::LogPresenter;
use crate::turn::{
    ControllerHandle, DialogueController, EventSender, TurnComponents, event_channel,
};
use crate::voice::{
    CommandRecorder, CoquiTts, KeywordEngine, MicInput, MicrophoneGuard, OpenAiTts,
    SpeakerOutput, SpeechQueue, Synthesizer, Transcriber, TranscriptSpotter, WakeWordListener,
    WhisperTranscriber, load_keyword_file,
};
use crate::{Config, Error, Result};

/// The fridge companion daemon
pub struct Daemon {
    config: Config,
}

impl Daemon {
    /// Create a new daemon instance
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run until Ctrl-C
    ///
    /// # Errors
    ///
    /// Returns error if a required device or backend cannot be set up
    pub async fn run(self) -> Result<()> {
        let (controller, handle) = self.build()?;

        tracing::info!(
            keywords = ?self.config.wake_word.keywords,
            model = %self.config.inference.model,
            "fridge companion ready"
        );

        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        };

        let result = controller.run(shutdown).await;
        drop(handle);
        tracing::info!("daemon stopped");
        result
    }

    /// Build the controller from configuration
    ///
    /// # Errors
    ///
    /// Returns error if a required device or backend cannot be set up
    pub fn build(&self) -> Result<(DialogueController, ControllerHandle)> {
        let config = &self.config;
        let (events_tx, events_rx) = event_channel();
        let guard = MicrophoneGuard::new();

        let transcriber: Arc<dyn Transcriber> = Arc::new(WhisperTranscriber::new(
            &config.stt.base_url,
            config.stt.model.clone(),
            config.stt.api_key.clone(),
        )?);

        let engine = build_keyword_engine(config, Arc::clone(&transcriber), events_tx.clone());
        let listener = WakeWordListener::new(engine, guard.clone());

        let recorder = CommandRecorder::new(
            Box::new(MicInput::new(config.capture.sample_rate)?),
            transcriber,
            config.vad_settings(),
            events_tx.clone(),
        );

        let speech = SpeechQueue::new(
            build_synthesizer(config)?,
            Arc::new(SpeakerOutput::new()?),
            config.tts.voice.clone(),
            events_tx.clone(),
        );

        let parts = TurnComponents {
            guard,
            listener,
            recorder,
            speech,
            backend: build_backend(config)?,
            presenter: Arc::new(LogPresenter::default()),
        };

        Ok(DialogueController::new(
            config.dialogue_settings(),
            parts,
            (events_tx, events_rx),
        ))
    }
}

/// Build the keyword engine, or the reason there is none
fn build_keyword_engine(
    config: &Config,
    transcriber: Arc<dyn Transcriber>,
    events: EventSender,
) -> Result<Box<dyn KeywordEngine>> {
    if !config.wake_word.enabled {
        return Err(Error::EngineUnavailable("wake word disabled".to_string()));
    }

    let keywords = match &config.wake_word.model_path {
        Some(path) => load_keyword_file(path)?,
        None => config.wake_word.keywords.clone(),
    };

    let input = MicInput::new(config.capture.sample_rate)
        .map_err(|e| Error::EngineUnavailable(e.to_string()))?;

    let spotter = TranscriptSpotter::new(keywords, Box::new(input), transcriber, events)?;
    Ok(Box::new(spotter))
}

/// Build the configured speech synthesizer
///
/// # Errors
///
/// Returns error if the provider is missing required settings
pub fn build_synthesizer(config: &Config) -> Result<Arc<dyn Synthesizer>> {
    let tts = &config.tts;
    match tts.provider {
        TtsProvider::Coqui => Ok(Arc::new(CoquiTts::new(
            &tts.host,
            tts.port,
            tts.coqui_endpoint.clone(),
            tts.espeak_endpoint.clone(),
        )?)),
        TtsProvider::OpenAi => {
            let key = tts
                .api_key
                .clone()
                .ok_or_else(|| Error::Config("OpenAI API key required for TTS".to_string()))?;
            Ok(Arc::new(OpenAiTts::new(
                key,
                tts.openai_voice.clone(),
                tts.speed,
                tts.openai_model.clone(),
            )?))
        }
    }
}

/// Build the chat inference backend
///
/// # Errors
///
/// Returns error if the server URL is invalid
pub fn build_backend(config: &Config) -> Result<Arc<dyn InferenceBackend>> {
    Ok(Arc::new(OllamaClient::new(
        &config.inference.server_url,
        config.inference.model.clone(),
        config.inference.timeout,
    )?))
}
