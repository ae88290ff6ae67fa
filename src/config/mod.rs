//! Configuration management for the fridge companion
//!
//! Built once at startup with precedence environment > config file >
//! defaults, then passed by value into the components that need it.

pub mod file;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use self::file::FridgeConfigFile;
use crate::turn::DialogueSettings;
use crate::voice::{SAMPLE_RATE, VadSettings, VoiceParams};
use crate::{Error, Result};

/// Default instructions for the chat model
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly talking fridge. \
Answer in one or two short sentences. Reply only with JSON of the form \
{\"message\": \"<what you say>\", \"emotion\": [pleasure, arousal, dominance]} \
where each emotion value is between 0 and 1.";

/// Fridge companion configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Wake word configuration
    pub wake_word: WakeWordConfig,

    /// Microphone and command capture
    pub capture: CaptureConfig,

    /// Transcription backend
    pub stt: SttConfig,

    /// Chat inference backend
    pub inference: InferenceConfig,

    /// Speech synthesis backend
    pub tts: TtsConfig,

    /// Turn-taking policy
    pub dialogue: DialogueConfig,
}

/// Wake word configuration
#[derive(Debug, Clone)]
pub struct WakeWordConfig {
    /// Listen for the wake word at all
    pub enabled: bool,

    /// Phrases that start a turn
    pub keywords: Vec<String>,

    /// Keyword model file, one phrase per line; replaces `keywords`
    pub model_path: Option<PathBuf>,
}

/// Capture configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Microphone sample rate in Hz
    pub sample_rate: u32,

    /// Command capture length after the wake word
    pub command_duration: Duration,

    /// Follow-up window length
    pub followup_duration: Duration,

    /// Upper bound for any capture
    pub max_recording: Duration,

    /// Wait after revoking the wake word's microphone (zero = one tick)
    pub mic_release_grace: Duration,

    /// Voice activity detection
    pub vad: VadConfig,
}

/// Voice activity detection configuration
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Stop captures early on trailing silence
    pub enabled: bool,

    /// Mean absolute amplitude treated as silence
    pub threshold: f32,

    /// Trailing silence that stops a capture
    pub silence: Duration,

    /// Window between checks
    pub interval: Duration,
}

/// Transcription configuration
#[derive(Debug, Clone)]
pub struct SttConfig {
    /// OpenAI-compatible server base URL
    pub base_url: String,

    /// Model name
    pub model: String,

    /// API key, if the server needs one
    pub api_key: Option<SecretString>,
}

/// Inference configuration
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    /// Ollama server URL
    pub server_url: String,

    /// Model name
    pub model: String,

    /// Instructions sent first in every conversation
    pub system_prompt: String,

    /// Personality appended to the system prompt
    pub personality: String,

    /// Request timeout
    pub timeout: Duration,
}

/// Speech synthesis backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TtsProvider {
    /// Coqui / eSpeak server on the local network
    #[default]
    Coqui,
    /// OpenAI speech API
    OpenAi,
}

impl FromStr for TtsProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "coqui" | "espeak" | "local" => Ok(Self::Coqui),
            "openai" => Ok(Self::OpenAi),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }
}

/// Synthesis configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Backend
    pub provider: TtsProvider,

    /// Coqui server host
    pub host: String,

    /// Coqui server port
    pub port: u16,

    /// Coqui synthesis route
    pub coqui_endpoint: String,

    /// eSpeak synthesis route
    pub espeak_endpoint: String,

    /// Coqui speaker identifier and eSpeak voice
    pub voice: VoiceParams,

    /// OpenAI voice
    pub openai_voice: String,

    /// OpenAI model
    pub openai_model: String,

    /// OpenAI speed multiplier (0.25 to 4.0)
    pub speed: f32,

    /// OpenAI API key
    pub api_key: Option<SecretString>,
}

/// Dialogue configuration
#[derive(Debug, Clone)]
pub struct DialogueConfig {
    /// Listen for a follow-up without the wake word
    pub followup_enabled: bool,

    /// Phrase spoken when a turn fails
    pub apology: Option<String>,
}

impl Config {
    /// Load configuration from the environment and the config file
    ///
    /// # Errors
    ///
    /// Returns error if a value is invalid
    pub fn load() -> Result<Self> {
        Self::resolve(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Merge a config file with an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a value is invalid
    #[allow(clippy::too_many_lines)]
    pub fn resolve(fc: FridgeConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env_parse = |key: &str| env(key).and_then(|v| v.parse::<f64>().ok());
        let env_bool = |key: &str| env(key).map(|v| v == "true" || v == "1");

        let keywords = env("FRIDGE_WAKE_WORDS")
            .map(|v| v.split(',').map(|w| w.trim().to_string()).collect())
            .or(fc.wake_word.keywords)
            .unwrap_or_else(|| vec!["hey fridge".to_string()]);

        let wake_word = WakeWordConfig {
            enabled: env_bool("FRIDGE_WAKE_WORD_ENABLED")
                .or(fc.wake_word.enabled)
                .unwrap_or(true),
            keywords,
            model_path: env("FRIDGE_KEYWORD_MODEL")
                .or(fc.wake_word.model_path)
                .map(PathBuf::from),
        };

        let vad = VadConfig {
            enabled: env_bool("FRIDGE_VAD").or(fc.capture.vad.enabled).unwrap_or(true),
            threshold: fc.capture.vad.threshold.unwrap_or(0.01),
            silence: seconds(fc.capture.vad.silence, 1.5)?,
            interval: seconds(fc.capture.vad.interval, 0.1)?,
        };

        let capture = CaptureConfig {
            sample_rate: fc.capture.sample_rate.unwrap_or(SAMPLE_RATE),
            command_duration: seconds(
                env_parse("FRIDGE_COMMAND_DURATION").or(fc.capture.command_duration),
                5.0,
            )?,
            followup_duration: seconds(
                env_parse("FRIDGE_FOLLOWUP_DURATION").or(fc.capture.followup_duration),
                10.0,
            )?,
            max_recording: seconds(fc.capture.max_recording, 10.0)?,
            mic_release_grace: seconds(fc.capture.mic_release_grace, 0.0)?,
            vad,
        };

        let openai_key = env("OPENAI_API_KEY");

        let stt = SttConfig {
            base_url: env("FRIDGE_STT_URL")
                .or(fc.stt.base_url)
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            model: env("FRIDGE_STT_MODEL")
                .or(fc.stt.model)
                .unwrap_or_else(|| "whisper-1".to_string()),
            api_key: env("FRIDGE_STT_API_KEY")
                .or(fc.stt.api_key)
                .or_else(|| openai_key.clone())
                .map(SecretString::from),
        };

        let inference = InferenceConfig {
            server_url: env("FRIDGE_OLLAMA_URL")
                .or(fc.inference.server_url)
                .unwrap_or_else(|| "http://localhost:11434/".to_string()),
            model: env("FRIDGE_MODEL")
                .or(fc.inference.model)
                .unwrap_or_else(|| "gemma3:12b".to_string()),
            system_prompt: fc
                .inference
                .system_prompt
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            personality: env("FRIDGE_PERSONALITY")
                .or(fc.inference.personality)
                .unwrap_or_default(),
            timeout: seconds(fc.inference.timeout, 120.0)?,
        };

        let provider = env("FRIDGE_TTS_PROVIDER")
            .or(fc.tts.provider)
            .map(|p| p.parse::<TtsProvider>())
            .transpose()?
            .unwrap_or_default();

        let tts = TtsConfig {
            provider,
            host: env("FRIDGE_TTS_HOST")
                .or(fc.tts.host)
                .unwrap_or_else(|| "localhost".to_string()),
            port: env("FRIDGE_TTS_PORT")
                .and_then(|p| p.parse().ok())
                .or(fc.tts.port)
                .unwrap_or(5000),
            coqui_endpoint: fc
                .tts
                .coqui_endpoint
                .unwrap_or_else(|| "/synthesize_speech".to_string()),
            espeak_endpoint: fc
                .tts
                .espeak_endpoint
                .unwrap_or_else(|| "/synthesize_espeak".to_string()),
            voice: VoiceParams {
                speaker_id: env("FRIDGE_SPEAKER_ID")
                    .or(fc.tts.speaker_id)
                    .unwrap_or_default(),
                espeak_voice: env("FRIDGE_ESPEAK_VOICE")
                    .or(fc.tts.espeak_voice)
                    .unwrap_or_default(),
            },
            openai_voice: fc.tts.openai_voice.unwrap_or_else(|| "alloy".to_string()),
            openai_model: fc.tts.openai_model.unwrap_or_else(|| "tts-1".to_string()),
            speed: fc.tts.speed.unwrap_or(1.0).clamp(0.25, 4.0),
            api_key: fc.tts.api_key.or(openai_key).map(SecretString::from),
        };

        let dialogue = DialogueConfig {
            followup_enabled: env_bool("FRIDGE_FOLLOWUP")
                .or(fc.dialogue.followup_enabled)
                .unwrap_or(true),
            apology: fc.dialogue.apology.filter(|a| !a.trim().is_empty()),
        };

        let config = Self {
            wake_word,
            capture,
            stt,
            inference,
            tts,
            dialogue,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.capture.sample_rate == 0 {
            return Err(Error::Config("capture.sample_rate must be positive".to_string()));
        }
        if self.capture.vad.interval.is_zero() {
            return Err(Error::Config("capture.vad.interval must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.capture.vad.threshold) {
            return Err(Error::Config(
                "capture.vad.threshold must be between 0 and 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Voice activity detection, if enabled
    #[must_use]
    pub fn vad_settings(&self) -> Option<VadSettings> {
        let vad = &self.capture.vad;
        vad.enabled.then_some(VadSettings {
            threshold: vad.threshold,
            silence: vad.silence,
            interval: vad.interval,
        })
    }

    /// System prompt with the personality appended
    #[must_use]
    pub fn system_prompt(&self) -> String {
        let personality = self.inference.personality.trim();
        if personality.is_empty() {
            self.inference.system_prompt.clone()
        } else {
            format!("{}\n{personality}", self.inference.system_prompt)
        }
    }

    /// Turn timing and policy, with capture lengths capped at `max_recording`
    #[must_use]
    pub fn dialogue_settings(&self) -> DialogueSettings {
        let max = self.capture.max_recording;
        DialogueSettings {
            command_duration: self.capture.command_duration.min(max),
            followup_duration: self.capture.followup_duration.min(max),
            followup_enabled: self.dialogue.followup_enabled,
            mic_release_grace: self.capture.mic_release_grace,
            apology: self.dialogue.apology.clone(),
            system_prompt: self.system_prompt(),
        }
    }
}

fn seconds(value: Option<f64>, default: f64) -> Result<Duration> {
    let secs = value.unwrap_or(default);
    Duration::try_from_secs_f64(secs)
        .map_err(|_| Error::Config(format!("invalid duration: {secs} seconds")))
}
