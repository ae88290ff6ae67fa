//! TOML configuration file loading
//!
//! Supports `~/.config/fridge/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.
//! Durations are given in seconds.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct FridgeConfigFile {
    /// Wake word configuration
    #[serde(default)]
    pub wake_word: WakeWordFileConfig,

    /// Microphone and command capture
    #[serde(default)]
    pub capture: CaptureFileConfig,

    /// Transcription backend
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Chat inference backend
    #[serde(default)]
    pub inference: InferenceFileConfig,

    /// Speech synthesis backend
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// Turn-taking policy
    #[serde(default)]
    pub dialogue: DialogueFileConfig,
}

/// Wake word configuration
#[derive(Debug, Default, Deserialize)]
pub struct WakeWordFileConfig {
    /// Listen for the wake word at all
    pub enabled: Option<bool>,

    /// Phrases that start a turn (e.g. "hey fridge")
    pub keywords: Option<Vec<String>>,

    /// Keyword model file, one phrase per line
    pub model_path: Option<String>,
}

/// Capture configuration
#[derive(Debug, Default, Deserialize)]
pub struct CaptureFileConfig {
    /// Microphone sample rate in Hz
    pub sample_rate: Option<u32>,

    /// Command capture length after the wake word
    pub command_duration: Option<f64>,

    /// Follow-up window length
    pub followup_duration: Option<f64>,

    /// Upper bound for any capture
    pub max_recording: Option<f64>,

    /// Wait after revoking the wake word's microphone
    pub mic_release_grace: Option<f64>,

    /// Voice activity detection
    #[serde(default)]
    pub vad: VadFileConfig,
}

/// Voice activity detection configuration
#[derive(Debug, Default, Deserialize)]
pub struct VadFileConfig {
    /// Stop captures early on trailing silence
    pub enabled: Option<bool>,

    /// Mean absolute amplitude treated as silence
    pub threshold: Option<f32>,

    /// Trailing silence that stops a capture
    pub silence: Option<f64>,

    /// Window between checks
    pub interval: Option<f64>,
}

/// Transcription configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// OpenAI-compatible server base URL
    pub base_url: Option<String>,

    /// Model name (e.g. "whisper-1")
    pub model: Option<String>,

    /// API key
    pub api_key: Option<String>,
}

/// Inference configuration
#[derive(Debug, Default, Deserialize)]
pub struct InferenceFileConfig {
    /// Ollama server URL
    pub server_url: Option<String>,

    /// Model name (e.g. "gemma3:12b")
    pub model: Option<String>,

    /// Instructions sent first in every conversation
    pub system_prompt: Option<String>,

    /// Personality appended to the system prompt
    pub personality: Option<String>,

    /// Request timeout
    pub timeout: Option<f64>,
}

/// Synthesis configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// "coqui" or "openai"
    pub provider: Option<String>,

    /// Coqui server host
    pub host: Option<String>,

    /// Coqui server port
    pub port: Option<u16>,

    /// Coqui synthesis route
    pub coqui_endpoint: Option<String>,

    /// eSpeak synthesis route
    pub espeak_endpoint: Option<String>,

    /// Coqui speaker identifier
    pub speaker_id: Option<String>,

    /// eSpeak voice; selects the eSpeak route when set
    pub espeak_voice: Option<String>,

    /// OpenAI voice
    pub openai_voice: Option<String>,

    /// OpenAI model
    pub openai_model: Option<String>,

    /// OpenAI speed multiplier
    pub speed: Option<f32>,

    /// OpenAI API key
    pub api_key: Option<String>,
}

/// Dialogue configuration
#[derive(Debug, Default, Deserialize)]
pub struct DialogueFileConfig {
    /// Listen for a follow-up without the wake word
    pub followup_enabled: Option<bool>,

    /// Phrase spoken when a turn fails
    pub apology: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `FridgeConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> FridgeConfigFile {
    config_file_path().map_or_else(FridgeConfigFile::default, |path| load_config_file_from(&path))
}

/// Load a TOML config file from an explicit path
///
/// Returns `FridgeConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file_from(path: &Path) -> FridgeConfigFile {
    if !path.exists() {
        return FridgeConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                FridgeConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            FridgeConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/fridge/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("fridge").join("config.toml"))
}
