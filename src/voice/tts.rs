//! Text-to-speech (TTS) processing

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::{Error, Result};

/// Voice selection carried with every speech request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceParams {
    /// Coqui speaker identifier
    pub speaker_id: String,
    /// eSpeak voice; when set, the eSpeak endpoint is used instead of Coqui
    pub espeak_voice: String,
}

/// Synthesizes speech from text
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Produce encoded audio (WAV or MP3) for the text
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails
    async fn synthesize(&self, text: &str, voice: &VoiceParams) -> Result<Vec<u8>>;
}

/// Coqui / eSpeak synthesis server on the local network
pub struct CoquiTts {
    client: reqwest::Client,
    base_url: String,
    coqui_endpoint: String,
    espeak_endpoint: String,
}

#[derive(serde::Serialize)]
struct CoquiRequest<'a> {
    #[serde(rename = "Text")]
    text: &'a str,
    #[serde(rename = "Speaker")]
    speaker: &'a str,
}

#[derive(serde::Serialize)]
struct EspeakRequest<'a> {
    #[serde(rename = "Text")]
    text: &'a str,
    #[serde(rename = "VoiceID")]
    voice_id: &'a str,
}

impl CoquiTts {
    /// Create a client for `http://{host}:{port}`
    ///
    /// # Errors
    ///
    /// Returns error if the host is empty
    pub fn new(host: &str, port: u16, coqui_endpoint: String, espeak_endpoint: String) -> Result<Self> {
        if host.trim().is_empty() {
            return Err(Error::Config("TTS server host required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: format!("http://{}:{port}", host.trim()),
            coqui_endpoint,
            espeak_endpoint,
        })
    }

    /// Endpoint URL and JSON body for a request
    fn request(&self, text: &str, voice: &VoiceParams) -> Result<(String, Vec<u8>)> {
        if voice.espeak_voice.is_empty() {
            let url = format!("{}{}", self.base_url, self.coqui_endpoint);
            let body = serde_json::to_vec(&CoquiRequest {
                text,
                speaker: &voice.speaker_id,
            })?;
            Ok((url, body))
        } else {
            let url = format!("{}{}", self.base_url, self.espeak_endpoint);
            let body = serde_json::to_vec(&EspeakRequest {
                text,
                voice_id: &voice.espeak_voice,
            })?;
            Ok((url, body))
        }
    }
}

#[async_trait]
impl Synthesizer for CoquiTts {
    async fn synthesize(&self, text: &str, voice: &VoiceParams) -> Result<Vec<u8>> {
        let (url, body) = self.request(text, voice)?;
        tracing::debug!(url = %url, chars = text.len(), "requesting speech");

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Tts(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("TTS server error {status}: {body}")));
        }

        let audio = response.bytes().await.map_err(|e| Error::Tts(e.to_string()))?;
        if audio.is_empty() {
            return Err(Error::Tts("TTS server returned no audio".to_string()));
        }
        Ok(audio.to_vec())
    }
}

/// OpenAI speech API
pub struct OpenAiTts {
    client: reqwest::Client,
    api_key: SecretString,
    voice: String,
    speed: f32,
    model: String,
}

impl OpenAiTts {
    /// Create a new `OpenAI` TTS client
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: SecretString, voice: String, speed: f32, model: String) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice,
            speed,
            model,
        })
    }
}

#[async_trait]
impl Synthesizer for OpenAiTts {
    async fn synthesize(&self, text: &str, _voice: &VoiceParams) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Tts(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response.bytes().await.map_err(|e| Error::Tts(e.to_string()))?;
        Ok(audio.to_vec())
    }
}
