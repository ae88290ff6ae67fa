//! Speech-to-text (STT) processing

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::capture::samples_to_wav;
use crate::{Error, Result};

/// Transcribes recorded audio to text
///
/// Backends may block, run on a worker, or go over the network; callers only
/// ever see the awaited result.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe mono or interleaved f32 samples
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails or returns an unreadable reply
    async fn transcribe(&self, samples: &[f32], sample_rate: u32, channels: u16)
    -> Result<String>;
}

/// Response from an OpenAI-compatible transcription endpoint
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Whisper over the OpenAI-compatible `/v1/audio/transcriptions` API
///
/// Works against api.openai.com as well as local whisper servers exposing
/// the same route.
pub struct WhisperTranscriber {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
}

impl WhisperTranscriber {
    /// Create a new Whisper client
    ///
    /// # Errors
    ///
    /// Returns error if the base URL is empty
    pub fn new(base_url: &str, model: String, api_key: Option<SecretString>) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::Config("STT base URL required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            model,
        })
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(
        &self,
        samples: &[f32],
        sample_rate: u32,
        channels: u16,
    ) -> Result<String> {
        let audio = samples_to_wav(samples, sample_rate, channels)?;
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let mut request = self
            .client
            .post(format!("{}/v1/audio/transcriptions", self.base_url))
            .multipart(form);

        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!(error = %e, "Whisper request failed");
            Error::Stt(e.to_string())
        })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse response");
            Error::Stt(e.to_string())
        })?;

        tracing::info!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_base_url() {
        assert!(WhisperTranscriber::new("", "whisper-1".to_string(), None).is_err());
        assert!(WhisperTranscriber::new("/", "whisper-1".to_string(), None).is_err());

        let stt = WhisperTranscriber::new("http://localhost:8000/", "base".to_string(), None)
            .unwrap();
        assert_eq!(stt.base_url, "http://localhost:8000");
    }
}
