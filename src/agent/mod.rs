//! Inference backend
//!
//! The dialogue controller sends the whole conversation, plus any camera
//! frames it holds, to an [`InferenceBackend`] and gets raw reply text back.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Speaker of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions
    System,
    /// The person talking to the fridge
    User,
    /// The fridge
    Assistant,
}

/// One message of the conversation history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Speaker
    pub role: Role,
    /// Text
    pub content: String,
}

impl ChatMessage {
    /// System prompt
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// User turn
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Assistant turn
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// An encoded camera frame (PNG or JPEG bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFrame {
    bytes: Vec<u8>,
}

impl ImageFrame {
    /// Wrap encoded image bytes
    #[must_use]
    pub const fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Encoded bytes
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Base64 form used by the Ollama API
    #[must_use]
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }
}

/// Produces a reply for a conversation
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Generate the next assistant message
    ///
    /// Images are attached to the last user message.
    ///
    /// # Errors
    ///
    /// Returns error if the backend is unreachable or replies with an error
    async fn generate(&self, history: &[ChatMessage], images: &[ImageFrame]) -> Result<String>;
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct OllamaMessage<'a> {
    role: Role,
    content: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: Option<OllamaReply>,
}

#[derive(Deserialize)]
struct OllamaReply {
    content: String,
}

/// Ollama `/api/chat` client
pub struct OllamaClient {
    client: reqwest::Client,
    chat_url: String,
    model: String,
}

impl OllamaClient {
    /// Create a client for the server at `server_url`
    ///
    /// # Errors
    ///
    /// Returns error if the URL is empty or the HTTP client cannot be built
    pub fn new(server_url: &str, model: String, timeout: Duration) -> Result<Self> {
        let base = server_url.trim().trim_end_matches('/');
        if base.is_empty() {
            return Err(Error::Config("inference server URL required".to_string()));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            chat_url: format!("{base}/api/chat"),
            model,
        })
    }

    fn request<'a>(
        &'a self,
        history: &'a [ChatMessage],
        images: &[ImageFrame],
    ) -> OllamaChatRequest<'a> {
        let last_user = history.iter().rposition(|m| m.role == Role::User);

        let messages = history
            .iter()
            .enumerate()
            .map(|(i, m)| OllamaMessage {
                role: m.role,
                content: &m.content,
                images: if Some(i) == last_user {
                    images.iter().map(ImageFrame::to_base64).collect()
                } else {
                    Vec::new()
                },
            })
            .collect();

        OllamaChatRequest {
            model: &self.model,
            messages,
            stream: false,
        }
    }
}

#[async_trait]
impl InferenceBackend for OllamaClient {
    async fn generate(&self, history: &[ChatMessage], images: &[ImageFrame]) -> Result<String> {
        let request = self.request(history, images);
        tracing::debug!(
            model = %self.model,
            messages = history.len(),
            images = images.len(),
            "sending chat request"
        );

        let response = self
            .client
            .post(&self.chat_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Inference(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Inference(e.to_string()))?;

        if !status.is_success() {
            tracing::error!(status = %status, body = %body, "Ollama error");
            return Err(Error::Inference(format!("Ollama HTTP error {status}: {body}")));
        }

        let reply: OllamaChatResponse = serde_json::from_str(&body)
            .map_err(|e| Error::Inference(format!("unreadable Ollama reply: {e}")))?;

        let content = reply
            .message
            .map(|m| m.content)
            .ok_or_else(|| Error::Inference("Ollama reply had no message".to_string()))?;

        tracing::debug!(chars = content.len(), "chat reply received");
        Ok(content)
    }
}
