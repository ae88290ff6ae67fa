//! Error types for the fridge companion runtime

use thiserror::Error;

use crate::voice::MicOwner;

/// Result type alias for companion operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the companion runtime
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Keyword engine could not be constructed; fatal for the listener's session
    #[error("wake word engine unavailable: {0}")]
    EngineUnavailable(String),

    /// The microphone is already leased
    #[error("microphone already held by {0}")]
    AlreadyHeld(MicOwner),

    /// A command capture is already in progress
    #[error("command recorder is already recording")]
    AlreadyRecording,

    /// A capture produced no audio
    #[error("capture produced no audio")]
    EmptyCapture,

    /// Transcription backend error
    #[error("STT error: {0}")]
    Stt(String),

    /// Inference backend error
    #[error("inference error: {0}")]
    Inference(String),

    /// Inference reply could not be interpreted
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Speech synthesis backend error
    #[error("TTS error: {0}")]
    Tts(String),

    /// A turn or inference request is already in flight
    #[error("a turn is already in progress")]
    Busy,

    /// The dialogue controller is no longer running
    #[error("dialogue controller has shut down")]
    Shutdown,

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
