//! Fridge companion - a talking fridge that takes conversational turns
//!
//! This library provides the turn-taking core of the companion:
//! - Microphone ownership between the wake word and the command recorder
//! - Wake word listening, command capture, and transcription
//! - Chat inference and response interpretation
//! - Queued speech synthesis and playback
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  KeywordDetected   ┌──────────────────────┐
//! │  Wake word   │ ─────────────────▶ │                      │
//! └──────────────┘                    │                      │
//!        ▲  MicrophoneGuard           │  DialogueController  │──▶ Presenter
//!        ▼                            │  (owns TurnState)    │
//! ┌──────────────┐ ListenWindowEnded  │                      │
//! │   Recorder   │ ─────────────────▶ │                      │
//! └──────────────┘                    └──────────────────────┘
//!                                       │ InferenceFinished ▲
//!                       InferenceBackend ▼                   │ PlaybackQueueDrained
//!                                     ┌──────────────────────┐
//!                                     │     SpeechQueue      │
//!                                     └──────────────────────┘
//! ```

pub mod agent;
pub mod config;
pub mod daemon;
pub mod error;
pub mod presentation;
pub mod turn;
pub mod voice;

pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, Result};
