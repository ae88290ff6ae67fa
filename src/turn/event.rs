//! Turn states and the events that move them

use std::fmt;

use tokio::sync::mpsc;

use crate::Result;
use crate::voice::Transcript;

/// Phase of the current conversational turn
///
/// Owned by the dialogue controller; other components only observe it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TurnState {
    /// No turn in flight; wake word listening is armed when available
    #[default]
    Idle,
    /// Wake word heard, microphone being handed over
    WakeArmed,
    /// Recording the user's command
    Capturing,
    /// Recording stopped, waiting for the transcript
    Transcribing,
    /// Transcript submitted, waiting for the inference reply
    AwaitingInference,
    /// Reply queued for playback
    Speaking,
    /// Listening for a follow-up without the wake word
    FollowupWindow,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::WakeArmed => "wake-armed",
            Self::Capturing => "capturing",
            Self::Transcribing => "transcribing",
            Self::AwaitingInference => "awaiting-inference",
            Self::Speaking => "speaking",
            Self::FollowupWindow => "followup-window",
        };
        f.write_str(name)
    }
}

/// What ended a command capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopTrigger {
    /// Hard deadline elapsed
    Deadline,
    /// Voice activity monitor heard enough trailing silence
    Silence,
    /// Stopped explicitly
    Cancelled,
    /// The input device never started
    DeviceFailed,
}

/// Signals delivered to the dialogue controller
#[derive(Debug)]
pub enum TurnEvent {
    /// Keyword engine callback, index into the configured keywords
    KeywordDetected {
        /// Keyword index
        keyword: usize,
    },
    /// A capture stopped recording and went to transcription
    CaptureStopped {
        /// Capture identifier
        capture: u64,
        /// What stopped it
        trigger: StopTrigger,
    },
    /// A capture finished; fires exactly once per started capture
    ListenWindowEnded {
        /// Capture identifier
        capture: u64,
        /// Result of the capture
        transcript: Transcript,
        /// What stopped the recording
        trigger: StopTrigger,
    },
    /// The inference backend answered or failed
    InferenceFinished {
        /// Request identifier
        request: u64,
        /// Raw reply text or backend error
        outcome: Result<String>,
    },
    /// Every queued speech request finished
    PlaybackQueueDrained,
}

/// Sending half of the controller's event channel
pub type EventSender = mpsc::UnboundedSender<TurnEvent>;

/// Receiving half of the controller's event channel
pub type EventReceiver = mpsc::UnboundedReceiver<TurnEvent>;

/// Create the controller's event channel
#[must_use]
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
