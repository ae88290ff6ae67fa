//! Voice processing module
//!
//! Handles the microphone, wake word detection, command recording,
//! transcription, synthesis, and playback.

mod capture;
mod mic;
mod playback;
mod recorder;
mod speech;
mod stt;
mod tts;
mod wake_word;

pub use capture::{
    AudioInput, MicInput, SAMPLE_RATE, mean_abs_amplitude, rms_energy, samples_to_wav,
};
pub use mic::{MicLease, MicOwner, MicrophoneGuard};
pub use playback::{AudioClip, AudioOutput, SpeakerOutput, decode_audio};
pub use recorder::{CommandCapture, CommandRecorder, RecorderState, Transcript, VadSettings};
pub use speech::{SpeechQueue, SpeechRequest};
pub use stt::{Transcriber, WhisperTranscriber};
pub use tts::{CoquiTts, OpenAiTts, Synthesizer, VoiceParams};
pub use wake_word::{
    KeywordEngine, ListenerState, TranscriptSpotter, WakeWordListener, load_keyword_file,
    match_keyword,
};
