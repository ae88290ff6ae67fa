//! Speech output queue
//!
//! Requests are synthesized and played strictly one at a time in FIFO order.
//! When the last pending request finishes the queue reports
//! [`TurnEvent::PlaybackQueueDrained`].

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::playback::{AudioOutput, decode_audio};
use super::tts::{Synthesizer, VoiceParams};
use crate::turn::{EventSender, TurnEvent};

/// Text to speak and the voice to speak it with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechRequest {
    /// Text to synthesize
    pub text: String,
    /// Voice selection
    pub voice: VoiceParams,
}

/// FIFO queue of speech requests with a single playback worker
pub struct SpeechQueue {
    tx: mpsc::UnboundedSender<SpeechRequest>,
    pending: Arc<AtomicUsize>,
    voice: VoiceParams,
    worker: JoinHandle<()>,
}

impl SpeechQueue {
    /// Start the playback worker
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        output: Arc<dyn AudioOutput>,
        voice: VoiceParams,
        events: EventSender,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));

        let worker = tokio::spawn(drain_queue(
            rx,
            synthesizer,
            output,
            Arc::clone(&pending),
            events,
        ));

        Self {
            tx,
            pending,
            voice,
            worker,
        }
    }

    /// Queue text in the default voice; empty text is dropped
    pub fn enqueue(&self, text: &str) {
        self.enqueue_request(SpeechRequest {
            text: text.to_string(),
            voice: self.voice.clone(),
        });
    }

    /// Queue a request; never interrupts the one playing
    pub fn enqueue_request(&self, request: SpeechRequest) {
        if request.text.trim().is_empty() {
            tracing::debug!("ignoring empty speech request");
            return;
        }

        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(request).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            tracing::error!("speech worker gone, request dropped");
        }
    }

    /// Check if anything is queued or playing
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.pending.load(Ordering::Acquire) > 0
    }

    /// Requests queued or playing
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

impl Drop for SpeechQueue {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn drain_queue(
    mut rx: mpsc::UnboundedReceiver<SpeechRequest>,
    synthesizer: Arc<dyn Synthesizer>,
    output: Arc<dyn AudioOutput>,
    pending: Arc<AtomicUsize>,
    events: EventSender,
) {
    while let Some(request) = rx.recv().await {
        speak(&request, synthesizer.as_ref(), output.as_ref()).await;

        if pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            tracing::debug!("speech queue drained");
            let _ = events.send(TurnEvent::PlaybackQueueDrained);
        }
    }
}

/// Synthesize and play one request, logging and skipping on failure
async fn speak(request: &SpeechRequest, synthesizer: &dyn Synthesizer, output: &dyn AudioOutput) {
    let audio = match synthesizer.synthesize(&request.text, &request.voice).await {
        Ok(audio) => audio,
        Err(e) => {
            tracing::warn!(error = %e, text = %request.text, "synthesis failed, skipping");
            return;
        }
    };

    let decoded = tokio::task::spawn_blocking(move || decode_audio(&audio)).await;
    let clip = match decoded {
        Ok(Ok(clip)) => clip,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "undecodable speech audio, skipping");
            return;
        }
        Err(e) => {
            tracing::error!(error = %e, "decode task failed");
            return;
        }
    };

    tracing::info!(text = %request.text, duration = ?clip.duration(), "speaking");
    if let Err(e) = output.play(clip).await {
        tracing::warn!(error = %e, "playback failed");
    }
}
