//! Voice pipeline integration tests
//!
//! Recorder, wake word listener, and speech queue against scripted devices.
//! All timing runs on tokio's paused clock.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::time::{Instant, timeout};

use common::{
    FakeSynth, FakeTranscriber, Journal, ManualEngine, RecordingOutput, ScriptedInput,
};
use fridge_companion::Error;
use fridge_companion::turn::{EventReceiver, StopTrigger, TurnEvent, event_channel};
use fridge_companion::voice::{
    CommandRecorder, KeywordEngine, ListenerState, MicOwner, MicrophoneGuard, RecorderState,
    SpeechQueue, Transcript, VadSettings, VoiceParams, WakeWordListener,
};

/// Next event, failing the test if none arrives within a minute
async fn next_event(rx: &mut EventReceiver) -> TurnEvent {
    timeout(Duration::from_secs(60), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Assert nothing else arrives for a while
async fn assert_quiet(rx: &mut EventReceiver) {
    if let Ok(Some(event)) = timeout(Duration::from_secs(30), rx.recv()).await {
        panic!("unexpected event: {event:?}");
    }
}

async fn window_end(rx: &mut EventReceiver) -> (Transcript, StopTrigger) {
    loop {
        if let TurnEvent::ListenWindowEnded {
            transcript, trigger, ..
        } = next_event(rx).await
        {
            return (transcript, trigger);
        }
    }
}

// ============================================================================
// Command recorder
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_capture_stops_on_trailing_silence() {
    let (events, mut rx) = event_channel();
    let guard = MicrophoneGuard::new();
    let (input, probe) = ScriptedInput::speech_then_silence(Duration::from_secs(3));
    let transcriber = FakeTranscriber::new("turn on the lights");

    let recorder = CommandRecorder::new(
        Box::new(input),
        transcriber.clone(),
        Some(VadSettings::default()),
        events,
    );

    let started = Instant::now();
    let lease = guard.acquire(MicOwner::Recorder).unwrap();
    let id = recorder.start_capture(Duration::from_secs(10), lease).unwrap();

    match next_event(&mut rx).await {
        TurnEvent::CaptureStopped { capture, trigger } => {
            assert_eq!(capture, id);
            assert_eq!(trigger, StopTrigger::Silence);
        }
        other => panic!("expected CaptureStopped, got {other:?}"),
    }

    // 3s of speech plus 1.5s of silence, well before the 10s limit
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(4400), "stopped too early: {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(4700), "stopped too late: {elapsed:?}");

    // Microphone released before transcription
    assert!(!guard.is_held());
    assert_eq!(probe.closes(), 1);

    let (transcript, trigger) = window_end(&mut rx).await;
    assert!(transcript.succeeded());
    assert_eq!(transcript.text(), "turn on the lights");
    assert_eq!(trigger, StopTrigger::Silence);
    assert_eq!(transcriber.calls(), 1);
    assert_eq!(recorder.state(), RecorderState::Idle);

    assert_quiet(&mut rx).await;
}

#[tokio::test(start_paused = true)]
async fn test_leading_silence_runs_to_deadline() {
    let (events, mut rx) = event_channel();
    let guard = MicrophoneGuard::new();
    let (input, _probe) = ScriptedInput::new(Vec::new());

    let recorder = CommandRecorder::new(
        Box::new(input),
        FakeTranscriber::new("[BLANK_AUDIO]"),
        Some(VadSettings::default()),
        events,
    );

    let started = Instant::now();
    let lease = guard.acquire(MicOwner::Recorder).unwrap();
    recorder.start_capture(Duration::from_secs(5), lease).unwrap();

    let (transcript, trigger) = window_end(&mut rx).await;
    assert_eq!(trigger, StopTrigger::Deadline);
    assert!(started.elapsed() >= Duration::from_secs(5));

    // Placeholder-only output counts as nothing heard
    assert!(!transcript.succeeded());
}

#[tokio::test(start_paused = true)]
async fn test_capture_without_vad_uses_full_duration() {
    let (events, mut rx) = event_channel();
    let guard = MicrophoneGuard::new();
    let (input, _probe) = ScriptedInput::speech_then_silence(Duration::from_secs(1));

    let recorder = CommandRecorder::new(
        Box::new(input),
        FakeTranscriber::new("hello fridge"),
        None,
        events,
    );

    let started = Instant::now();
    let lease = guard.acquire(MicOwner::Recorder).unwrap();
    recorder.start_capture(Duration::from_secs(3), lease).unwrap();

    let (transcript, trigger) = window_end(&mut rx).await;
    assert_eq!(trigger, StopTrigger::Deadline);
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert_eq!(transcript.text(), "hello fridge");
}

#[tokio::test(start_paused = true)]
async fn test_zero_duration_capture_fails_once() {
    let (events, mut rx) = event_channel();
    let guard = MicrophoneGuard::new();
    let (input, _probe) = ScriptedInput::speech_then_silence(Duration::from_secs(3));
    let transcriber = FakeTranscriber::new("should not be called");

    let recorder = CommandRecorder::new(
        Box::new(input),
        transcriber.clone(),
        Some(VadSettings::default()),
        events,
    );

    let lease = guard.acquire(MicOwner::Recorder).unwrap();
    recorder.start_capture(Duration::ZERO, lease).unwrap();

    // No audio means no CaptureStopped and no backend call, straight to the end
    match next_event(&mut rx).await {
        TurnEvent::ListenWindowEnded { transcript, .. } => assert!(!transcript.succeeded()),
        other => panic!("expected ListenWindowEnded, got {other:?}"),
    }
    assert_eq!(transcriber.calls(), 0);
    assert!(recorder.is_idle());

    assert_quiet(&mut rx).await;
}

#[tokio::test(start_paused = true)]
async fn test_device_failure_reports_failed_transcript() {
    let (events, mut rx) = event_channel();
    let guard = MicrophoneGuard::new();
    let (input, probe) = ScriptedInput::broken();
    let transcriber = FakeTranscriber::new("unused");

    let recorder = CommandRecorder::new(
        Box::new(input),
        transcriber.clone(),
        Some(VadSettings::default()),
        events,
    );

    let lease = guard.acquire(MicOwner::Recorder).unwrap();
    recorder.start_capture(Duration::from_secs(5), lease).unwrap();

    let (transcript, trigger) = window_end(&mut rx).await;
    assert!(!transcript.succeeded());
    assert_eq!(trigger, StopTrigger::DeviceFailed);
    assert_eq!(probe.opens(), 0);
    assert_eq!(transcriber.calls(), 0);
    assert!(!guard.is_held());
    assert!(recorder.is_idle());
}

#[tokio::test(start_paused = true)]
async fn test_transcription_error_reports_failed_transcript() {
    let (events, mut rx) = event_channel();
    let guard = MicrophoneGuard::new();
    let (input, _probe) = ScriptedInput::speech_then_silence(Duration::from_secs(1));
    let transcriber =
        FakeTranscriber::scripted(vec![Err(Error::Stt("server down".to_string()))], "unused");

    let recorder = CommandRecorder::new(
        Box::new(input),
        transcriber.clone(),
        Some(VadSettings::default()),
        events,
    );

    let lease = guard.acquire(MicOwner::Recorder).unwrap();
    recorder.start_capture(Duration::from_secs(5), lease).unwrap();

    let (transcript, trigger) = window_end(&mut rx).await;
    assert!(!transcript.succeeded());
    assert_eq!(trigger, StopTrigger::Silence);
    assert_eq!(transcriber.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_capture_ends_window_once() {
    let (events, mut rx) = event_channel();
    let guard = MicrophoneGuard::new();
    let (input, _probe) = ScriptedInput::speech_then_silence(Duration::from_secs(60));

    let recorder = CommandRecorder::new(
        Box::new(input),
        FakeTranscriber::new("open the door"),
        Some(VadSettings::default()),
        events,
    );

    let lease = guard.acquire(MicOwner::Recorder).unwrap();
    recorder.start_capture(Duration::from_secs(10), lease).unwrap();
    assert_eq!(recorder.state(), RecorderState::Recording);

    tokio::time::sleep(Duration::from_secs(1)).await;
    recorder.stop_capture();
    recorder.stop_capture();

    let (transcript, trigger) = window_end(&mut rx).await;
    assert_eq!(trigger, StopTrigger::Cancelled);
    assert_eq!(transcript.text(), "open the door");

    // Stopping an idle recorder does nothing
    recorder.stop_capture();
    assert_quiet(&mut rx).await;
}

#[tokio::test(start_paused = true)]
async fn test_second_capture_rejected_while_recording() {
    let (events, mut rx) = event_channel();
    let guard = MicrophoneGuard::new();
    let (input, _probe) = ScriptedInput::speech_then_silence(Duration::from_secs(1));

    let recorder = CommandRecorder::new(
        Box::new(input),
        FakeTranscriber::new("milk"),
        Some(VadSettings::default()),
        events,
    );

    let lease = guard.acquire(MicOwner::Recorder).unwrap();
    let first = recorder.start_capture(Duration::from_secs(5), lease).unwrap();

    let other_guard = MicrophoneGuard::new();
    let lease = other_guard.acquire(MicOwner::Recorder).unwrap();
    let result = recorder.start_capture(Duration::from_secs(5), lease);
    assert!(matches!(result, Err(Error::AlreadyRecording)));

    let mut ended = Vec::new();
    while ended.is_empty() {
        if let TurnEvent::ListenWindowEnded { capture, .. } = next_event(&mut rx).await {
            ended.push(capture);
        }
    }
    assert_eq!(ended, vec![first]);

    // Ready again afterwards
    let lease = guard.acquire(MicOwner::Recorder).unwrap();
    let second = recorder.start_capture(Duration::from_secs(5), lease).unwrap();
    assert_ne!(first, second);
}

// ============================================================================
// Wake word listener
// ============================================================================

#[test]
fn test_listener_detection_hands_over_microphone() {
    let guard = MicrophoneGuard::new();
    let (engine, _starts, stops) = ManualEngine::new();
    let mut listener = WakeWordListener::new(Ok(Box::new(engine)), guard.clone());

    listener.start().unwrap();
    assert!(listener.on_detected(0));
    assert_eq!(stops.load(Ordering::SeqCst), 1);

    // The recorder can take over immediately
    let lease = guard.acquire(MicOwner::Recorder).unwrap();
    assert_eq!(lease.owner(), MicOwner::Recorder);

    // A late callback is ignored, and the listener can't take the mic back
    assert!(!listener.on_detected(0));
    assert!(matches!(
        listener.start(),
        Err(Error::AlreadyHeld(MicOwner::Recorder))
    ));
    assert_eq!(listener.state(), ListenerState::Stopped);
}

#[test]
fn test_listener_without_engine() {
    let guard = MicrophoneGuard::new();
    let engine: fridge_companion::Result<Box<dyn KeywordEngine>> =
        Err(Error::EngineUnavailable("no keyword file".to_string()));
    let mut listener = WakeWordListener::new(engine, guard.clone());

    assert!(!listener.is_available());
    assert!(matches!(listener.start(), Err(Error::EngineUnavailable(_))));
    assert!(!guard.is_held());

    // Stop on a never-started listener is harmless
    listener.stop();
    assert_eq!(listener.state(), ListenerState::Stopped);
}

// ============================================================================
// Speech queue
// ============================================================================

fn speech_queue(
    journal: &Journal,
    failing: &[&str],
) -> (SpeechQueue, Arc<RecordingOutput>, EventReceiver) {
    let (events, rx) = event_channel();
    let output = RecordingOutput::new(journal.clone());
    let queue = SpeechQueue::new(
        FakeSynth::new(journal.clone(), failing),
        output.clone(),
        VoiceParams::default(),
        events,
    );
    (queue, output, rx)
}

#[tokio::test(start_paused = true)]
async fn test_speech_plays_in_order_and_drains_once() {
    let journal = Journal::default();
    let (queue, output, mut rx) = speech_queue(&journal, &[]);

    queue.enqueue("hello");
    queue.enqueue("world");
    assert!(queue.is_speaking());
    assert_eq!(queue.pending(), 2);

    assert!(matches!(next_event(&mut rx).await, TurnEvent::PlaybackQueueDrained));
    assert_eq!(
        journal.entries(),
        vec!["synth:hello", "play", "done", "synth:world", "play", "done"]
    );
    assert_eq!(output.max_concurrent.load(Ordering::SeqCst), 1);
    assert!(!queue.is_speaking());

    assert_quiet(&mut rx).await;
}

#[tokio::test(start_paused = true)]
async fn test_speech_skips_failed_synthesis() {
    let journal = Journal::default();
    let (queue, _output, mut rx) = speech_queue(&journal, &["hello"]);

    queue.enqueue("hello");
    queue.enqueue("world");

    assert!(matches!(next_event(&mut rx).await, TurnEvent::PlaybackQueueDrained));
    assert_eq!(journal.entries(), vec!["synth:hello", "synth:world", "play", "done"]);

    assert_quiet(&mut rx).await;
}

#[tokio::test(start_paused = true)]
async fn test_enqueue_during_playback_waits_its_turn() {
    let journal = Journal::default();
    let (queue, output, mut rx) = speech_queue(&journal, &[]);

    queue.enqueue("first");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(output.playing.load(Ordering::SeqCst), 1);

    queue.enqueue("second");

    assert!(matches!(next_event(&mut rx).await, TurnEvent::PlaybackQueueDrained));
    assert_eq!(journal.count("play"), 2);
    assert_eq!(output.max_concurrent.load(Ordering::SeqCst), 1);

    assert_quiet(&mut rx).await;
}

#[tokio::test(start_paused = true)]
async fn test_empty_text_is_not_spoken() {
    let journal = Journal::default();
    let (queue, _output, mut rx) = speech_queue(&journal, &[]);

    queue.enqueue("");
    queue.enqueue("   ");
    assert!(!queue.is_speaking());

    assert_quiet(&mut rx).await;
    assert!(journal.entries().is_empty());
}
