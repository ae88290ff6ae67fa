//! Audio playback to speakers

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use crate::{Error, Result};

/// Decoded audio ready for an output device
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    /// Interleaved f32 samples
    pub samples: Vec<f32>,
    /// Channel count
    pub channels: u16,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioClip {
    /// Playing time of the clip
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn duration(&self) -> Duration {
        let frames = self.samples.len() / usize::from(self.channels.max(1));
        Duration::from_secs_f64(frames as f64 / f64::from(self.sample_rate.max(1)))
    }

    /// Downmix to mono
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn into_mono(self) -> Vec<f32> {
        if self.channels <= 1 {
            return self.samples;
        }
        let channels = usize::from(self.channels);
        self.samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    }
}

/// Plays decoded audio to completion
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Play the clip, returning once it has finished
    ///
    /// # Errors
    ///
    /// Returns error if the device fails
    async fn play(&self, clip: AudioClip) -> Result<()>;
}

/// Plays audio to the default output device
pub struct SpeakerOutput {
    device_name: String,
}

impl SpeakerOutput {
    /// Check that an output device exists
    ///
    /// # Errors
    ///
    /// Returns error if no audio output device is available
    pub fn new() -> Result<Self> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;
        let device_name = device.name().unwrap_or_default();

        tracing::debug!(device = %device_name, "audio playback initialized");
        Ok(Self { device_name })
    }

    /// Output device name
    #[must_use]
    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

#[async_trait]
impl AudioOutput for SpeakerOutput {
    async fn play(&self, clip: AudioClip) -> Result<()> {
        tokio::task::spawn_blocking(move || play_blocking(clip))
            .await
            .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
    }
}

/// Play a clip synchronously on the calling thread
fn play_blocking(clip: AudioClip) -> Result<()> {
    if clip.samples.is_empty() {
        return Ok(());
    }

    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device".to_string()))?;

    let sample_rate = clip.sample_rate;
    let supported_config = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter(|c| {
            c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .min_by_key(|c| c.channels())
        .ok_or_else(|| Error::Audio(format!("no output config for {sample_rate} Hz")))?;

    let config: StreamConfig = supported_config
        .with_sample_rate(SampleRate(sample_rate))
        .config();
    let out_channels = usize::from(config.channels);

    let duration = clip.duration();
    let samples: Arc<[f32]> = clip.into_mono().into();
    let position = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));

    let stream = {
        let samples = Arc::clone(&samples);
        let position = Arc::clone(&position);
        let finished = Arc::clone(&finished);

        device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(out_channels) {
                        let pos = position.load(Ordering::Relaxed);
                        let sample = samples.get(pos).copied().unwrap_or_else(|| {
                            finished.store(true, Ordering::Relaxed);
                            0.0
                        });
                        frame.fill(sample);
                        if pos < samples.len() {
                            position.store(pos + 1, Ordering::Relaxed);
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?
    };

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    // Poll for completion with timeout
    let start = std::time::Instant::now();
    let timeout = duration + Duration::from_millis(500);
    while !finished.load(Ordering::Relaxed) {
        if start.elapsed() > timeout {
            tracing::warn!(?duration, "playback did not finish in time");
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    // Let the device flush its last buffer
    std::thread::sleep(Duration::from_millis(100));

    drop(stream);
    tracing::debug!(samples = samples.len(), "playback complete");
    Ok(())
}

/// Decode synthesized audio (WAV or MP3)
///
/// # Errors
///
/// Returns error if the bytes are neither valid WAV nor MP3
pub fn decode_audio(bytes: &[u8]) -> Result<AudioClip> {
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
        decode_wav(bytes)
    } else {
        decode_mp3(bytes)
    }
}

#[allow(clippy::cast_precision_loss)]
fn decode_wav(bytes: &[u8]) -> Result<AudioClip> {
    let mut reader =
        hound::WavReader::new(Cursor::new(bytes)).map_err(|e| Error::Audio(e.to_string()))?;
    let spec = reader.spec();

    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>(),
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / scale))
                .collect::<std::result::Result<Vec<_>, _>>()
        }
    }
    .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?;

    Ok(AudioClip {
        samples,
        channels: spec.channels,
        sample_rate: spec.sample_rate,
    })
}

/// Decode MP3 bytes to f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<AudioClip> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut format = None;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let frame_format = (frame.channels as u16, frame.sample_rate as u32);
                format.get_or_insert(frame_format);
                samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    let (channels, sample_rate) =
        format.ok_or_else(|| Error::Audio("no audio frames in MP3 data".to_string()))?;

    Ok(AudioClip {
        samples,
        channels,
        sample_rate,
    })
}
