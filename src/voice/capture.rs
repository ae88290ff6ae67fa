//! Audio capture from microphone

use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// A source of mono f32 samples
///
/// Implementations buffer audio while open; [`AudioInput::drain`] hands the
/// samples captured since the previous drain to the caller.
pub trait AudioInput: Send {
    /// Open the device and start buffering
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened
    fn open(&mut self) -> Result<()>;

    /// Stop buffering and release the device
    fn close(&mut self);

    /// Take everything buffered since the last call
    fn drain(&mut self) -> Vec<f32>;

    /// Check if the device is open
    fn is_open(&self) -> bool;

    /// Sample rate of drained audio
    fn sample_rate(&self) -> u32;

    /// Channel count of drained audio
    fn channels(&self) -> u16 {
        1
    }
}

/// Captures audio from the default input device
///
/// cpal streams are not `Send`, so the stream lives on its own thread for as
/// long as the input is open and writes into a shared buffer.
pub struct MicInput {
    config: StreamConfig,
    buffer: Arc<Mutex<Vec<f32>>>,
    worker: Option<(mpsc::Sender<()>, JoinHandle<()>)>,
}

impl MicInput {
    /// Create a new microphone input
    ///
    /// # Errors
    ///
    /// Returns error if no suitable input device exists
    pub fn new(sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
            .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(sample_rate))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels = config.channels,
            "microphone input initialized"
        );

        Ok(Self {
            config,
            buffer: Arc::new(Mutex::new(Vec::new())),
            worker: None,
        })
    }
}

impl AudioInput for MicInput {
    fn open(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }

        let buffer = Arc::clone(&self.buffer);
        let config = self.config.clone();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<()>>(1);

        let handle = std::thread::spawn(move || {
            let stream = match build_stream(&config, buffer) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));

            // Block until closed; dropping the stream frees the device
            let _ = stop_rx.recv();
            drop(stream);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some((stop_tx, handle));
                tracing::debug!("microphone opened");
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(Error::Audio("capture thread exited during startup".to_string()))
            }
        }
    }

    fn close(&mut self) {
        if let Some((stop_tx, handle)) = self.worker.take() {
            let _ = stop_tx.send(());
            if handle.join().is_err() {
                tracing::error!("capture thread panicked");
            }
            tracing::debug!("microphone closed");
        }
    }

    fn drain(&mut self) -> Vec<f32> {
        let mut buf = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *buf)
    }

    fn is_open(&self) -> bool {
        self.worker.is_some()
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }
}

impl Drop for MicInput {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_stream(config: &StreamConfig, buffer: Arc<Mutex<Vec<f32>>>) -> Result<cpal::Stream> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device".to_string()))?;

    let stream = device
        .build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend_from_slice(data);
                }
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok(stream)
}

/// Mean absolute amplitude of a window of samples
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn mean_abs_amplitude(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    samples.iter().map(|s| s.abs()).sum::<f32>() / samples.len() as f32
}

/// RMS energy of a window of samples
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32, channels: u16) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amplitude_measures() {
        let silence = vec![0.0f32; 100];
        assert!(mean_abs_amplitude(&silence) < 0.001);
        assert!(rms_energy(&silence) < 0.001);

        let alternating: Vec<f32> = (0..100)
            .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        assert!((mean_abs_amplitude(&alternating) - 0.5).abs() < 1e-6);
        assert!(rms_energy(&alternating) > 0.4);

        assert!(mean_abs_amplitude(&[]) < f32::EPSILON);
    }

    #[test]
    fn test_samples_to_wav_header() {
        let wav = samples_to_wav(&[0.0, 0.5, -0.5], SAMPLE_RATE, 1).unwrap();

        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(wav.len(), 44 + 3 * 2);
    }
}
