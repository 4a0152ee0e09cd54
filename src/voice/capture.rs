//! Audio capture from microphone

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};

use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Samples per wake scoring frame (80ms at 16kHz)
pub const FRAME_SAMPLES: usize = 1280;

/// How often `read` polls the capture buffer
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A device stream that delivers nothing for this long is treated as failed
const STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// A mono 16kHz audio source
///
/// Only one capture phase may hold the device at a time; phases borrow it
/// mutably through [`CaptureGuard`], which closes it again on drop.
#[async_trait(?Send)]
pub trait Microphone {
    /// Start delivering audio
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be started
    fn open(&mut self) -> Result<()>;

    /// Wait for the next `samples` samples
    ///
    /// # Errors
    ///
    /// Returns error if the device stops delivering audio
    async fn read(&mut self, samples: usize) -> Result<Vec<f32>>;

    /// Stop delivering audio and drop anything buffered
    fn close(&mut self);
}

/// Exclusive, scoped use of a [`Microphone`]
///
/// The device is opened on construction and closed when the guard drops, so
/// every exit path of a capture phase releases it.
pub struct CaptureGuard<'a> {
    mic: &'a mut dyn Microphone,
}

impl<'a> CaptureGuard<'a> {
    /// Open the microphone for one capture phase
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened
    pub fn open(mic: &'a mut dyn Microphone) -> Result<Self> {
        mic.open()?;
        Ok(Self { mic })
    }

    /// Read the next `samples` samples
    ///
    /// # Errors
    ///
    /// Returns error if the device stops delivering audio
    pub async fn read(&mut self, samples: usize) -> Result<Vec<f32>> {
        self.mic.read(samples).await
    }
}

impl Drop for CaptureGuard<'_> {
    fn drop(&mut self) {
        self.mic.close();
    }
}

/// Captures audio from the default input device
pub struct AudioCapture {
    config: StreamConfig,
    buffer: Arc<Mutex<Vec<f32>>>,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Create a new audio capture instance
    ///
    /// # Errors
    ///
    /// Returns error if no input device supports mono 16kHz capture
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            config,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream: None,
        })
    }

    /// Start capturing audio
    ///
    /// # Errors
    ///
    /// Returns error if capture fails
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let buffer = Arc::clone(&self.buffer);
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device".to_string()))?;

        let stream = device
            .build_input_stream(
                &self.config,
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
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    /// Stop capturing audio
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }

    /// Get captured audio buffer without clearing
    #[must_use]
    pub fn peek_buffer(&self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|buf| buf.clone())
            .unwrap_or_default()
    }

    /// Clear the audio buffer
    pub fn clear_buffer(&self) {
        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    /// Take up to `samples` samples from the front of the buffer
    fn drain_front(&self, samples: usize) -> Option<Vec<f32>> {
        let mut buf = self.buffer.lock().ok()?;
        if buf.len() < samples {
            return None;
        }
        Some(buf.drain(..samples).collect())
    }

    fn buffered(&self) -> usize {
        self.buffer.lock().map(|b| b.len()).unwrap_or_default()
    }
}

#[async_trait(?Send)]
impl Microphone for AudioCapture {
    fn open(&mut self) -> Result<()> {
        self.clear_buffer();
        self.start()
    }

    async fn read(&mut self, samples: usize) -> Result<Vec<f32>> {
        if !self.is_capturing() {
            return Err(Error::Audio("capture not started".to_string()));
        }

        let mut last_len = self.buffered();
        let mut stalled_for = Duration::ZERO;

        loop {
            if let Some(chunk) = self.drain_front(samples) {
                return Ok(chunk);
            }

            tokio::time::sleep(POLL_INTERVAL).await;

            let len = self.buffered();
            if len == last_len {
                stalled_for += POLL_INTERVAL;
                if stalled_for >= STALL_TIMEOUT {
                    return Err(Error::Audio("input device stopped delivering audio".to_string()));
                }
            } else {
                stalled_for = Duration::ZERO;
                last_len = len;
            }
        }
    }

    fn close(&mut self) {
        self.stop();
        self.clear_buffer();
    }
}

/// Calculate RMS energy of audio samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Number of samples covering `duration` at [`SAMPLE_RATE`]
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn samples_for(duration: Duration) -> usize {
    (duration.as_secs_f64() * f64::from(SAMPLE_RATE)).round() as usize
}

fn wav_spec(sample_rate: u32) -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// Convert f32 [-1.0, 1.0] to i16
#[allow(clippy::cast_possible_truncation)]
fn to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, wav_spec(sample_rate))
            .map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(to_i16(sample))
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// Write WAV bytes to the scratch file, replacing any previous capture
///
/// # Errors
///
/// Returns error if the file cannot be written
pub fn write_scratch(path: &Path, wav: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, wav)?;
    tracing::trace!(path = %path.display(), bytes = wav.len(), "scratch audio written");
    Ok(())
}
