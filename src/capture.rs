use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{Arc, Mutex};

/// Target capture rate for voice samples.
pub const TARGET_SAMPLE_RATE: u32 = 16000;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CaptureError {
    #[error("Microphone access denied: {0}")]
    PermissionDenied(String),
    #[error("No input device found")]
    NoDevice,
    #[error("Audio stream error: {0}")]
    Stream(String),
}

impl CaptureError {
    /// Backends report permission problems as free-form text.
    fn classify(message: String) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized") {
            Self::PermissionDenied(message)
        } else {
            Self::Stream(message)
        }
    }
}

/// A live capture. Dropping it releases the device.
pub trait CaptureStream {
    fn sample_rate(&self) -> u32;
    /// Take every mono sample captured since the last drain.
    fn drain(&mut self) -> Vec<f32>;
}

/// Something that can hand out a capture stream, possibly after asking the
/// user for permission.
#[async_trait(?Send)]
pub trait CaptureDevice {
    async fn open(&self) -> Result<Box<dyn CaptureStream>, CaptureError>;
}

/// The default cpal input device.
#[derive(Debug, Default, Clone, Copy)]
pub struct Microphone;

struct MicrophoneStream {
    // held for its Drop: stops the capture
    _stream: cpal::Stream,
    buffer: Arc<Mutex<Vec<f32>>>,
    sample_rate: u32,
}

impl CaptureStream for MicrophoneStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn drain(&mut self) -> Vec<f32> {
        let mut buf = self.buffer.lock().unwrap_or_else(|p| p.into_inner());
        std::mem::take(&mut *buf)
    }
}

impl Drop for MicrophoneStream {
    fn drop(&mut self) {
        log::debug!("Releasing input device");
    }
}

#[async_trait(?Send)]
impl CaptureDevice for Microphone {
    async fn open(&self) -> Result<Box<dyn CaptureStream>, CaptureError> {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let (stream, sample_rate) = start_capture(buffer.clone())?;
        Ok(Box::new(MicrophoneStream {
            _stream: stream,
            buffer,
            sample_rate,
        }))
    }
}

/// Start capturing audio from the default input device.
/// Samples are appended to the shared buffer at ~16kHz mono f32.
/// Drop the returned `Stream` to stop recording.
fn start_capture(buffer: Arc<Mutex<Vec<f32>>>) -> Result<(cpal::Stream, u32), CaptureError> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or(CaptureError::NoDevice)?;

    log::info!("Input device: {:?}", device.description());

    let supported_configs: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| CaptureError::classify(e.to_string()))?
        .collect();

    let desired = supported_configs.iter().find(|c| {
        c.channels() == 1
            && c.min_sample_rate() <= TARGET_SAMPLE_RATE
            && c.max_sample_rate() >= TARGET_SAMPLE_RATE
            && c.sample_format() == cpal::SampleFormat::F32
    });

    let (config, native_rate, downsample_factor) = if let Some(cfg) = desired {
        let config = cfg.with_sample_rate(TARGET_SAMPLE_RATE).config();
        (config, TARGET_SAMPLE_RATE, 1usize)
    } else {
        // Fall back to default config, decimate in the callback
        let default_config = device
            .default_input_config()
            .map_err(|e| CaptureError::classify(e.to_string()))?;
        let rate = default_config.sample_rate();
        let factor = (rate / TARGET_SAMPLE_RATE).max(1) as usize;
        let actual_rate = rate / factor as u32;
        log::info!("Using native rate {rate}Hz, downsampling by {factor}x to ~{actual_rate}Hz");
        (default_config.config(), actual_rate, factor)
    };

    let channels = (config.channels as usize).max(1);

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mut buf = buffer.lock().unwrap_or_else(|p| p.into_inner());
                for (i, chunk) in data.chunks(channels).enumerate() {
                    if i % downsample_factor == 0 {
                        buf.push(chunk.iter().sum::<f32>() / channels as f32);
                    }
                }
            },
            |err| log::error!("Input stream error: {err}"),
            None,
        )
        .map_err(|e| CaptureError::classify(e.to_string()))?;

    stream
        .play()
        .map_err(|e| CaptureError::classify(e.to_string()))?;
    Ok((stream, native_rate))
}

/// Convert f32 samples to WAV bytes (mono 16-bit PCM).
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
    for &s in samples {
        let clamped = s.clamp(-1.0, 1.0);
        writer.write_sample((clamped * i16::MAX as f32) as i16)?;
    }
    writer.finalize()?;
    Ok(cursor.into_inner())
}

/// RMS of the last `window` samples.
pub fn rms(samples: &[f32], window: usize) -> f32 {
    let n = samples.len().min(window);
    if n == 0 {
        return 0.0;
    }
    let tail = &samples[samples.len() - n..];
    let sum_sq: f32 = tail.iter().map(|&s| s * s).sum();
    (sum_sq / n as f32).sqrt()
}

/// Guess a MIME type for an audio file from its extension.
pub fn audio_mime(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "flac" => "audio/flac",
        "ogg" | "opus" => "audio/ogg",
        "webm" => "audio/webm",
        "m4a" | "mp4" => "audio/mp4",
        _ => "application/octet-stream",
    }
}
