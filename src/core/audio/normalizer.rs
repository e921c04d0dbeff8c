//! Decodes arbitrary uploaded audio into mono 16-bit little-endian PCM at a
//! target sample rate.
//!
//! WAV containers are parsed directly; anything else goes through an
//! external `ffmpeg` decode that emits a canonical WAV, which re-enters the
//! same pipeline. Malformed input never propagates an error past this
//! module: it yields an empty buffer at the target rate and a warning.

use std::io::Cursor;
use std::path::Path;

use hound::{SampleFormat, WavReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Sample rate used when the caller does not specify one.
pub const DEFAULT_TARGET_RATE: u32 = 16000;

/// Container type detected from magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    Wav,
    Mp3,
    Ogg,
    Flac,
    Unknown,
}

impl ContainerFormat {
    pub fn detect(bytes: &[u8]) -> Self {
        if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WAVE" {
            Self::Wav
        } else if bytes.starts_with(b"ID3") || bytes.starts_with(&[0xFF, 0xFB]) {
            Self::Mp3
        } else if bytes.starts_with(b"OggS") {
            Self::Ogg
        } else if bytes.starts_with(b"fLaC") {
            Self::Flac
        } else {
            Self::Unknown
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
            Self::Ogg => "ogg",
            Self::Flac => "flac",
            Self::Unknown => "unknown",
        }
    }
}

/// Best-effort description of an audio payload, for progress reporting.
#[derive(Debug, Clone)]
pub struct AudioProbe {
    pub size: usize,
    pub format: ContainerFormat,
    pub channels: u16,
    pub sample_rate: u32,
    pub duration_secs: f64,
}

/// Inspect a payload without decoding it. Only WAV yields stream details.
pub fn probe(bytes: &[u8]) -> AudioProbe {
    let format = ContainerFormat::detect(bytes);
    let mut info = AudioProbe {
        size: bytes.len(),
        format,
        channels: 0,
        sample_rate: 0,
        duration_secs: 0.0,
    };

    if format == ContainerFormat::Wav {
        if let Ok(reader) = WavReader::new(Cursor::new(bytes)) {
            let spec = reader.spec();
            info.channels = spec.channels;
            info.sample_rate = spec.sample_rate;
            info.duration_secs = reader.duration() as f64 / spec.sample_rate as f64;
        }
    }
    info
}

/// Normalized decode result.
#[derive(Debug, Clone)]
pub struct NormalizedAudio {
    /// Mono 16-bit little-endian PCM.
    pub pcm: Vec<u8>,
    pub sample_rate: u32,
}

#[derive(Debug, thiserror::Error)]
enum NormalizeError {
    #[error("WAV parse error: {0}")]
    Wav(#[from] hound::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("External decode failed: {0}")]
    Decode(String),
}

/// Decode `bytes` into mono 16-bit PCM at `target_rate`.
///
/// The filename hint only matters for the external decode path, where the
/// extension helps the decoder pick a demuxer.
pub async fn normalize(bytes: &[u8], filename: &str, target_rate: u32) -> NormalizedAudio {
    info!(
        "Normalizing {} bytes of audio (hint: {:?}, target: {}Hz)",
        bytes.len(),
        filename,
        target_rate
    );

    match try_normalize(bytes, filename, target_rate).await {
        Ok(audio) => {
            debug!(
                "Normalized to {} bytes of PCM at {}Hz",
                audio.pcm.len(),
                audio.sample_rate
            );
            audio
        }
        Err(e) => {
            warn!("Audio normalization failed, yielding empty buffer: {}", e);
            NormalizedAudio {
                pcm: Vec::new(),
                sample_rate: target_rate,
            }
        }
    }
}

async fn try_normalize(
    bytes: &[u8],
    filename: &str,
    target_rate: u32,
) -> Result<NormalizedAudio, NormalizeError> {
    match ContainerFormat::detect(bytes) {
        ContainerFormat::Wav => decode_wav(bytes, target_rate),
        other => {
            debug!("Handing {} container to external decoder", other.label());
            let wav = decode_with_ffmpeg(bytes, filename, target_rate).await?;
            decode_wav(&wav, target_rate)
        }
    }
}

fn decode_wav(bytes: &[u8], target_rate: u32) -> Result<NormalizedAudio, NormalizeError> {
    let reader = WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    debug!(
        "WAV stream: {} channels, {} bit {:?}, {}Hz",
        spec.channels, spec.bits_per_sample, spec.sample_format, spec.sample_rate
    );

    // Widened samples already scaled into the 16-bit range
    let scaled: Vec<i32> = match spec.sample_format {
        SampleFormat::Int => {
            let bits = spec.bits_per_sample;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| scale_to_16bit(v, bits)))
                .collect::<Result<_, _>>()?
        }
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * 32767.0) as i32))
            .collect::<Result<_, _>>()?,
    };

    let mono = downmix(&scaled, spec.channels.max(1));
    let clamped: Vec<i16> = mono
        .into_iter()
        .map(|s| s.clamp(i16::MIN as i32, i16::MAX as i32) as i16)
        .collect();

    let resampled = resample_linear(&clamped, spec.sample_rate, target_rate);

    let mut pcm = Vec::with_capacity(resampled.len() * 2);
    for sample in resampled {
        pcm.extend_from_slice(&sample.to_le_bytes());
    }

    Ok(NormalizedAudio {
        pcm,
        sample_rate: target_rate,
    })
}

/// Bring a raw integer sample of the given bit depth into the 16-bit range.
/// 8-bit input arrives already centered (signed) from the WAV reader.
fn scale_to_16bit(sample: i32, bits: u16) -> i32 {
    match bits {
        8 => sample * 256,
        16 => sample,
        24 => sample / 256,
        32 => sample / 65536,
        _ => sample,
    }
}

/// Average all channels per sample frame.
fn downmix(samples: &[i32], channels: u16) -> Vec<i32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let channels = channels as usize;
    samples
        .chunks(channels)
        .map(|frame| frame.iter().map(|s| *s as i64).sum::<i64>() / frame.len() as i64)
        .map(|s| s as i32)
        .collect()
}

/// Linear-interpolation resampler for mono 16-bit samples.
///
/// For each output index the source position is `i / (to/from)`; the two
/// bracketing source samples are interpolated, and positions past the end
/// clamp to the last sample. Equal rates return the input unchanged.
pub fn resample_linear(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let out_len = (samples.len() as f64 * ratio) as usize;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 / ratio;
            let index = pos as usize;
            if index >= samples.len() - 1 {
                samples[samples.len() - 1]
            } else {
                let t = pos - index as f64;
                (samples[index] as f64 * (1.0 - t) + samples[index + 1] as f64 * t) as i16
            }
        })
        .collect()
}

/// Decode a non-WAV container by shelling out to `ffmpeg`, the external
/// decode collaborator, and return the canonical WAV bytes it produces.
async fn decode_with_ffmpeg(
    bytes: &[u8],
    filename: &str,
    target_rate: u32,
) -> Result<Vec<u8>, NormalizeError> {
    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin");
    let stem = uuid::Uuid::new_v4();
    let input_path = std::env::temp_dir().join(format!("voxrelay-{stem}.{extension}"));
    let output_path = std::env::temp_dir().join(format!("voxrelay-{stem}.wav"));

    tokio::fs::write(&input_path, bytes).await?;

    let result = Command::new("ffmpeg")
        .arg("-i")
        .arg(&input_path)
        .args(["-ar", &target_rate.to_string(), "-ac", "1", "-f", "wav", "-y"])
        .arg(&output_path)
        .output()
        .await;

    let wav = match result {
        Ok(output) if output.status.success() => {
            tokio::fs::read(&output_path).await.map_err(Into::into)
        }
        Ok(output) => Err(NormalizeError::Decode(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        )),
        Err(e) => Err(NormalizeError::Decode(format!("ffmpeg not runnable: {e}"))),
    };

    let _ = tokio::fs::remove_file(&input_path).await;
    let _ = tokio::fs::remove_file(&output_path).await;

    wav
}
