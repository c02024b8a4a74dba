//! Audio format conversion between the transport and the collaborators
//!
//! Two implementations of the converter contract: an ffmpeg subprocess pipe
//! with a hard timeout (the worst-case pipeline stall bound), and a native
//! fallback built on minimp3 + rubato + hound for hosts without ffmpeg.

use std::io::Cursor;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::audio::{AudioFormat, BYTES_PER_SAMPLE, SAMPLE_RATE, STT_SAMPLE_RATE, pcm_to_wav};
use crate::{Error, Result};

/// Converts audio between the formats moved through the pipeline
#[async_trait]
pub trait FormatConverter: Send + Sync {
    /// Convert `audio` from `source` to `target` format
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conversion`] if the conversion fails or times out
    async fn convert(
        &self,
        audio: &[u8],
        source: AudioFormat,
        target: AudioFormat,
    ) -> Result<Vec<u8>>;
}

/// ffmpeg subprocess converter
///
/// Pipes audio through `ffmpeg` stdin/stdout. Every invocation carries a
/// hard timeout; on expiry the subprocess is killed and the conversion fails.
pub struct FfmpegConverter {
    binary: PathBuf,
    timeout: Duration,
}

impl FfmpegConverter {
    /// Locate ffmpeg on `PATH` and build a converter
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conversion`] if no ffmpeg binary is found
    pub fn new(timeout: Duration) -> Result<Self> {
        let binary = which::which("ffmpeg")
            .map_err(|e| Error::Conversion(format!("ffmpeg not found: {e}")))?;
        tracing::debug!(binary = %binary.display(), "ffmpeg converter initialized");
        Ok(Self { binary, timeout })
    }

    /// Input/output ffmpeg arguments for a format
    fn format_args(format: AudioFormat) -> &'static [&'static str] {
        match format {
            AudioFormat::Pcm48kStereo => &["-f", "s16le", "-ar", "48000", "-ac", "2"],
            AudioFormat::Wav16kMono => &["-f", "wav", "-ar", "16000", "-ac", "1"],
            AudioFormat::Mp3 => &["-f", "mp3"],
        }
    }
}

#[async_trait]
impl FormatConverter for FfmpegConverter {
    async fn convert(
        &self,
        audio: &[u8],
        source: AudioFormat,
        target: AudioFormat,
    ) -> Result<Vec<u8>> {
        let mut command = tokio::process::Command::new(&self.binary);
        command
            .arg("-hide_banner")
            .args(["-loglevel", "error"])
            .args(Self::format_args(source))
            .args(["-i", "pipe:0"])
            .args(Self::format_args(target))
            .arg("pipe:1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = command
            .spawn()
            .map_err(|e| Error::Conversion(format!("failed to spawn ffmpeg: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Conversion("ffmpeg stdin unavailable".to_string()))?;

        // Feed stdin from a separate task so a full stdout pipe cannot
        // deadlock the write.
        let input = audio.to_vec();
        let writer = tokio::spawn(async move {
            let result = stdin.write_all(&input).await;
            drop(stdin);
            result
        });

        let output = tokio::time::timeout(self.timeout, child.wait_with_output()).await;
        let _ = writer.await;

        match output {
            Ok(Ok(output)) if output.status.success() => {
                tracing::trace!(
                    source = source.name(),
                    target = target.name(),
                    in_bytes = audio.len(),
                    out_bytes = output.stdout.len(),
                    "conversion complete"
                );
                Ok(output.stdout)
            }
            Ok(Ok(output)) => Err(Error::Conversion(format!(
                "ffmpeg exited with {}",
                output.status
            ))),
            Ok(Err(e)) => Err(Error::Conversion(format!("ffmpeg io error: {e}"))),
            Err(_) => {
                tracing::error!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "ffmpeg conversion timed out, killing subprocess"
                );
                Err(Error::Conversion("ffmpeg conversion timed out".to_string()))
            }
        }
    }
}

/// Pure-Rust converter: minimp3 decode, rubato resample, hound WAV encode
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeConverter;

impl NativeConverter {
    /// Downmix interleaved stereo s16le to mono f32, then resample to 16 kHz
    fn pcm_to_stt_wav(pcm: &[u8]) -> Result<Vec<u8>> {
        let mut mono = Vec::with_capacity(pcm.len() / (2 * BYTES_PER_SAMPLE));
        for frame in pcm.chunks_exact(2 * BYTES_PER_SAMPLE) {
            let left = f32::from(i16::from_le_bytes([frame[0], frame[1]]));
            let right = f32::from(i16::from_le_bytes([frame[2], frame[3]]));
            mono.push((left + right) / 2.0 / 32768.0);
        }

        let resampled = resample(&mono, SAMPLE_RATE as usize, STT_SAMPLE_RATE as usize)?;
        let bytes = samples_to_s16le(&resampled);
        pcm_to_wav(&bytes, STT_SAMPLE_RATE, 1)
    }

    /// Decode MP3, upmix to stereo, resample to the transport rate
    fn mp3_to_transport_pcm(mp3: &[u8]) -> Result<Vec<u8>> {
        let (samples, rate, channels) = decode_mp3(mp3)?;

        // Split interleaved samples into left/right, duplicating mono
        let (left, right): (Vec<f32>, Vec<f32>) = if channels == 2 {
            let left = samples.iter().step_by(2).copied().collect();
            let right = samples.iter().skip(1).step_by(2).copied().collect();
            (left, right)
        } else {
            (samples.clone(), samples)
        };

        let left = resample(&left, rate, SAMPLE_RATE as usize)?;
        let right = resample(&right, rate, SAMPLE_RATE as usize)?;

        let frames = left.len().min(right.len());
        let mut pcm = Vec::with_capacity(frames * 2 * BYTES_PER_SAMPLE);
        for i in 0..frames {
            pcm.extend_from_slice(&f32_to_i16(left[i]).to_le_bytes());
            pcm.extend_from_slice(&f32_to_i16(right[i]).to_le_bytes());
        }
        Ok(pcm)
    }
}

#[async_trait]
impl FormatConverter for NativeConverter {
    async fn convert(
        &self,
        audio: &[u8],
        source: AudioFormat,
        target: AudioFormat,
    ) -> Result<Vec<u8>> {
        match (source, target) {
            (AudioFormat::Pcm48kStereo, AudioFormat::Wav16kMono) => Self::pcm_to_stt_wav(audio),
            (AudioFormat::Mp3, AudioFormat::Pcm48kStereo) => Self::mp3_to_transport_pcm(audio),
            (source, target) => Err(Error::Conversion(format!(
                "unsupported conversion: {} -> {}",
                source.name(),
                target.name()
            ))),
        }
    }
}

/// Resample one channel of f32 samples between rates
fn resample(samples: &[f32], from_rate: usize, to_rate: usize) -> Result<Vec<f32>> {
    use rubato::Resampler;

    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    const CHUNK: usize = 1024;
    let mut resampler = rubato::FftFixedIn::<f32>::new(from_rate, to_rate, CHUNK, 2, 1)
        .map_err(|e| Error::Conversion(format!("resampler init failed: {e}")))?;

    let mut output = Vec::with_capacity(samples.len() * to_rate / from_rate + CHUNK);
    for chunk in samples.chunks(CHUNK) {
        // Zero-pad the final partial chunk to the fixed input size
        let frame: Vec<f32> = if chunk.len() == CHUNK {
            chunk.to_vec()
        } else {
            let mut padded = chunk.to_vec();
            padded.resize(CHUNK, 0.0);
            padded
        };

        let processed = resampler
            .process(&[frame], None)
            .map_err(|e| Error::Conversion(format!("resampling failed: {e}")))?;
        output.extend_from_slice(&processed[0]);
    }

    Ok(output)
}

/// Decode MP3 bytes into interleaved f32 samples plus rate/channel info
fn decode_mp3(mp3: &[u8]) -> Result<(Vec<f32>, usize, usize)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3));
    let mut samples = Vec::new();
    let mut rate = 0usize;
    let mut channels = 0usize;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if rate == 0 {
                    rate = frame.sample_rate as usize;
                    channels = frame.channels;
                }
                samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Conversion(format!("mp3 decode error: {e}"))),
        }
    }

    if rate == 0 || channels == 0 {
        return Err(Error::Conversion("mp3 stream contained no frames".to_string()));
    }

    Ok((samples, rate, channels))
}

fn samples_to_s16le(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for &sample in samples {
        bytes.extend_from_slice(&f32_to_i16(sample).to_le_bytes());
    }
    bytes
}

#[allow(clippy::cast_possible_truncation)]
fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}
