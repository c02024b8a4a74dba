//! Fixed audio format for the call pipeline
//!
//! All inbound and outbound transport audio is 48 kHz interleaved stereo
//! signed 16-bit little-endian PCM. Transcription consumes 16 kHz mono WAV.

use crate::{Error, Result};

/// Transport sample rate in Hz
pub const SAMPLE_RATE: u32 = 48_000;

/// Transport channel count (interleaved stereo)
pub const CHANNELS: u16 = 2;

/// Bytes per sample (s16le)
pub const BYTES_PER_SAMPLE: usize = 2;

/// Byte rate of the transport format per millisecond:
/// 48000 samples × 2 channels × 2 bytes / 1000
pub const BYTES_PER_MS: usize =
    SAMPLE_RATE as usize * CHANNELS as usize * BYTES_PER_SAMPLE / 1000;

/// Sample rate expected by transcription collaborators
pub const STT_SAMPLE_RATE: u32 = 16_000;

/// Convert a millisecond duration to a byte count at the transport byte rate
#[must_use]
pub const fn ms_to_bytes(ms: u64) -> usize {
    ms as usize * BYTES_PER_MS
}

/// Audio formats moved between the transport and the collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    /// 48 kHz stereo s16le raw PCM (transport native)
    Pcm48kStereo,
    /// 16 kHz mono s16le in a WAV container (transcription input)
    Wav16kMono,
    /// Compressed synthesis output (collaborator native, typically MP3)
    Mp3,
}

impl AudioFormat {
    /// Short name used in logs and converter arguments
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Pcm48kStereo => "pcm-48k-stereo",
            Self::Wav16kMono => "wav-16k-mono",
            Self::Mp3 => "mp3",
        }
    }
}

/// Compute RMS energy of an s16le PCM chunk, normalized to [0, 1]
/// by the maximum sample magnitude.
///
/// Chunks shorter than one sample have zero energy (never voiced).
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms_energy(pcm: &[u8]) -> f32 {
    let sample_count = pcm.len() / BYTES_PER_SAMPLE;
    if sample_count == 0 {
        return 0.0;
    }

    let mut sum_squares = 0.0f64;
    for pair in pcm.chunks_exact(BYTES_PER_SAMPLE) {
        let sample = f64::from(i16::from_le_bytes([pair[0], pair[1]]));
        sum_squares += sample * sample;
    }

    ((sum_squares / sample_count as f64).sqrt() / f64::from(i16::MAX)) as f32
}

/// Encode s16le PCM bytes into a WAV container for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn pcm_to_wav(pcm: &[u8], sample_rate: u32, channels: u16) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| Error::Conversion(e.to_string()))?;

        for pair in pcm.chunks_exact(BYTES_PER_SAMPLE) {
            writer
                .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                .map_err(|e| Error::Conversion(e.to_string()))?;
        }

        writer
            .finalize()
            .map_err(|e| Error::Conversion(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_has_zero_energy() {
        let silence = vec![0u8; 960];
        assert!(rms_energy(&silence) < 0.0001);
    }

    #[test]
    fn full_scale_square_wave_has_unit_energy() {
        let mut pcm = Vec::new();
        for _ in 0..480 {
            pcm.extend_from_slice(&i16::MAX.to_le_bytes());
        }
        let energy = rms_energy(&pcm);
        assert!((energy - 1.0).abs() < 0.001);
    }

    #[test]
    fn sub_sample_chunk_is_never_voiced() {
        assert_eq!(rms_energy(&[0xFF]), 0.0);
        assert_eq!(rms_energy(&[]), 0.0);
    }

    #[test]
    fn byte_rate_matches_fixed_format() {
        assert_eq!(BYTES_PER_MS, 192);
        assert_eq!(ms_to_bytes(300), 57_600);
    }

    #[test]
    fn wav_header_is_valid() {
        let pcm = vec![0u8; 320];
        let wav = pcm_to_wav(&pcm, STT_SAMPLE_RATE, 1).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert!(wav.len() > 44);
    }
}
