//! WAV container encode/decode using hound
//!
//! All clips exchanged on the chat bus use a single format: mono 16-bit
//! signed little-endian PCM behind the standard 44-byte RIFF/WAVE header.
//! Decoding is more permissive and accepts whatever hound can parse,
//! downmixing to mono and normalizing to f32 in [-1, 1].

use std::io::Cursor;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::error::{AudioError, AudioResult};

/// Sample rate used for locally produced clips
pub const SAMPLE_RATE: u32 = 44_100;

/// Silence-rejection thresholds on a [-1, 1] normalized scale
const MIN_MEAN_AMPLITUDE: f32 = 0.001;
const MIN_PEAK_AMPLITUDE: f32 = 0.01;

fn pcm16_mono_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Encode normalized f32 samples into a WAV container.
///
/// Samples are clipped to [-1, 1] before quantizing to i16.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> AudioResult<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    let mut writer = WavWriter::new(&mut cursor, pcm16_mono_spec(sample_rate))
        .map_err(|e| AudioError::Unknown(e.to_string()))?;

    for &sample in samples {
        let clipped = sample.clamp(-1.0, 1.0);
        writer
            .write_sample((clipped * i16::MAX as f32) as i16)
            .map_err(|e| AudioError::Unknown(e.to_string()))?;
    }

    writer
        .finalize()
        .map_err(|e| AudioError::Unknown(e.to_string()))?;

    Ok(cursor.into_inner())
}

/// Decode a WAV container into mono normalized f32 samples and its rate.
pub fn decode_wav(bytes: &[u8]) -> AudioResult<(Vec<f32>, u32)> {
    let reader = WavReader::new(Cursor::new(bytes)).map_err(decode_error)?;

    let spec = reader.spec();
    let sample_rate = spec.sample_rate;
    let channels = spec.channels as usize;

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(decode_error)?,
        SampleFormat::Int => {
            let bits = spec.bits_per_sample;
            let max_value = (1u32 << (bits - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_value))
                .collect::<Result<Vec<_>, _>>()
                .map_err(decode_error)?
        }
    };

    // Downmix to a single channel for analysis and playback
    let mono = if channels > 1 {
        samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    } else {
        samples
    };

    Ok((mono, sample_rate))
}

fn decode_error(e: hound::Error) -> AudioError {
    match e {
        hound::Error::Unsupported => {
            AudioError::FormatUnsupported("codec or sample layout not supported".into())
        }
        other => AudioError::Decode(other.to_string()),
    }
}

/// Silence-rejection check over a finished container.
///
/// Accepts only if the mean absolute amplitude exceeds 0.001 and the peak
/// absolute amplitude exceeds 0.01. A container that fails to decode is
/// rejected, not treated as fatal.
pub fn validate_audio(bytes: &[u8]) -> bool {
    let (samples, _rate) = match decode_wav(bytes) {
        Ok(decoded) => decoded,
        Err(e) => {
            log::warn!("audio validation failed to decode: {}", e);
            return false;
        }
    };

    if samples.is_empty() {
        return false;
    }

    let mut sum = 0.0f64;
    let mut peak = 0.0f32;
    for &sample in &samples {
        let amplitude = sample.abs();
        sum += amplitude as f64;
        peak = peak.max(amplitude);
    }
    let mean = (sum / samples.len() as f64) as f32;

    mean > MIN_MEAN_AMPLITUDE && peak > MIN_PEAK_AMPLITUDE
}

/// Duration of a sample buffer in seconds
pub fn duration_seconds(sample_count: usize, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    sample_count as f64 / sample_rate as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u32_at(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    fn u16_at(bytes: &[u8], offset: usize) -> u16 {
        u16::from_le_bytes(bytes[offset..offset + 2].try_into().unwrap())
    }

    #[test]
    fn encode_writes_canonical_header() {
        let samples = vec![0.5f32; 441];
        let bytes = encode_wav(&samples, SAMPLE_RATE).unwrap();

        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(&bytes[12..16], b"fmt ");
        assert_eq!(u32_at(&bytes, 16), 16); // fmt chunk size
        assert_eq!(u16_at(&bytes, 20), 1); // PCM
        assert_eq!(u16_at(&bytes, 22), 1); // mono
        assert_eq!(u32_at(&bytes, 24), SAMPLE_RATE);
        assert_eq!(u32_at(&bytes, 28), SAMPLE_RATE * 2); // byte rate
        assert_eq!(u16_at(&bytes, 32), 2); // block align
        assert_eq!(u16_at(&bytes, 34), 16); // bits per sample
        assert_eq!(&bytes[36..40], b"data");
        assert_eq!(u32_at(&bytes, 40), 441 * 2);
        assert_eq!(u32_at(&bytes, 4), 36 + 441 * 2);
        assert_eq!(bytes.len(), 44 + 441 * 2);
    }

    #[test]
    fn roundtrip_preserves_samples() {
        let samples = vec![0.0, 0.25, -0.25, 0.9, -0.9, 1.5, -1.5];
        let bytes = encode_wav(&samples, SAMPLE_RATE).unwrap();
        let (decoded, rate) = decode_wav(&bytes).unwrap();

        assert_eq!(rate, SAMPLE_RATE);
        assert_eq!(decoded.len(), samples.len());
        for (got, want) in decoded.iter().zip([0.0, 0.25, -0.25, 0.9, -0.9, 1.0, -1.0]) {
            assert!((got - want).abs() < 0.001, "got {} want {}", got, want);
        }
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            decode_wav(b"not a wav file at all"),
            Err(AudioError::Decode(_))
        ));
        assert!(decode_wav(&[]).is_err());
    }

    #[test]
    fn silence_is_rejected() {
        let silent = vec![0.0f32; 44_100];
        let bytes = encode_wav(&silent, SAMPLE_RATE).unwrap();
        assert!(!validate_audio(&bytes));
    }

    #[test]
    fn audible_signal_is_accepted() {
        // Peak well above 0.01 and mean well above 0.001
        let samples: Vec<f32> = (0..44_100)
            .map(|i| 0.5 * (i as f32 * 0.05).sin())
            .collect();
        let bytes = encode_wav(&samples, SAMPLE_RATE).unwrap();
        assert!(validate_audio(&bytes));
    }

    #[test]
    fn barely_audible_peak_alone_is_rejected() {
        // One loud sample in a long silent buffer: peak passes, mean fails
        let mut samples = vec![0.0f32; 44_100];
        samples[100] = 0.5;
        let bytes = encode_wav(&samples, SAMPLE_RATE).unwrap();
        assert!(!validate_audio(&bytes));
    }

    #[test]
    fn corrupt_container_is_rejected_not_fatal() {
        assert!(!validate_audio(b"RIFFxxxxWAVE"));
        assert!(!validate_audio(&[]));
    }

    #[test]
    fn duration_helper() {
        assert_eq!(duration_seconds(44_100, 44_100), 1.0);
        assert_eq!(duration_seconds(22_050, 44_100), 0.5);
        assert_eq!(duration_seconds(100, 0), 0.0);
    }
}
