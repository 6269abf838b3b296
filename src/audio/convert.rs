// Stateless PCM format conversion for the wire path.
//
// Taps deliver whatever layout the hardware produces; the transcription
// service expects mono 16-bit PCM at a fixed rate. Conversion happens in a
// single pass per buffer: downmix to mono, then resample by linear
// interpolation so non-integer rate ratios (44.1kHz -> 16kHz) come out with
// the right frame count.

use crate::audio::types::{AudioFormat, AudioFrame};
use crate::error::ConvertError;

/// Converter to the canonical wire format. Holds no state; safe to share
/// across sources.
#[derive(Debug, Clone, Copy)]
pub struct FrameConverter {
    target: AudioFormat,
}

impl FrameConverter {
    pub fn new(target: AudioFormat) -> Self {
        Self { target }
    }

    pub fn target(&self) -> AudioFormat {
        self.target
    }

    /// Downmix and resample one buffer.
    ///
    /// Rejects empty buffers and sample counts that do not divide into the
    /// declared channel count.
    pub fn convert(&self, frame: &AudioFrame) -> Result<AudioFrame, ConvertError> {
        if frame.samples.is_empty() {
            return Err(ConvertError::EmptyBuffer);
        }
        if frame.channels == 0 || frame.samples.len() % frame.channels as usize != 0 {
            return Err(ConvertError::ChannelMismatch {
                samples: frame.samples.len(),
                channels: frame.channels,
            });
        }

        let mono = if frame.channels == 1 {
            frame.samples.clone()
        } else {
            downmix(&frame.samples, frame.channels)
        };

        let samples = if frame.sample_rate == self.target.sample_rate {
            mono
        } else {
            resample(&mono, frame.sample_rate, self.target.sample_rate)
        };

        Ok(AudioFrame {
            samples,
            sample_rate: self.target.sample_rate,
            channels: self.target.channels,
            timestamp_ms: frame.timestamp_ms,
            source: frame.source,
        })
    }
}

/// Sum interleaved channels into mono with clipping.
fn downmix(samples: &[i16], channels: u16) -> Vec<i16> {
    let channels = channels as usize;
    let mut mono = Vec::with_capacity(samples.len() / channels);

    for group in samples.chunks_exact(channels) {
        let sum: i32 = group.iter().map(|&s| s as i32).sum();
        mono.push(sum.clamp(i16::MIN as i32, i16::MAX as i32) as i16);
    }

    mono
}

/// Linear-interpolation resampler. Output length tracks the exact rate
/// ratio to within one frame.
fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = (samples.len() as f64 / ratio).floor() as usize;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let pos = i as f64 * ratio;
        let idx = pos as usize;
        let frac = pos - idx as f64;

        let a = samples[idx] as f64;
        let b = if idx + 1 < samples.len() {
            samples[idx + 1] as f64
        } else {
            a
        };

        out.push((a + (b - a) * frac).round() as i16);
    }

    out
}

/// Normalized RMS level of a buffer (0.0 to 1.0), for live metering.
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let v = s as f64;
            v * v
        })
        .sum();

    ((sum_sq / samples.len() as f64).sqrt() / i16::MAX as f64) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::types::AudioSource;

    fn frame(samples: Vec<i16>, sample_rate: u32, channels: u16) -> AudioFrame {
        AudioFrame {
            samples,
            sample_rate,
            channels,
            timestamp_ms: 0,
            source: AudioSource::Microphone,
        }
    }

    #[test]
    fn test_rejects_empty_buffer() {
        let converter = FrameConverter::new(AudioFormat::WIRE);
        let result = converter.convert(&frame(vec![], 48_000, 2));
        assert_eq!(result.unwrap_err(), ConvertError::EmptyBuffer);
    }

    #[test]
    fn test_rejects_channel_mismatch() {
        let converter = FrameConverter::new(AudioFormat::WIRE);
        // 3 samples cannot be 2-channel interleaved data
        let result = converter.convert(&frame(vec![1, 2, 3], 48_000, 2));
        assert_eq!(
            result.unwrap_err(),
            ConvertError::ChannelMismatch {
                samples: 3,
                channels: 2
            }
        );
    }

    #[test]
    fn test_stereo_downmix_sums_channels() {
        let converter = FrameConverter::new(AudioFormat {
            sample_rate: 16_000,
            channels: 1,
        });

        let converted = converter
            .convert(&frame(vec![100, 50, 200, 100, 300, 150], 16_000, 2))
            .unwrap();

        assert_eq!(converted.samples, vec![150, 300, 450]);
        assert_eq!(converted.channels, 1);
    }

    #[test]
    fn test_downmix_clips() {
        let converter = FrameConverter::new(AudioFormat {
            sample_rate: 16_000,
            channels: 1,
        });

        let converted = converter
            .convert(&frame(vec![i16::MAX - 100, 200], 16_000, 2))
            .unwrap();

        assert_eq!(converted.samples, vec![i16::MAX]);
    }

    #[test]
    fn test_resample_integer_ratio_count() {
        let converter = FrameConverter::new(AudioFormat::WIRE);
        let input = frame(vec![0i16; 4800], 48_000, 1); // 100ms at 48kHz

        let converted = converter.convert(&input).unwrap();

        // 100ms at 16kHz = 1600 samples, within one frame
        assert!((converted.samples.len() as i64 - 1600).abs() <= 1);
        assert_eq!(converted.sample_rate, 16_000);
    }

    #[test]
    fn test_resample_fractional_ratio_count() {
        let converter = FrameConverter::new(AudioFormat::WIRE);
        let input = frame(vec![0i16; 4410], 44_100, 1); // 100ms at 44.1kHz

        let converted = converter.convert(&input).unwrap();

        assert!((converted.samples.len() as i64 - 1600).abs() <= 1);
    }

    #[test]
    fn test_resample_preserves_rms() {
        // A 440Hz-ish tone at moderate level; linear interpolation should
        // keep the energy close to the original.
        let sample_rate = 48_000u32;
        let samples: Vec<i16> = (0..4800)
            .map(|i| {
                let t = i as f64 / sample_rate as f64;
                ((t * 440.0 * 2.0 * std::f64::consts::PI).sin() * 8000.0) as i16
            })
            .collect();

        let before = rms(&samples);

        let converter = FrameConverter::new(AudioFormat::WIRE);
        let converted = converter.convert(&frame(samples, sample_rate, 1)).unwrap();
        let after = rms(&converted.samples);

        assert!(
            (before - after).abs() < 0.01,
            "rms drifted: {} -> {}",
            before,
            after
        );
    }

    #[test]
    fn test_rms_known_values() {
        assert_eq!(rms(&[]), 0.0);
        assert_eq!(rms(&[0, 0, 0]), 0.0);

        let full_scale = rms(&[i16::MAX, i16::MAX]);
        assert!((full_scale - 1.0).abs() < 0.001);
    }
}
