use serde::{Deserialize, Serialize};

/// Audio stream source type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioSource {
    /// Microphone input
    Microphone,
    /// System output audio (applications, browser, etc.)
    SystemOutput,
}

impl AudioSource {
    pub fn label(&self) -> &'static str {
        match self {
            AudioSource::Microphone => "microphone",
            AudioSource::SystemOutput => "system",
        }
    }
}

/// What a device tap should acquire. Fixed for the tap's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TapTarget {
    /// The default input device
    DefaultInput,
    /// Audio produced by a single process
    SingleProcess(u32),
    /// A virtual device aggregating system output, composed from the listed
    /// processes (empty = every process)
    SystemMix(Vec<u32>),
}

/// Sample layout of a PCM stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    /// Canonical wire format expected by the transcription service
    pub const WIRE: AudioFormat = AudioFormat {
        sample_rate: 16_000,
        channels: 1,
    };
}

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
    /// Audio stream source (microphone or system)
    pub source: AudioSource,
}

impl AudioFrame {
    pub fn format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }

    /// Little-endian PCM bytes, the layout the wire protocol carries.
    pub fn pcm_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        assert_eq!(AudioFormat::WIRE.sample_rate, 16_000);
        assert_eq!(AudioFormat::WIRE.channels, 1);
    }

    #[test]
    fn test_pcm_bytes_little_endian() {
        let frame = AudioFrame {
            samples: vec![1, -2],
            sample_rate: 16_000,
            channels: 1,
            timestamp_ms: 0,
            source: AudioSource::Microphone,
        };

        assert_eq!(frame.pcm_bytes(), vec![0x01, 0x00, 0xfe, 0xff]);
    }
}
