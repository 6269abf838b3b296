use crate::audio::AudioSource;
use crate::capture::chunk::TranscriptChunk;
use crate::error::CaptureError;

/// Events the engine pushes to subscribers (UI metering, persistence glue).
/// Consumers subscribe through `CaptureEngine::subscribe`.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A chunk was appended to or replaced in the transcript.
    ChunkUpdated(TranscriptChunk),
    /// RMS level of one converted buffer, 0.0 to 1.0.
    AudioLevel { source: AudioSource, rms: f32 },
    /// Capture became active or inactive.
    RecordingActive(bool),
    /// A channel renewed its expired session; informational, capture
    /// continued uninterrupted.
    SessionRenewed { source: AudioSource },
    /// An error reached the user-facing surface. Fatal errors stop the
    /// session; the rest are transient notices.
    Error { error: CaptureError, fatal: bool },
}
