use thiserror::Error;

/// User-facing capture error taxonomy.
///
/// Network and protocol failures are classified into this enum once, at the
/// transcription channel, so nothing above the channel parses
/// service-specific error payloads.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CaptureError {
    /// Hardware access refused. Requires user action; never retried
    /// automatically.
    #[error("audio capture permission denied; grant access in system settings")]
    PermissionDenied,

    /// No suitable audio hardware found.
    #[error("no suitable audio device available")]
    DeviceUnavailable,

    /// The transcription connection did not reach streaming in time.
    #[error("timed out connecting to the transcription service")]
    ConnectionTimeout,

    /// Transport-level failure, retried with a bounded counter.
    #[error("network failure: {0}")]
    NetworkFailure(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("insufficient quota: {0}")]
    InsufficientQuota(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The remote expired the session. Self-healing: the channel renews
    /// silently and capture continues.
    #[error("transcription session expired")]
    SessionExpired,

    /// A single utterance failed to transcribe.
    #[error("transcription failed: {0}")]
    TranscriptionFailed(String),

    /// No API key is configured. Raised before any connection is attempted.
    #[error("no API credential configured")]
    NoCredential,

    /// A capture session is already active for a different source set.
    #[error("a capture session is already active")]
    SessionActive,
}

impl CaptureError {
    /// Whether this error class is expected to clear on its own (retry or
    /// silent renewal) rather than stop the capture session.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CaptureError::ConnectionTimeout
                | CaptureError::NetworkFailure(_)
                | CaptureError::SessionExpired
        )
    }
}

/// Failures acquiring or running a device tap.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TapError {
    #[error("audio device is unavailable")]
    Unavailable,

    /// The user denied capture access. Callers must not retry without user
    /// action.
    #[error("permission to capture audio was denied")]
    PermissionDenied,

    #[error("device enumeration failed: {0}")]
    DeviceEnumerationFailed(String),

    /// `run` was called before `activate`.
    #[error("tap has not been activated")]
    NotActivated,

    /// `run` was called twice.
    #[error("tap is already running")]
    AlreadyRunning,
}

impl From<TapError> for CaptureError {
    fn from(err: TapError) -> Self {
        match err {
            TapError::PermissionDenied => CaptureError::PermissionDenied,
            _ => CaptureError::DeviceUnavailable,
        }
    }
}

/// Rejections from the format converter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConvertError {
    #[error("buffer contains no frames")]
    EmptyBuffer,

    #[error("sample count {samples} does not divide into {channels} channels")]
    ChannelMismatch { samples: usize, channels: u16 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classes() {
        assert!(CaptureError::SessionExpired.is_transient());
        assert!(CaptureError::ConnectionTimeout.is_transient());
        assert!(CaptureError::NetworkFailure("reset".into()).is_transient());

        assert!(!CaptureError::PermissionDenied.is_transient());
        assert!(!CaptureError::AuthenticationFailed("bad key".into()).is_transient());
        assert!(!CaptureError::NoCredential.is_transient());
    }

    #[test]
    fn test_tap_error_conversion() {
        assert_eq!(
            CaptureError::from(TapError::PermissionDenied),
            CaptureError::PermissionDenied
        );
        assert_eq!(
            CaptureError::from(TapError::Unavailable),
            CaptureError::DeviceUnavailable
        );
        assert_eq!(
            CaptureError::from(TapError::DeviceEnumerationFailed("no devices".into())),
            CaptureError::DeviceUnavailable
        );
    }
}
