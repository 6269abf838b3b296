use tracing::debug;

/// Supplies the API key for the transcription service.
///
/// Capture fails fast with `CaptureError::NoCredential` when no key is
/// available, before any connection is attempted.
pub trait CredentialProvider: Send + Sync {
    /// Current API key, if one is configured.
    fn api_key(&self) -> Option<String>;
}

/// Reads the key from an environment variable.
pub struct EnvCredentials {
    var: String,
}

impl EnvCredentials {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl CredentialProvider for EnvCredentials {
    fn api_key(&self) -> Option<String> {
        match std::env::var(&self.var) {
            Ok(key) if !key.is_empty() => Some(key),
            _ => {
                debug!("no API key in {}", self.var);
                None
            }
        }
    }
}

/// Fixed key, for tests and embedding callers with their own key storage.
pub struct StaticCredentials {
    key: Option<String>,
}

impl StaticCredentials {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
        }
    }

    pub fn absent() -> Self {
        Self { key: None }
    }
}

impl CredentialProvider for StaticCredentials {
    fn api_key(&self) -> Option<String> {
        self.key.clone()
    }
}
