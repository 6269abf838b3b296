use anyhow::Result;
use serde::Deserialize;

/// Engine configuration. Every field has a default so the engine runs with
/// no config file present.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transcription: TranscriptionConfig,
    pub audio: AudioConfig,
    pub activity: ActivityConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// Streaming endpoint of the transcription service
    pub url: String,
    pub model: String,
    pub language: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub connect_timeout_secs: u64,
    pub keepalive_interval_secs: u64,
    /// How long a connection lives before proactive renewal; must stay
    /// safely under the service's expiry window
    pub session_renewal_secs: u64,
    pub retry_delay_ms: u64,
    pub max_retries: u32,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            url: "wss://api.openai.com/v1/realtime?intent=transcription".to_string(),
            model: "gpt-4o-mini-transcribe".to_string(),
            language: "en".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            connect_timeout_secs: 10,
            keepalive_interval_secs: 30,
            session_renewal_secs: 25 * 60, // the service expires sessions at 30 minutes
            retry_delay_ms: 500,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Canonical wire sample rate
    pub sample_rate: u32,
    /// Bounded handoff queue between a tap and its channel, in buffers
    pub frame_queue_depth: usize,
    /// Re-activation attempts for a tap lost mid-session
    pub tap_reactivate_limit: u32,
    /// RMS above this counts as local activity for the silence probe
    pub level_threshold: f32,
    /// Processes composed into the system-output mix (empty = all)
    pub mix_processes: Vec<u32>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            frame_queue_depth: 64,
            tap_reactivate_limit: 3,
            level_threshold: 0.01,
            mix_processes: Vec::new(),
        }
    }
}

/// Debounce and probe tunables for the activity-triggered controllers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    /// Other-audio must stay active this long before auto-recording starts
    pub start_debounce_ms: u64,
    /// Other-audio must stay inactive this long before auto-recording stops
    pub stop_debounce_ms: u64,
    /// Debounce before mic-following starts
    pub mic_start_debounce_ms: u64,
    /// Local inactivity that arms the silence probe
    pub silence_threshold_ms: u64,
    pub probe_interval_ms: u64,
    /// Pause between releasing the local tap and re-reading the mic signal
    pub probe_pause_ms: u64,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            start_debounce_ms: 1_500,
            stop_debounce_ms: 8_000,
            mic_start_debounce_ms: 500,
            silence_threshold_ms: 30_000,
            probe_interval_ms: 10_000,
            probe_pause_ms: 750,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
