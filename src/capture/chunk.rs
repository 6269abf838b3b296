use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audio::AudioSource;

/// One piece of assembled transcript text.
///
/// The transcript holds at most one non-final chunk per source: a new
/// partial replaces the previous one by value, and a final chunk clears the
/// partial state for its source. Chunks are append-ordered by arrival time,
/// not by source. An utterance keeps the same id from its first delta
/// through its final chunk so consumers can correlate replacements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptChunk {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub source: AudioSource,
    pub text: String,
    pub is_final: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_serialization_round_trip() {
        let chunk = TranscriptChunk {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: AudioSource::Microphone,
            text: "Hello".to_string(),
            is_final: true,
        };

        let json = serde_json::to_string(&chunk).unwrap();
        let parsed: TranscriptChunk = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.id, chunk.id);
        assert_eq!(parsed.text, "Hello");
        assert!(parsed.is_final);
        assert_eq!(parsed.source, AudioSource::Microphone);
    }
}
