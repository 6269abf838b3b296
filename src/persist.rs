use async_trait::async_trait;
use tracing::{debug, info};

use crate::capture::TranscriptChunk;

/// Receives finished transcript data. Storage itself lives outside this
/// crate; implementors write notes, files or databases.
#[async_trait]
pub trait TranscriptSink: Send + Sync {
    /// Called once per finalized chunk as it lands in the transcript.
    async fn chunk_finalized(&self, chunk: &TranscriptChunk);

    /// Called when a session ends, with its name and the ordered final
    /// chunks.
    async fn session_complete(&self, name: &str, chunks: Vec<TranscriptChunk>);
}

/// Sink that only logs. Used until a persistence collaborator is wired.
pub struct LogSink;

#[async_trait]
impl TranscriptSink for LogSink {
    async fn chunk_finalized(&self, chunk: &TranscriptChunk) {
        debug!(
            "final chunk from {}: {} chars",
            chunk.source.label(),
            chunk.text.len()
        );
    }

    async fn session_complete(&self, name: &str, chunks: Vec<TranscriptChunk>) {
        info!("session {} complete: {} chunks", name, chunks.len());
    }
}
