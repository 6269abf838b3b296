pub mod auto_record;
pub mod mic_follow;
pub mod signal;

pub use auto_record::AutoRecordController;
pub use mic_follow::MicFollowController;
pub use signal::{ActivitySignal, SignalSource};

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::capture::CaptureEngine;
use crate::persist::TranscriptSink;

/// Stop the engine and hand the accumulated final chunks to the
/// persistence collaborator as one named session. No-op when the engine is
/// already inactive.
pub(crate) async fn finalize_session(engine: &CaptureEngine, sink: &Arc<dyn TranscriptSink>) {
    if !engine.is_active().await {
        return;
    }

    let finals: Vec<_> = engine
        .transcript()
        .await
        .into_iter()
        .filter(|c| c.is_final)
        .collect();

    engine.stop().await;

    let name = format!("meeting-{}", Uuid::new_v4());
    info!("handing off session {} ({} chunks)", name, finals.len());
    sink.session_complete(&name, finals).await;
}
