pub mod chunk;
pub mod engine;
pub mod events;

pub use chunk::TranscriptChunk;
pub use engine::{CaptureEngine, EngineServices};
pub use events::EngineEvent;
