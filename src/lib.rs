pub mod activity;
pub mod audio;
pub mod capture;
pub mod config;
pub mod credentials;
pub mod error;
pub mod persist;
pub mod transcribe;

pub use activity::{ActivitySignal, AutoRecordController, MicFollowController, SignalSource};
pub use audio::{
    AudioFormat, AudioFrame, AudioSource, DeviceTap, FrameConverter, FrameSink, SyntheticFeed,
    SyntheticTapFactory, SystemTapFactory, TapBackend, TapFactory, TapTarget,
};
pub use capture::{CaptureEngine, EngineEvent, EngineServices, TranscriptChunk};
pub use config::Config;
pub use credentials::{CredentialProvider, EnvCredentials, StaticCredentials};
pub use error::{CaptureError, ConvertError, TapError};
pub use persist::{LogSink, TranscriptSink};
pub use transcribe::{Connector, TranscriptionChannel, WsConnector};
