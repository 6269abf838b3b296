pub mod convert;
pub mod synthetic;
pub mod tap;
pub mod types;

pub use convert::{rms, FrameConverter};
pub use synthetic::{SyntheticFeed, SyntheticTap, SyntheticTapFactory};
pub use tap::{
    DeviceTap, FrameSink, InvalidationNotice, SystemTapFactory, TapBackend, TapFactory,
};
pub use types::{AudioFormat, AudioFrame, AudioSource, TapTarget};
