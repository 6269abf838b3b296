pub mod channel;
pub mod protocol;
pub mod transport;

pub use channel::{
    ChannelConfig, ChannelState, ChannelUpdate, ChannelUpdateKind, TranscriptionChannel,
};
pub use protocol::{classify_error, AudioAppend, ErrorClass, RateLimit, ServerEvent, SessionUpdate};
pub use transport::{Connector, TransportRx, TransportTx, WsConnector};
