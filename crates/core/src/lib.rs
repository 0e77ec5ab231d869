pub mod client;
pub mod error;
pub mod media;
pub mod protocol;
pub mod rtcp;
pub mod server;
pub mod transport;

pub use client::{ClientConfig, ClientEvent, ClientState, ProtocolPolicy, RtspClient};
pub use error::{Result, RtspError};
pub use media::{AudioCodec, AudioParams, MediaFrame, MediaKind, Packetizer, VideoCodec, VideoParams};
pub use server::{ClientStats, MediaStats, RtspServer, ServerConfig};
