//! RTSP protocol implementation (RFC 2326).
//!
//! This module handles the text-based RTSP signaling protocol: parsing
//! requests and responses, building messages, authentication, the
//! `Transport` header and SDP. The server's method dispatch lives in
//! [`crate::server`].
//!
//! ## RTSP message format (RFC 2326 §4)
//!
//! RTSP messages follow HTTP/1.1 syntax with a different method set:
//!
//! ```text
//! DESCRIBE rtsp://server/stream RTSP/1.0\r\n
//! CSeq: 2\r\n
//! Accept: application/sdp\r\n
//! \r\n
//! ```
//!
//! On a TCP-interleaved session the same connection also carries binary
//! RTP/RTCP frames (`$`, channel, 16-bit length). [`message::read_message`]
//! skips those while looking for the next text message.
//!
//! ## Methods
//!
//! | Method | RFC section | Client push | Server |
//! |--------|-------------|-------------|--------|
//! | OPTIONS | §10.1 | sent | handled |
//! | DESCRIBE | §10.2 | | handled |
//! | ANNOUNCE | §10.3 | sent | |
//! | SETUP | §10.4 | sent | handled |
//! | PLAY | §10.5 | | handled |
//! | PAUSE | §10.6 | | handled |
//! | TEARDOWN | §10.7 | sent | handled |
//! | GET_PARAMETER | §10.8 | keep-alive | handled |
//! | RECORD | §10.11 | sent | |

use std::fmt;

pub mod auth;
pub mod command;
pub mod message;
pub mod request;
pub mod response;
pub mod sdp;
pub mod transport;

pub use command::Command;
pub use request::RtspRequest;
pub use response::RtspResponse;
pub use transport::TransportHeader;

pub const RTSP_VERSION: &str = "RTSP/1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Options,
    Announce,
    Record,
    Setup,
    Teardown,
    Describe,
    Play,
    Pause,
    GetParameter,
    Unknown,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Options => "OPTIONS",
            Self::Announce => "ANNOUNCE",
            Self::Record => "RECORD",
            Self::Setup => "SETUP",
            Self::Teardown => "TEARDOWN",
            Self::Describe => "DESCRIBE",
            Self::Play => "PLAY",
            Self::Pause => "PAUSE",
            Self::GetParameter => "GET_PARAMETER",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "OPTIONS" => Self::Options,
            "ANNOUNCE" => Self::Announce,
            "RECORD" => Self::Record,
            "SETUP" => Self::Setup,
            "TEARDOWN" => Self::Teardown,
            "DESCRIBE" => Self::Describe,
            "PLAY" => Self::Play,
            "PAUSE" => Self::Pause,
            "GET_PARAMETER" => Self::GetParameter,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Look up a header value in a raw message head (case-insensitive name).
pub(crate) fn find_header<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    text.lines()
        .skip(1)
        .take_while(|line| !line.is_empty())
        .find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim())
        })
}
