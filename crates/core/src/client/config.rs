use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::transport::TransportProtocol;

/// Which lower transport the client offers in SETUP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolPolicy {
    Tcp,
    Udp,
    /// Offer UDP and TCP; the server picks, later tracks follow its choice.
    #[default]
    Auto,
}

impl ProtocolPolicy {
    /// The policy that pins a transport the server already granted.
    pub fn fixed(protocol: TransportProtocol) -> Self {
        match protocol {
            TransportProtocol::Tcp => Self::Tcp,
            TransportProtocol::Udp => Self::Udp,
        }
    }
}

impl fmt::Display for ProtocolPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Auto => "auto",
        })
    }
}

impl FromStr for ProtocolPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            "auto" => Ok(Self::Auto),
            other => Err(format!("unknown protocol policy '{other}'")),
        }
    }
}

/// Client (push) mode configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `rtsp://[user:pass@]host[:port]/path` of the receiving server.
    pub url: String,
    pub protocol: ProtocolPolicy,
    /// Announce and send the video track only.
    pub video_only: bool,
    pub user_agent: String,
    pub session_name: String,
    /// Frames buffered between the encoder and the sending task.
    pub queue_capacity: usize,
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
    /// How long `connect` waits for valid video parameters.
    pub params_timeout: Duration,
    pub teardown_timeout: Duration,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            protocol: ProtocolPolicy::default(),
            video_only: false,
            user_agent: concat!("rtsp-stream/", env!("CARGO_PKG_VERSION")).to_string(),
            session_name: "Stream".to_string(),
            queue_capacity: 32,
            connect_timeout: Duration::from_secs(10),
            response_timeout: Duration::from_secs(15),
            params_timeout: Duration::from_secs(5),
            teardown_timeout: Duration::from_secs(5),
        }
    }
}
