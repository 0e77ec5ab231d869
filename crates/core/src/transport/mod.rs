//! RTP/RTCP delivery for one negotiated track.
//!
//! A track leaves the host in one of two ways (RFC 2326 §10.12, §12.39):
//!
//! - **UDP**: a connected RTP socket and a connected RTCP socket per track,
//!   bound as an even/odd port pair ([`udp::bind_pair`]).
//! - **TCP interleaved**: packets are framed with `$`, channel and length and
//!   written on the RTSP control connection through the shared
//!   [`ControlWriter`].

use std::fmt;
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::error::Result;
use crate::media::{MediaKind, RtpFrame};

pub mod udp;
pub mod writer;

pub use writer::ControlWriter;

/// Lower transport chosen for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportProtocol {
    Tcp,
    Udp,
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("TCP"),
            Self::Udp => f.write_str("UDP"),
        }
    }
}

/// Delivery path of one track.
#[derive(Debug, Clone)]
pub enum RtpTransport {
    Udp {
        rtp: Arc<UdpSocket>,
        rtcp: Arc<UdpSocket>,
    },
    Interleaved {
        writer: ControlWriter,
        rtp_channel: u8,
        rtcp_channel: u8,
    },
}

impl RtpTransport {
    /// Connect an already bound socket pair to the peer's RTP/RTCP ports.
    pub async fn udp(rtp: UdpSocket, rtcp: UdpSocket, peer_rtp: std::net::SocketAddr, peer_rtcp: std::net::SocketAddr) -> Result<Self> {
        rtp.connect(peer_rtp).await?;
        rtcp.connect(peer_rtcp).await?;
        Ok(Self::Udp {
            rtp: Arc::new(rtp),
            rtcp: Arc::new(rtcp),
        })
    }

    pub fn interleaved(writer: ControlWriter, rtp_channel: u8, rtcp_channel: u8) -> Self {
        Self::Interleaved {
            writer,
            rtp_channel,
            rtcp_channel,
        }
    }

    pub fn protocol(&self) -> TransportProtocol {
        match self {
            Self::Udp { .. } => TransportProtocol::Udp,
            Self::Interleaved { .. } => TransportProtocol::Tcp,
        }
    }

    /// Send a batch of RTP packets. Returns the bytes put on the wire.
    ///
    /// Interleaved video is flushed once per batch, audio after every packet.
    pub async fn send_rtp(&self, packets: &[RtpFrame]) -> Result<usize> {
        match self {
            Self::Udp { rtp, .. } => {
                let mut sent = 0;
                for packet in packets {
                    match rtp.send(&packet.data).await {
                        Ok(n) => sent += n,
                        Err(e) if udp::is_peer_unreachable(&e) => {
                            tracing::trace!(error = %e, "RTP peer unreachable");
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Ok(sent)
            }
            Self::Interleaved {
                writer,
                rtp_channel,
                ..
            } => {
                let flush_each = packets.first().is_some_and(|p| p.kind == MediaKind::Audio);
                let payloads: Vec<&[u8]> = packets.iter().map(|p| p.data.as_slice()).collect();
                Ok(writer.send_interleaved(*rtp_channel, &payloads, flush_each).await?)
            }
        }
    }

    pub async fn send_rtcp(&self, data: &[u8]) -> Result<()> {
        match self {
            Self::Udp { rtcp, .. } => match rtcp.send(data).await {
                Ok(_) => Ok(()),
                Err(e) if udp::is_peer_unreachable(&e) => Ok(()),
                Err(e) => Err(e.into()),
            },
            Self::Interleaved {
                writer,
                rtcp_channel,
                ..
            } => {
                writer.send_interleaved(*rtcp_channel, &[data], true).await?;
                Ok(())
            }
        }
    }
}
