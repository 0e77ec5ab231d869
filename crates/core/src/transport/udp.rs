use std::io;
use std::net::{IpAddr, SocketAddr};

use tokio::net::UdpSocket;

const PAIR_BIND_ATTEMPTS: usize = 32;

/// Bind an RTP/RTCP socket pair on `ip`: RTP on an even port, RTCP on RTP + 1.
pub async fn bind_pair(ip: IpAddr) -> io::Result<(UdpSocket, UdpSocket)> {
    for _ in 0..PAIR_BIND_ATTEMPTS {
        let first = UdpSocket::bind(SocketAddr::new(ip, 0)).await?;
        let port = first.local_addr()?.port();

        let pair = if port % 2 == 0 {
            match port.checked_add(1) {
                Some(rtcp_port) => UdpSocket::bind(SocketAddr::new(ip, rtcp_port))
                    .await
                    .map(|rtcp| (first, rtcp)),
                None => continue,
            }
        } else {
            UdpSocket::bind(SocketAddr::new(ip, port - 1))
                .await
                .map(|rtp| (rtp, first))
        };

        match pair {
            Ok(pair) => {
                tracing::trace!(rtp_port = port & !1, "bound UDP port pair");
                return Ok(pair);
            }
            Err(e) => tracing::trace!(port, error = %e, "port pair unavailable, retrying"),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AddrInUse,
        "no free even/odd UDP port pair",
    ))
}

/// Whether a UDP send error only means the peer is not listening (ICMP
/// port unreachable reported on a connected socket).
pub fn is_peer_unreachable(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::ConnectionRefused
}
