//! RTCP sender reports and BYE (RFC 3550 §6.4.1, §6.6).
//!
//! BYE always travels in a compound packet behind a final sender report
//! (RFC 3550 §6.1).
//!
//! The sender keeps a packet and octet count per track and periodically
//! tells the receiver how RTP timestamps map onto wall-clock (NTP) time.
//!
//! ```text
//!  0               1               2               3
//! |V=2|P|  RC=0   |   PT=SR=200   |         length = 6            |
//! |                         SSRC of sender                        |
//! |              NTP timestamp, most significant word             |
//! |             NTP timestamp, least significant word             |
//! |                         RTP timestamp                         |
//! |                     sender's packet count                     |
//! |                      sender's octet count                     |
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::media::{MediaKind, RtpFrame};
use crate::transport::RtpTransport;

/// Seconds between 1900-01-01 (NTP epoch) and 1970-01-01 (Unix epoch).
pub const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

pub const REPORT_INTERVAL: Duration = Duration::from_secs(5);

pub const SENDER_REPORT_LEN: usize = 28;

const PT_SENDER_REPORT: u8 = 200;
const PT_BYE: u8 = 203;

/// Current wall-clock time as a 64-bit NTP timestamp `(seconds, fraction)`.
pub fn ntp_now() -> (u32, u32) {
    let now = chrono::Utc::now();
    let secs = (now.timestamp() as u64).wrapping_add(NTP_UNIX_OFFSET) as u32;
    let frac = ((now.timestamp_subsec_nanos() as u64) << 32) / 1_000_000_000;
    (secs, frac as u32)
}

/// Serialize a sender report without reception report blocks.
pub fn sender_report(ssrc: u32, ntp: (u32, u32), rtp_timestamp: u32, packets: u32, octets: u32) -> [u8; SENDER_REPORT_LEN] {
    let mut sr = [0u8; SENDER_REPORT_LEN];
    sr[0] = 0x80;
    sr[1] = PT_SENDER_REPORT;
    sr[2..4].copy_from_slice(&6u16.to_be_bytes());
    sr[4..8].copy_from_slice(&ssrc.to_be_bytes());
    sr[8..12].copy_from_slice(&ntp.0.to_be_bytes());
    sr[12..16].copy_from_slice(&ntp.1.to_be_bytes());
    sr[16..20].copy_from_slice(&rtp_timestamp.to_be_bytes());
    sr[20..24].copy_from_slice(&packets.to_be_bytes());
    sr[24..28].copy_from_slice(&octets.to_be_bytes());
    sr
}

/// Serialize a BYE for a single source.
pub fn bye(ssrc: u32) -> [u8; 8] {
    let mut packet = [0x81, PT_BYE, 0, 1, 0, 0, 0, 0];
    packet[4..8].copy_from_slice(&ssrc.to_be_bytes());
    packet
}

#[derive(Debug)]
struct TrackReport {
    kind: MediaKind,
    transport: RtpTransport,
    ssrc: u32,
    packets: u32,
    octets: u32,
    rtp_timestamp: u32,
}

impl TrackReport {
    fn sender_report(&self, ntp: (u32, u32)) -> [u8; SENDER_REPORT_LEN] {
        sender_report(self.ssrc, ntp, self.rtp_timestamp, self.packets, self.octets)
    }

    /// SR followed by BYE.
    fn goodbye(&self, ntp: (u32, u32)) -> Vec<u8> {
        let mut packet = Vec::with_capacity(SENDER_REPORT_LEN + 8);
        packet.extend_from_slice(&self.sender_report(ntp));
        packet.extend_from_slice(&bye(self.ssrc));
        packet
    }
}

#[derive(Debug)]
struct Inner {
    tracks: Mutex<Vec<TrackReport>>,
    closed: AtomicBool,
    cancel: CancellationToken,
}

/// Per-session RTCP sender: counts what was sent on each track and reports it.
///
/// Cheap to clone; all clones share the same counters.
#[derive(Debug, Clone)]
pub struct RtcpReporter {
    inner: Arc<Inner>,
}

impl RtcpReporter {
    /// The periodic task stops when `parent` is cancelled or on [`close`](Self::close).
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            inner: Arc::new(Inner {
                tracks: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                cancel: parent.child_token(),
            }),
        }
    }

    /// Register (or replace) the track of `kind`.
    pub fn add_track(&self, kind: MediaKind, transport: RtpTransport, ssrc: u32) {
        let mut tracks = self.inner.tracks.lock();
        tracks.retain(|t| t.kind != kind);
        tracks.push(TrackReport {
            kind,
            transport,
            ssrc,
            packets: 0,
            octets: 0,
            rtp_timestamp: 0,
        });
    }

    /// Switch a track to a new SSRC. Counters restart from zero.
    pub fn set_ssrc(&self, kind: MediaKind, ssrc: u32) {
        if let Some(track) = self.inner.tracks.lock().iter_mut().find(|t| t.kind == kind) {
            track.ssrc = ssrc;
            track.packets = 0;
            track.octets = 0;
        }
    }

    /// Account for one sent RTP packet.
    pub fn update(&self, packet: &RtpFrame) {
        if let Some(track) = self.inner.tracks.lock().iter_mut().find(|t| t.kind == packet.kind) {
            track.packets = track.packets.wrapping_add(1);
            track.octets = track.octets.wrapping_add(packet.payload_len() as u32);
            track.rtp_timestamp = packet.timestamp;
        }
    }

    /// `(packets, octets)` sent on a track so far.
    pub fn counts(&self, kind: MediaKind) -> Option<(u32, u32)> {
        self.inner
            .tracks
            .lock()
            .iter()
            .find(|t| t.kind == kind)
            .map(|t| (t.packets, t.octets))
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Send one sender report per track now.
    pub async fn send_reports(&self) {
        if self.is_closed() {
            return;
        }
        let ntp = ntp_now();
        let reports: Vec<(RtpTransport, [u8; SENDER_REPORT_LEN])> = self
            .inner
            .tracks
            .lock()
            .iter()
            .map(|t| (t.transport.clone(), t.sender_report(ntp)))
            .collect();

        for (transport, report) in reports {
            if let Err(e) = transport.send_rtcp(&report).await {
                tracing::debug!(error = %e, "failed to send RTCP sender report");
            }
        }
    }

    /// Spawn the periodic report task. The first report goes out immediately.
    pub fn start(&self) {
        let reporter = self.clone();
        let cancel = self.inner.cancel.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REPORT_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => reporter.send_reports().await,
                }
            }
            tracing::trace!("RTCP report task stopped");
        });
    }

    /// Stop reporting and send SR+BYE on every track. Later calls do nothing.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.cancel.cancel();

        let ntp = ntp_now();
        let byes: Vec<(RtpTransport, Vec<u8>)> = self
            .inner
            .tracks
            .lock()
            .iter()
            .map(|t| (t.transport.clone(), t.goodbye(ntp)))
            .collect();
        for (transport, packet) in byes {
            if let Err(e) = transport.send_rtcp(&packet).await {
                tracing::debug!(error = %e, "failed to send RTCP BYE");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ControlWriter;
    use tokio_test::io::Builder;

    #[test]
    fn sender_report_layout() {
        let sr = sender_report(0x0102_0304, (0xAABB_CCDD, 0x1122_3344), 90_000, 10, 1234);
        assert_eq!(&sr[..4], &[0x80, 200, 0, 6]);
        assert_eq!(&sr[4..8], &[1, 2, 3, 4]);
        assert_eq!(&sr[8..12], &[0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(&sr[12..16], &[0x11, 0x22, 0x33, 0x44]);
        assert_eq!(u32::from_be_bytes([sr[16], sr[17], sr[18], sr[19]]), 90_000);
        assert_eq!(u32::from_be_bytes([sr[20], sr[21], sr[22], sr[23]]), 10);
        assert_eq!(u32::from_be_bytes([sr[24], sr[25], sr[26], sr[27]]), 1234);
    }

    #[test]
    fn bye_layout() {
        assert_eq!(bye(0xDEAD_BEEF), [0x81, 203, 0, 1, 0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn ntp_seconds_are_past_1900_offset() {
        let (secs, _) = ntp_now();
        let unix = chrono::Utc::now().timestamp() as u64;
        assert_eq!(secs as u64, (unix + NTP_UNIX_OFFSET) & 0xFFFF_FFFF);
    }

    #[test]
    fn counts_exclude_rtp_header() {
        let mock = Builder::new().build();
        let reporter = RtcpReporter::new(&CancellationToken::new());
        reporter.add_track(
            MediaKind::Video,
            RtpTransport::interleaved(ControlWriter::new(mock), 0, 1),
            7,
        );
        for _ in 0..3 {
            reporter.update(&RtpFrame {
                kind: MediaKind::Video,
                data: vec![0u8; 112],
                timestamp: 3000,
            });
        }
        // audio was never set up
        reporter.update(&RtpFrame {
            kind: MediaKind::Audio,
            data: vec![0u8; 50],
            timestamp: 0,
        });
        assert_eq!(reporter.counts(MediaKind::Video), Some((3, 300)));
        assert_eq!(reporter.counts(MediaKind::Audio), None);

        reporter.set_ssrc(MediaKind::Video, 8);
        assert_eq!(reporter.counts(MediaKind::Video), Some((0, 0)));
    }

    #[tokio::test]
    async fn close_sends_compound_bye_once_on_rtcp_channel() {
        use tokio::io::AsyncReadExt;

        let (near, mut far) = tokio::io::duplex(1024);
        let reporter = RtcpReporter::new(&CancellationToken::new());
        reporter.add_track(
            MediaKind::Audio,
            RtpTransport::interleaved(ControlWriter::new(near), 2, 3),
            9,
        );
        reporter.update(&RtpFrame {
            kind: MediaKind::Audio,
            data: vec![0u8; 22],
            timestamp: 480,
        });
        reporter.close().await;
        reporter.close().await;
        assert!(reporter.is_closed());
        drop(reporter);

        let mut wire = Vec::new();
        far.read_to_end(&mut wire).await.unwrap();
        assert_eq!(wire.len(), 4 + SENDER_REPORT_LEN + 8, "one frame, sent once");
        assert_eq!(&wire[..4], &[0x24, 3, 0, 36]);
        let sr = &wire[4..4 + SENDER_REPORT_LEN];
        assert_eq!(&sr[..8], &[0x80, 200, 0, 6, 0, 0, 0, 9]);
        assert_eq!(&sr[16..20], &480u32.to_be_bytes());
        assert_eq!(&sr[20..28], &[0, 0, 0, 1, 0, 0, 0, 10]);
        assert_eq!(&wire[4 + SENDER_REPORT_LEN..], &[0x81, 203, 0, 1, 0, 0, 0, 9]);
    }
}
