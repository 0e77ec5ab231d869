use super::rtp::{MAX_PACKET_SIZE, RTP_HEADER_LENGTH, RtpHeader};
use super::{MediaFrame, MediaKind, RtpFrame};

pub const PAYLOAD_TYPE: u8 = 97;

/// Opus always advertises a 48 kHz RTP clock (RFC 7587 §4.1).
pub const CLOCK_RATE: u32 = 48_000;

const MAX_PAYLOAD: usize = MAX_PACKET_SIZE - RTP_HEADER_LENGTH;

/// 20 ms at 48 kHz.
const DEFAULT_SAMPLES_PER_PACKET: u32 = 960;

/// Opus packetizer (RFC 7587).
///
/// One Opus packet per RTP packet, no fragmentation and no marker. A
/// packet that does not fit in one RTP packet is dropped. The
/// first timestamp is taken from the frame; after that the timestamp
/// advances by a fixed 20 ms of samples so jitter in capture timestamps
/// does not leak onto the wire.
#[derive(Debug)]
pub struct OpusPacketizer {
    header: RtpHeader,
    samples_per_packet: u32,
    next_timestamp: Option<u32>,
}

impl OpusPacketizer {
    pub fn new(sample_rate: u32) -> Self {
        let samples_per_packet = match sample_rate / 50 {
            0 => DEFAULT_SAMPLES_PER_PACKET,
            n => n,
        };
        Self {
            header: RtpHeader::new(PAYLOAD_TYPE, CLOCK_RATE),
            samples_per_packet,
            next_timestamp: None,
        }
    }

    pub fn reset(&mut self) {
        self.header.reset();
        self.next_timestamp = None;
    }

    pub fn header(&self) -> &RtpHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut RtpHeader {
        &mut self.header
    }

    pub fn create_packets(&mut self, frame: &MediaFrame) -> Vec<RtpFrame> {
        if frame.data.is_empty() {
            return Vec::new();
        }
        if frame.data.len() > MAX_PAYLOAD {
            tracing::warn!(len = frame.data.len(), max = MAX_PAYLOAD, "Opus packet too large, dropping");
            return Vec::new();
        }
        let timestamp = self
            .next_timestamp
            .unwrap_or_else(|| self.header.rtp_timestamp(frame.timestamp_us));
        self.next_timestamp = Some(timestamp.wrapping_add(self.samples_per_packet));

        let mut packet = self.header.packet(false, timestamp, frame.data.len());
        packet.extend_from_slice(&frame.data);
        vec![RtpFrame {
            kind: MediaKind::Audio,
            data: packet,
            timestamp,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::rtp::{RTP_HEADER_LENGTH, packet_marker};

    #[test]
    fn one_packet_per_frame_without_marker() {
        let mut p = OpusPacketizer::new(48_000);
        let packets = p.create_packets(&MediaFrame::audio(vec![0xfc, 0x01, 0x02], 0));
        assert_eq!(packets.len(), 1);
        assert_eq!(&packets[0].data[RTP_HEADER_LENGTH..], &[0xfc, 0x01, 0x02]);
        assert!(!packet_marker(&packets[0].data));
        assert_eq!(packets[0].data[1], PAYLOAD_TYPE);
    }

    #[test]
    fn timestamps_advance_by_samples_per_packet() {
        let mut p = OpusPacketizer::new(48_000);
        let first = p.create_packets(&MediaFrame::audio(vec![1], 1_000_000));
        let second = p.create_packets(&MediaFrame::audio(vec![2], 1_019_000));
        assert_eq!(first[0].timestamp, 48_000);
        assert_eq!(second[0].timestamp, 48_960);
    }

    #[test]
    fn oversized_packet_is_dropped() {
        let mut p = OpusPacketizer::new(48_000);
        assert!(p.create_packets(&MediaFrame::audio(vec![0; MAX_PAYLOAD + 1], 0)).is_empty());
        let packets = p.create_packets(&MediaFrame::audio(vec![0; MAX_PAYLOAD], 0));
        assert_eq!(packets[0].data.len(), MAX_PACKET_SIZE);
    }

    #[test]
    fn zero_rate_falls_back_to_default() {
        let p = OpusPacketizer::new(0);
        assert_eq!(p.samples_per_packet, DEFAULT_SAMPLES_PER_PACKET);
    }

    #[test]
    fn reset_restarts_timestamp_from_frame() {
        let mut p = OpusPacketizer::new(48_000);
        p.create_packets(&MediaFrame::audio(vec![1], 0));
        p.reset();
        let packets = p.create_packets(&MediaFrame::audio(vec![1], 2_000_000));
        assert_eq!(packets[0].timestamp, 96_000);
    }
}
