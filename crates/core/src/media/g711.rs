use super::rtp::{MAX_PACKET_SIZE, RTP_HEADER_LENGTH, RtpHeader};
use super::{MediaFrame, MediaKind, RtpFrame};

/// Static payload type for PCMA (RFC 3551 §6).
pub const PAYLOAD_TYPE: u8 = 8;
pub const CLOCK_RATE: u32 = 8_000;

const MAX_PAYLOAD: usize = MAX_PACKET_SIZE - RTP_HEADER_LENGTH;
const CLIP: i32 = 32_635;

/// Segment (exponent) for the top seven magnitude bits.
const EXPONENT_TABLE: [u8; 128] = {
    let mut table = [0u8; 128];
    let mut i = 0;
    while i < 128 {
        table[i] = match i {
            0..=1 => 1,
            2..=3 => 2,
            4..=7 => 3,
            8..=15 => 4,
            16..=31 => 5,
            32..=63 => 6,
            _ => 7,
        };
        i += 1;
    }
    table
};

/// Encode one linear 16-bit sample to A-law (ITU-T G.711).
pub fn linear_to_alaw(sample: i16) -> u8 {
    let mut value = sample as i32;
    let sign: u8 = if value < 0 { 0x80 } else { 0x00 };
    if value < 0 {
        value = -value;
    }
    value = value.min(CLIP);

    let compressed = if value >= 256 {
        let exponent = EXPONENT_TABLE[((value >> 8) & 0x7f) as usize];
        let mantissa = (value >> (exponent + 3)) & 0x0f;
        (exponent << 4) | mantissa as u8
    } else {
        (value >> 4) as u8
    };
    compressed ^ (sign ^ 0x55)
}

/// Encode a PCM16LE buffer to A-law. A trailing odd byte is ignored.
pub fn encode_alaw(pcm: &[u8]) -> Vec<u8> {
    pcm.chunks_exact(2)
        .map(|s| linear_to_alaw(i16::from_le_bytes([s[0], s[1]])))
        .collect()
}

/// G.711 A-law packetizer (PCMA/8000/1).
///
/// Frames carry PCM16LE samples which are companded here. Each output byte
/// is one sample, so a fragment's timestamp is the frame timestamp plus the
/// number of samples in the fragments before it.
#[derive(Debug)]
pub struct G711Packetizer {
    header: RtpHeader,
}

impl Default for G711Packetizer {
    fn default() -> Self {
        Self::new()
    }
}

impl G711Packetizer {
    pub fn new() -> Self {
        Self {
            header: RtpHeader::new(PAYLOAD_TYPE, CLOCK_RATE),
        }
    }

    pub fn header(&self) -> &RtpHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut RtpHeader {
        &mut self.header
    }

    pub fn create_packets(&mut self, frame: &MediaFrame) -> Vec<RtpFrame> {
        let encoded = encode_alaw(&frame.data);
        let base = self.header.rtp_timestamp(frame.timestamp_us);
        let count = encoded.len().div_ceil(MAX_PAYLOAD);

        encoded
            .chunks(MAX_PAYLOAD)
            .enumerate()
            .map(|(i, chunk)| {
                let timestamp = base.wrapping_add((i * MAX_PAYLOAD) as u32);
                let mut packet = self.header.packet(i + 1 == count, timestamp, chunk.len());
                packet.extend_from_slice(chunk);
                RtpFrame {
                    kind: MediaKind::Audio,
                    data: packet,
                    timestamp,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::rtp::packet_marker;

    #[test]
    fn alaw_reference_values() {
        assert_eq!(linear_to_alaw(0), 0x55);
        assert_eq!(linear_to_alaw(-1), 0xd5);
        assert_eq!(linear_to_alaw(i16::MAX), 0x2a);
        assert_eq!(linear_to_alaw(i16::MIN), 0xaa);
        assert_eq!(linear_to_alaw(1000), 0x7a);
    }

    #[test]
    fn exponent_table_segments() {
        assert_eq!(EXPONENT_TABLE[0], 1);
        assert_eq!(EXPONENT_TABLE[3], 2);
        assert_eq!(EXPONENT_TABLE[8], 4);
        assert_eq!(EXPONENT_TABLE[127], 7);
    }

    #[test]
    fn odd_trailing_byte_ignored() {
        assert_eq!(encode_alaw(&[0, 0, 0]).len(), 1);
    }

    #[test]
    fn fragments_carry_sample_offsets() {
        let mut p = G711Packetizer::new();
        let pcm = vec![0u8; 2 * 2500];
        let packets = p.create_packets(&MediaFrame::audio(pcm, 1_000_000));
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0].timestamp, 8_000);
        assert_eq!(packets[1].timestamp, 8_000 + MAX_PAYLOAD as u32);
        assert_eq!(packets[2].len(), RTP_HEADER_LENGTH + 2500 - 2 * MAX_PAYLOAD);
        assert!(packet_marker(&packets[2].data));
        assert!(!packet_marker(&packets[1].data));
        assert_eq!(packets[0].data[1] & 0x7f, 8);
    }
}
