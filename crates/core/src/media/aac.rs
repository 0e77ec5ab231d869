use super::rtp::{MAX_PACKET_SIZE, RTP_HEADER_LENGTH, RtpHeader};
use super::{MediaFrame, MediaKind, RtpFrame};

pub const PAYLOAD_TYPE: u8 = 97;

/// AU-headers-length (16 bits) plus one 13+3 bit AU header.
const AU_HEADER_SECTION: usize = 4;
const MAX_PAYLOAD: usize = MAX_PACKET_SIZE - RTP_HEADER_LENGTH - AU_HEADER_SECTION;

/// Sampling frequencies indexed by the MPEG-4 `samplingFrequencyIndex`.
pub const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// Index used when the configured rate is not in [`SAMPLE_RATES`] (48 kHz).
const DEFAULT_RATE_INDEX: usize = 3;

pub fn sample_rate_index(sample_rate: u32) -> usize {
    SAMPLE_RATES
        .iter()
        .position(|&rate| rate == sample_rate)
        .unwrap_or(DEFAULT_RATE_INDEX)
}

/// AudioSpecificConfig for AAC-LC, rendered for the SDP `config=` parameter.
pub fn audio_specific_config(sample_rate: u32, channels: u8) -> String {
    let config = (2u16 << 11) | ((sample_rate_index(sample_rate) as u16) << 7) | ((channels as u16) << 3);
    format!("{config:04x}")
}

/// Length of the ADTS header at the start of `data`, if there is a valid one.
///
/// Checks the 0xFFF sync word, layer 0 and, when the buffer is long enough,
/// that `aac_frame_length` covers the header and fits in the buffer.
pub fn adts_header_len(data: &[u8]) -> Option<usize> {
    if data.len() < 7 || data[0] != 0xff || data[1] & 0xf0 != 0xf0 {
        return None;
    }
    if (data[1] >> 1) & 0x03 != 0 {
        return None;
    }
    let protection_absent = data[1] & 0x01 == 1;
    let header_len = if protection_absent { 7 } else { 9 };
    if data.len() < header_len {
        return None;
    }
    if data.len() >= header_len + 2 {
        let frame_len = (((data[3] & 0x03) as usize) << 11)
            | ((data[4] as usize) << 3)
            | ((data[5] >> 5) as usize & 0x07);
        if frame_len < header_len || frame_len > data.len() {
            return None;
        }
    }
    Some(header_len)
}

/// AAC packetizer (RFC 3640, `mpeg4-generic` in AAC-hbr mode).
///
/// Each packet carries one AU header section followed by (a piece of) one
/// raw AAC frame:
///
/// ```text
/// [AU-headers-length = 16][AU-size:13 | AU-index:3][raw AAC data]
/// ```
#[derive(Debug)]
pub struct AacPacketizer {
    header: RtpHeader,
}

impl AacPacketizer {
    /// The RTP clock runs at the audio sample rate.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            header: RtpHeader::new(PAYLOAD_TYPE, sample_rate.max(1)),
        }
    }

    pub fn header(&self) -> &RtpHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut RtpHeader {
        &mut self.header
    }

    pub fn create_packets(&mut self, frame: &MediaFrame) -> Vec<RtpFrame> {
        let mut data: &[u8] = &frame.data;
        if let Some(len) = adts_header_len(data)
            && data.len() > len
        {
            data = &data[len..];
        }

        let timestamp = self.header.rtp_timestamp(frame.timestamp_us);
        let count = data.len().div_ceil(MAX_PAYLOAD);

        data.chunks(MAX_PAYLOAD)
            .enumerate()
            .map(|(i, chunk)| {
                let size = chunk.len();
                let mut packet = self
                    .header
                    .packet(i + 1 == count, timestamp, AU_HEADER_SECTION + size);
                packet.extend_from_slice(&[0x00, 0x10, (size >> 5) as u8, ((size << 3) & 0xf8) as u8]);
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
