use super::rtp::{MAX_PACKET_SIZE, RTP_HEADER_LENGTH, RtpHeader, VIDEO_CLOCK_RATE};
use super::{MediaFrame, MediaKind, RtpFrame, VideoParams, annexb};

/// Dynamic payload type used for every video codec.
pub const PAYLOAD_TYPE: u8 = 96;

const NAL_IDR: u8 = 5;
const NAL_SPS: u8 = 7;
const NAL_PPS: u8 = 8;
const NAL_AUD: u8 = 9;
const NAL_STAP_A: u8 = 24;
const NAL_FU_A: u8 = 28;

/// H.264 RTP packetizer (RFC 6184).
///
/// Converts H.264 access units (Annex B or AVCC) into RTP packets using
/// three packet types:
///
/// - **Single NAL Unit** (§5.6): NALs that fit within the packet budget are
///   sent as-is (12-byte header + NAL bytes).
///
/// - **STAP-A** (§5.7.1): SPS and PPS aggregated into one packet ahead of
///   every IDR frame, so a receiver joining mid-stream can start decoding:
///
///   ```text
///   [24][sps_len:16][sps][pps_len:16][pps]
///   ```
///
/// - **FU-A Fragmentation** (§5.8): NALs exceeding the budget are split
///   across multiple RTP packets, each carrying a 2-byte FU header:
///
///   ```text
///   FU indicator:  [F|NRI|Type=28]     (1 byte)
///   FU header:     [S|E|R|NAL_Type]    (1 byte)
///   ```
///
/// SPS, PPS and AUD NALs found inside frames are not forwarded; the
/// configured parameter sets travel in the STAP-A instead.
///
/// Until the first key frame arrives the packetizer emits nothing, since a
/// decoder cannot start from a predicted frame.
///
/// ## Marker bit
///
/// Per RFC 6184 §5.1, the RTP marker bit is set on the last RTP packet
/// of an access unit. The STAP-A never carries it.
#[derive(Debug)]
pub struct H264Packetizer {
    header: RtpHeader,
    stap_a: Option<Vec<u8>>,
    awaiting_key_frame: bool,
    force_stap_a: bool,
}

impl H264Packetizer {
    pub fn new(params: &VideoParams) -> Self {
        let mut packetizer = Self {
            header: RtpHeader::new(PAYLOAD_TYPE, VIDEO_CLOCK_RATE),
            stap_a: None,
            awaiting_key_frame: true,
            force_stap_a: false,
        };
        if let Some(pps) = &params.pps {
            packetizer.set_parameter_sets(&params.sps, pps);
        }
        packetizer
    }

    /// Replace SPS/PPS. Start codes, if any, are stripped.
    pub fn set_parameter_sets(&mut self, sps: &[u8], pps: &[u8]) {
        let sps = annexb::strip_start_code(sps);
        let pps = annexb::strip_start_code(pps);
        if sps.is_empty() || pps.is_empty() {
            self.stap_a = None;
            return;
        }

        let mut stap_a = Vec::with_capacity(5 + sps.len() + pps.len());
        stap_a.push(NAL_STAP_A);
        stap_a.extend_from_slice(&(sps.len() as u16).to_be_bytes());
        stap_a.extend_from_slice(sps);
        stap_a.extend_from_slice(&(pps.len() as u16).to_be_bytes());
        stap_a.extend_from_slice(pps);
        self.stap_a = Some(stap_a);
    }

    /// Send the STAP-A ahead of the next frame, key frame or not.
    pub fn force_parameter_sets(&mut self) {
        self.force_stap_a = true;
    }

    pub fn wait_for_key_frame(&mut self) {
        self.awaiting_key_frame = true;
    }

    pub fn reset(&mut self) {
        self.header.reset();
        self.awaiting_key_frame = true;
        self.force_stap_a = false;
    }

    pub fn header(&self) -> &RtpHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut RtpHeader {
        &mut self.header
    }

    pub fn create_packets(&mut self, frame: &MediaFrame) -> Vec<RtpFrame> {
        let nal_units = annexb::nal_units(&frame.data);
        let key_frame = frame.key_frame
            || nal_units
                .iter()
                .any(|nal| nal.first().is_some_and(|b| b & 0x1f == NAL_IDR));

        if self.awaiting_key_frame {
            if !key_frame {
                tracing::trace!(ts_us = frame.timestamp_us, "H.264 waiting for key frame");
                return Vec::new();
            }
            self.awaiting_key_frame = false;
        }

        let timestamp = self.header.rtp_timestamp(frame.timestamp_us);
        let mut packets = Vec::new();

        if key_frame || self.force_stap_a {
            self.force_stap_a = false;
            match &self.stap_a {
                Some(stap_a) => {
                    let mut packet = self.header.packet(false, timestamp, stap_a.len());
                    packet.extend_from_slice(stap_a);
                    packets.push(self.frame(packet, timestamp));
                }
                None => tracing::warn!("H.264 key frame without SPS/PPS, STAP-A skipped"),
            }
        }

        let has_params = self.stap_a.is_some();
        let payload_nals: Vec<&[u8]> = nal_units
            .into_iter()
            .filter(|nal| match nal.first() {
                None => false,
                Some(b) => {
                    !(has_params && matches!(b & 0x1f, NAL_SPS | NAL_PPS | NAL_AUD))
                }
            })
            .collect();

        let count = payload_nals.len();
        for (i, nal) in payload_nals.into_iter().enumerate() {
            self.packetize_nal(nal, i + 1 == count, timestamp, &mut packets);
        }

        tracing::trace!(
            nal_count = count,
            rtp_packets = packets.len(),
            frame_bytes = frame.data.len(),
            key_frame,
            seq = self.header.sequence(),
            ts = timestamp,
            "H.264 frame packetized"
        );

        packets
    }

    /// Packetize a single NAL unit into one or more RTP packets.
    ///
    /// If the NAL fits the budget it is sent as a Single NAL Unit packet
    /// (RFC 6184 §5.6). Otherwise FU-A fragmentation is used (RFC 6184 §5.8).
    fn packetize_nal(
        &mut self,
        nal_unit: &[u8],
        is_last_nal: bool,
        timestamp: u32,
        packets: &mut Vec<RtpFrame>,
    ) {
        if nal_unit.len() <= MAX_PACKET_SIZE - RTP_HEADER_LENGTH {
            let mut packet = self.header.packet(is_last_nal, timestamp, nal_unit.len());
            packet.extend_from_slice(nal_unit);
            packets.push(self.frame(packet, timestamp));
            return;
        }

        let nal_header = nal_unit[0];
        let nal_type = nal_header & 0x1f;
        let fu_indicator = (nal_header & 0x60) | NAL_FU_A;
        let payload = &nal_unit[1..];

        let max_fragment = MAX_PACKET_SIZE - RTP_HEADER_LENGTH - 2;
        let fragments = payload.len().div_ceil(max_fragment);

        for (i, chunk) in payload.chunks(max_fragment).enumerate() {
            let first = i == 0;
            let last = i + 1 == fragments;

            let start_bit = if first { 0x80 } else { 0x00 };
            let end_bit = if last { 0x40 } else { 0x00 };

            let mut packet = self
                .header
                .packet(is_last_nal && last, timestamp, 2 + chunk.len());
            packet.push(fu_indicator);
            packet.push(start_bit | end_bit | nal_type);
            packet.extend_from_slice(chunk);
            packets.push(self.frame(packet, timestamp));
        }

        tracing::trace!(
            nal_type,
            nal_size = nal_unit.len(),
            fragments,
            "FU-A fragmented NAL unit"
        );
    }

    fn frame(&self, data: Vec<u8>, timestamp: u32) -> RtpFrame {
        RtpFrame {
            kind: MediaKind::Video,
            data,
            timestamp,
        }
    }
}
