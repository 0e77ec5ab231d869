use super::rtp::{MAX_PACKET_SIZE, RTP_HEADER_LENGTH, RtpHeader, VIDEO_CLOCK_RATE};
use super::{MediaFrame, MediaKind, RtpFrame, VideoParams, annexb};

pub const PAYLOAD_TYPE: u8 = 96;

const NAL_IDR_W_RADL: u8 = 19;
const NAL_IDR_N_LP: u8 = 20;
const NAL_VPS: u8 = 32;
const NAL_SPS: u8 = 33;
const NAL_PPS: u8 = 34;
const NAL_AUD: u8 = 35;
const NAL_FU: u8 = 49;

/// Access unit delimiter (type 35, layer 0, tid 1, pic_type 2).
const AUD_NAL: [u8; 3] = [NAL_AUD << 1, 0x01, 0x80];

fn nal_type(nal: &[u8]) -> u8 {
    nal.first().map_or(0, |b| (b >> 1) & 0x3f)
}

fn is_parameter_set(nal_type: u8) -> bool {
    matches!(nal_type, NAL_VPS | NAL_SPS | NAL_PPS)
}

/// H.265 RTP packetizer (RFC 7798).
///
/// Every access unit starts with an AUD packet, which lets receivers on a
/// TCP-interleaved stream find access-unit boundaries. On key frames VPS,
/// SPS and PPS are sent as three single-NAL packets ahead of the first
/// non-parameter NAL. NALs over the packet budget use FU packets (§4.4.3):
///
/// ```text
/// PayloadHdr: [F|Type=49|LayerId|TID]  (2 bytes)
/// FU header:  [S|E|FuType]             (1 byte)
/// ```
#[derive(Debug)]
pub struct H265Packetizer {
    header: RtpHeader,
    parameter_sets: Vec<Vec<u8>>,
    awaiting_key_frame: bool,
    force_params: bool,
}

impl H265Packetizer {
    pub fn new(params: &VideoParams) -> Self {
        let mut packetizer = Self {
            header: RtpHeader::new(PAYLOAD_TYPE, VIDEO_CLOCK_RATE),
            parameter_sets: Vec::new(),
            awaiting_key_frame: true,
            force_params: false,
        };
        packetizer.set_parameter_sets(
            params.vps.as_deref(),
            Some(params.sps.as_slice()),
            params.pps.as_deref(),
        );
        packetizer
    }

    /// Replace the injected parameter sets; missing or empty ones are skipped.
    pub fn set_parameter_sets(&mut self, vps: Option<&[u8]>, sps: Option<&[u8]>, pps: Option<&[u8]>) {
        self.parameter_sets = [vps, sps, pps]
            .into_iter()
            .flatten()
            .map(annexb::strip_start_code)
            .filter(|nal| !nal.is_empty())
            .map(<[u8]>::to_vec)
            .collect();
    }

    pub fn force_parameter_sets(&mut self) {
        self.force_params = true;
    }

    pub fn wait_for_key_frame(&mut self) {
        self.awaiting_key_frame = true;
    }

    pub fn reset(&mut self) {
        self.header.reset();
        self.awaiting_key_frame = true;
        self.force_params = false;
    }

    pub fn header(&self) -> &RtpHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut RtpHeader {
        &mut self.header
    }

    pub fn create_packets(&mut self, frame: &MediaFrame) -> Vec<RtpFrame> {
        let nal_units: Vec<&[u8]> = annexb::nal_units(&frame.data)
            .into_iter()
            .filter(|nal| nal.len() >= 2)
            .collect();
        if nal_units.is_empty() {
            return Vec::new();
        }

        let key_frame = frame.key_frame
            || nal_units
                .iter()
                .any(|nal| matches!(nal_type(nal), NAL_IDR_W_RADL | NAL_IDR_N_LP));

        if self.awaiting_key_frame {
            if !key_frame {
                tracing::trace!(ts_us = frame.timestamp_us, "H.265 waiting for key frame");
                return Vec::new();
            }
            self.awaiting_key_frame = false;
        }

        let timestamp = self.header.rtp_timestamp(frame.timestamp_us);
        let mut packets = Vec::new();
        let mut inject = key_frame || self.force_params;

        let mut aud = self.header.packet(false, timestamp, AUD_NAL.len());
        aud.extend_from_slice(&AUD_NAL);
        packets.push(Self::frame(aud, timestamp));

        let count = nal_units.len();
        for (i, nal) in nal_units.into_iter().enumerate() {
            let kind = nal_type(nal);
            if kind == NAL_AUD {
                continue;
            }
            if inject && !is_parameter_set(kind) {
                inject = false;
                self.force_params = false;
                for ps in &self.parameter_sets {
                    let mut packet = self.header.packet(false, timestamp, ps.len());
                    packet.extend_from_slice(ps);
                    packets.push(Self::frame(packet, timestamp));
                }
            }
            self.packetize_nal(nal, i + 1 == count, timestamp, &mut packets);
        }

        tracing::trace!(
            nal_count = count,
            rtp_packets = packets.len(),
            frame_bytes = frame.data.len(),
            key_frame,
            seq = self.header.sequence(),
            ts = timestamp,
            "H.265 frame packetized"
        );

        packets
    }

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
            packets.push(Self::frame(packet, timestamp));
            return;
        }

        let h0 = nal_unit[0];
        let h1 = nal_unit[1];
        let kind = (h0 >> 1) & 0x3f;
        let payload_header = [(NAL_FU << 1) | (h0 & 0x81), h1];
        let payload = &nal_unit[2..];

        let max_fragment = MAX_PACKET_SIZE - RTP_HEADER_LENGTH - 3;
        let fragments = payload.len().div_ceil(max_fragment);

        for (i, chunk) in payload.chunks(max_fragment).enumerate() {
            let last = i + 1 == fragments;
            let mut fu_header = kind;
            if i == 0 {
                fu_header |= 0x80;
            }
            if last {
                fu_header |= 0x40;
            }

            let mut packet = self
                .header
                .packet(is_last_nal && last, timestamp, 3 + chunk.len());
            packet.extend_from_slice(&payload_header);
            packet.push(fu_header);
            packet.extend_from_slice(chunk);
            packets.push(Self::frame(packet, timestamp));
        }

        tracing::trace!(nal_type = kind, nal_size = nal_unit.len(), fragments, "H.265 FU fragmented NAL unit");
    }

    fn frame(data: Vec<u8>, timestamp: u32) -> RtpFrame {
        RtpFrame {
            kind: MediaKind::Video,
            data,
            timestamp,
        }
    }
}
