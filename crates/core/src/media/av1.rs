use super::rtp::{MAX_PACKET_SIZE, RTP_HEADER_LENGTH, RtpHeader, VIDEO_CLOCK_RATE};
use super::{MediaFrame, MediaKind, RtpFrame, VideoParams};

pub const PAYLOAD_TYPE: u8 = 96;

const OBU_SEQUENCE_HEADER: u8 = 1;
const OBU_TEMPORAL_DELIMITER: u8 = 2;
const OBU_PADDING: u8 = 15;

const OBU_EXTENSION_FLAG: u8 = 0x04;
const OBU_HAS_SIZE_FLAG: u8 = 0x02;
/// Type and extension bits; forbidden, has-size and reserved bits cleared.
const OBU_WIRE_HEADER_MASK: u8 = 0x7c;

const MAX_LEB128_BYTES: usize = 8;
const MAX_PAYLOAD: usize = MAX_PACKET_SIZE - RTP_HEADER_LENGTH - 1;

const AGGR_Z: u8 = 0x80;
const AGGR_Y: u8 = 0x40;
const AGGR_N: u8 = 0x08;

/// One OBU as found in the encoder's low-overhead bitstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Obu<'a> {
    header: u8,
    extension: Option<u8>,
    payload: &'a [u8],
}

impl Obu<'_> {
    fn obu_type(&self) -> u8 {
        (self.header >> 3) & 0x0f
    }

    /// OBU element as carried in RTP: header without size field, then payload.
    fn to_element(self) -> Vec<u8> {
        let mut element = Vec::with_capacity(2 + self.payload.len());
        element.push(self.header & OBU_WIRE_HEADER_MASK);
        if let Some(ext) = self.extension {
            element.push(ext);
        }
        element.extend_from_slice(self.payload);
        element
    }
}

/// Decode an unsigned LEB128 value. Returns `(value, bytes_used)`.
pub fn read_leb128(data: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    for (i, &byte) in data.iter().enumerate().take(MAX_LEB128_BYTES) {
        value |= ((byte & 0x7f) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

pub fn write_leb128(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

pub fn leb128_len(value: usize) -> usize {
    let mut len = 1;
    let mut v = value >> 7;
    while v != 0 {
        len += 1;
        v >>= 7;
    }
    len
}

/// Split a temporal unit into OBUs. Stops at the first malformed OBU.
fn parse_obus(data: &[u8]) -> Vec<Obu<'_>> {
    let mut obus = Vec::new();
    let mut i = 0usize;

    while i < data.len() {
        let header = data[i];
        i += 1;

        let extension = if header & OBU_EXTENSION_FLAG != 0 {
            let Some(&ext) = data.get(i) else {
                tracing::warn!("AV1 OBU extension header truncated");
                break;
            };
            i += 1;
            Some(ext)
        } else {
            None
        };

        let payload = if header & OBU_HAS_SIZE_FLAG != 0 {
            let Some((size, used)) = read_leb128(&data[i..]) else {
                tracing::warn!(offset = i, "malformed AV1 LEB128 size, stopping OBU parsing");
                break;
            };
            i += used;
            let size = size as usize;
            if size > data.len() - i {
                tracing::warn!(size, remaining = data.len() - i, "AV1 OBU size exceeds buffer");
                break;
            }
            let payload = &data[i..i + size];
            i += size;
            payload
        } else {
            let payload = &data[i..];
            i = data.len();
            payload
        };

        obus.push(Obu {
            header,
            extension,
            payload,
        });
    }
    obus
}

/// AV1 RTP packetizer (AV1 RTP payload specification v1.0).
///
/// Each packet starts with a one-byte aggregation header:
///
/// ```text
/// +-+-+-+-+-+-+-+-+
/// |Z|Y| W |N|-|-|-|
/// +-+-+-+-+-+-+-+-+
/// ```
///
/// - **Z**: first element continues an OBU from the previous packet.
/// - **Y**: last element continues in the next packet.
/// - **W**: number of elements when 1 to 3 (the last one then has no length
///   prefix), 0 when every element is length-prefixed.
/// - **N**: first packet of a coded video sequence (key frame).
///
/// Temporal delimiters and padding OBUs are not transmitted. The most
/// recent sequence header is re-sent ahead of key frames that lack one.
#[derive(Debug)]
pub struct Av1Packetizer {
    header: RtpHeader,
    sequence_header: Option<Vec<u8>>,
}

impl Av1Packetizer {
    pub fn new(params: &VideoParams) -> Self {
        let sequence_header = params.sequence_header.as_deref().and_then(|data| {
            parse_obus(data)
                .into_iter()
                .find(|obu| obu.obu_type() == OBU_SEQUENCE_HEADER)
                .map(Obu::to_element)
        });
        Self {
            header: RtpHeader::new(PAYLOAD_TYPE, VIDEO_CLOCK_RATE),
            sequence_header,
        }
    }

    pub fn reset(&mut self) {
        self.header.reset();
    }

    pub fn header(&self) -> &RtpHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut RtpHeader {
        &mut self.header
    }

    pub fn create_packets(&mut self, frame: &MediaFrame) -> Vec<RtpFrame> {
        let obus = parse_obus(&frame.data);
        let has_sequence_header = obus.iter().any(|o| o.obu_type() == OBU_SEQUENCE_HEADER);
        let key_frame = frame.key_frame || has_sequence_header;

        let mut elements: Vec<Vec<u8>> = Vec::with_capacity(obus.len() + 1);
        if key_frame
            && !has_sequence_header
            && let Some(seq) = &self.sequence_header
        {
            elements.push(seq.clone());
        }
        for obu in obus {
            match obu.obu_type() {
                OBU_TEMPORAL_DELIMITER | OBU_PADDING => continue,
                OBU_SEQUENCE_HEADER => {
                    let element = obu.to_element();
                    self.sequence_header = Some(element.clone());
                    elements.push(element);
                }
                _ => elements.push(obu.to_element()),
            }
        }
        if elements.is_empty() {
            return Vec::new();
        }

        let timestamp = self.header.rtp_timestamp(frame.timestamp_us);
        let payloads = aggregate(&elements, key_frame);
        let count = payloads.len();

        let packets: Vec<RtpFrame> = payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| {
                let mut data = self.header.packet(i + 1 == count, timestamp, payload.len());
                data.extend_from_slice(&payload);
                RtpFrame {
                    kind: MediaKind::Video,
                    data,
                    timestamp,
                }
            })
            .collect();

        tracing::trace!(
            obu_count = elements.len(),
            rtp_packets = packets.len(),
            key_frame,
            ts = timestamp,
            "AV1 temporal unit packetized"
        );
        packets
    }
}

/// Pack OBU elements into packet payloads (aggregation header included).
fn aggregate(elements: &[Vec<u8>], key_frame: bool) -> Vec<Vec<u8>> {
    let mut payloads = Vec::new();
    let mut current: Vec<&[u8]> = Vec::new();
    // Worst-case size with every element length-prefixed.
    let mut current_size = 0usize;
    let mut continues_previous = false;

    for element in elements {
        let mut rest: &[u8] = element;
        loop {
            let available = MAX_PAYLOAD - current_size;
            let needed = leb128_len(rest.len()) + rest.len();
            if needed <= available {
                current.push(rest);
                current_size += needed;
                break;
            }

            if available >= 2 {
                let mut take = available - leb128_len(available);
                while leb128_len(take) + take > available {
                    take -= 1;
                }
                current.push(&rest[..take]);
                rest = &rest[take..];
                payloads.push(finish_packet(
                    &current,
                    continues_previous,
                    true,
                    key_frame && payloads.is_empty(),
                ));
                continues_previous = true;
            } else {
                payloads.push(finish_packet(
                    &current,
                    continues_previous,
                    false,
                    key_frame && payloads.is_empty(),
                ));
                continues_previous = false;
            }
            current.clear();
            current_size = 0;
        }
    }

    if !current.is_empty() {
        payloads.push(finish_packet(
            &current,
            continues_previous,
            false,
            key_frame && payloads.is_empty(),
        ));
    }
    payloads
}

fn finish_packet(elements: &[&[u8]], z: bool, y: bool, n: bool) -> Vec<u8> {
    let count = elements.len();
    let w = if count <= 3 { count as u8 } else { 0 };

    let mut aggregation = w << 4;
    if z {
        aggregation |= AGGR_Z;
    }
    if y {
        aggregation |= AGGR_Y;
    }
    if n {
        aggregation |= AGGR_N;
    }

    let mut payload = Vec::with_capacity(MAX_PAYLOAD + 1);
    payload.push(aggregation);
    for (i, element) in elements.iter().enumerate() {
        if w == 0 || i + 1 < count {
            write_leb128(element.len() as u64, &mut payload);
        }
        payload.extend_from_slice(element);
    }
    payload
}
