use rand::RngExt;

/// Link MTU the packet budget is derived from.
pub const MTU: usize = 1028;

/// Largest RTP packet (header included) any packetizer emits.
///
/// Leaves room for the IPv4 (20 bytes) and UDP (8 bytes) headers.
pub const MAX_PACKET_SIZE: usize = MTU - 28;

/// Size of the fixed RTP header.
pub const RTP_HEADER_LENGTH: usize = 12;

/// RTP clock for every video codec (RFC 3551 §5).
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

/// Generic RTP fixed header builder (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Shared by all codec packetizers. It manages:
/// - **Sequence number**: 16-bit, random start, incremented on every packet.
/// - **Clock**: converts microsecond capture timestamps to RTP ticks.
/// - **SSRC**: assigned by the owner of the stream so RTCP can follow it.
///
/// Version is always 2. Padding, extension, and CSRC count are always 0.
#[derive(Debug)]
pub struct RtpHeader {
    /// RTP payload type (7-bit, RFC 3551).
    pub pt: u8,
    /// Synchronization source identifier (RFC 3550 §8.1).
    pub ssrc: u32,
    clock_rate: u32,
    sequence: u16,
}

impl RtpHeader {
    /// Create header state with a random initial sequence number.
    pub fn new(pt: u8, clock_rate: u32) -> Self {
        Self {
            pt,
            ssrc: 0,
            clock_rate,
            sequence: random_sequence(),
        }
    }

    /// Sequence number the next [`write`](Self::write) call will use.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    pub fn set_ssrc(&mut self, ssrc: u32) {
        tracing::debug!(pt = self.pt, ssrc = format_args!("{:#010X}", ssrc), "RTP SSRC set");
        self.ssrc = ssrc;
    }

    pub fn set_initial_sequence(&mut self, sequence: u16) {
        self.sequence = sequence;
    }

    /// Re-randomize the sequence number. The SSRC is left to the caller.
    pub fn reset(&mut self) {
        self.sequence = random_sequence();
    }

    /// Convert a capture timestamp in microseconds to RTP clock ticks.
    ///
    /// The product is computed in 128 bits and truncated to the 32-bit wire
    /// field, so long-running streams wrap the way RTP expects.
    pub fn rtp_timestamp(&self, timestamp_us: u64) -> u32 {
        (timestamp_us as u128 * self.clock_rate as u128 / 1_000_000) as u32
    }

    /// Serialize a 12-byte RTP fixed header and advance the sequence number.
    ///
    /// The `marker` bit (RFC 3550 §5.1) signals the last packet of a frame.
    pub fn write(&mut self, marker: bool, timestamp: u32) -> [u8; RTP_HEADER_LENGTH] {
        let mut header = [0u8; RTP_HEADER_LENGTH];
        header[0] = 2 << 6;
        header[1] = ((marker as u8) << 7) | (self.pt & 0x7f);
        header[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        header[4..8].copy_from_slice(&timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());

        self.sequence = self.sequence.wrapping_add(1);
        header
    }

    /// Start a packet buffer: header written, room reserved for `payload_len`.
    pub fn packet(&mut self, marker: bool, timestamp: u32, payload_len: usize) -> Vec<u8> {
        let mut packet = Vec::with_capacity(RTP_HEADER_LENGTH + payload_len);
        packet.extend_from_slice(&self.write(marker, timestamp));
        packet
    }
}

fn random_sequence() -> u16 {
    rand::rng().random::<u16>()
}

/// A fresh random SSRC (RFC 3550 §8.1).
pub fn random_ssrc() -> u32 {
    rand::rng().random::<u32>()
}

/// Read the sequence number back out of a serialized packet.
pub fn packet_sequence(packet: &[u8]) -> Option<u16> {
    packet.get(2..4).map(|b| u16::from_be_bytes([b[0], b[1]]))
}

/// Read the timestamp back out of a serialized packet.
pub fn packet_timestamp(packet: &[u8]) -> Option<u32> {
    packet
        .get(4..8)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

/// Whether the marker bit is set on a serialized packet.
pub fn packet_marker(packet: &[u8]) -> bool {
    packet.get(1).is_some_and(|b| b & 0x80 != 0)
}
