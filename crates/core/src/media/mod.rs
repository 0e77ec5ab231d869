//! Media frames, codec parameters and RTP packetization.
//!
//! Encoded access units enter the engine as [`MediaFrame`]s and leave it as
//! ready-to-send [`RtpFrame`]s produced by a codec-specific [`Packetizer`].
//!
//! ## RTP overview (RFC 3550)
//!
//! Each encoded frame is split into one or more RTP packets. Every RTP
//! packet carries a 12-byte fixed header ([`rtp::RtpHeader`]) containing:
//!
//! - **Sequence number** (16-bit, wrapping) for reordering and loss detection.
//! - **Timestamp** (32-bit) in the codec's media clock.
//! - **SSRC** (32-bit) identifying the sender.
//! - **Marker bit**, set on the last packet of an access unit.
//!
//! ## Supported codecs
//!
//! | Codec | Module | Payload format | PT | Clock |
//! |-------|--------|----------------|----|-------|
//! | H.264 | [`h264`] | [RFC 6184](https://tools.ietf.org/html/rfc6184) | 96 | 90000 |
//! | H.265 | [`h265`] | [RFC 7798](https://tools.ietf.org/html/rfc7798) | 96 | 90000 |
//! | AV1 | [`av1`] | [AV1 RTP](https://aomediacodec.github.io/av1-rtp-spec/) | 96 | 90000 |
//! | AAC | [`aac`] | [RFC 3640](https://tools.ietf.org/html/rfc3640) | 97 | sample rate |
//! | Opus | [`opus`] | [RFC 7587](https://tools.ietf.org/html/rfc7587) | 97 | 48000 |
//! | G.711 A-law | [`g711`] | [RFC 3551](https://tools.ietf.org/html/rfc3551) | 8 | 8000 |

use std::fmt;

use bytes::Bytes;

pub mod aac;
pub mod annexb;
pub mod av1;
pub mod g711;
pub mod h264;
pub mod h265;
pub mod opus;
pub mod rtp;

/// Which track a frame or packet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    /// SDP/SETUP track number: `trackID=0` is video, `trackID=1` is audio.
    pub fn track_id(self) -> u8 {
        match self {
            Self::Video => 0,
            Self::Audio => 1,
        }
    }

    pub fn from_track_id(track: u8) -> Option<Self> {
        match track {
            0 => Some(Self::Video),
            1 => Some(Self::Audio),
            _ => None,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => f.write_str("video"),
            Self::Audio => f.write_str("audio"),
        }
    }
}

/// Release hook of a [`MediaFrame`].
///
/// Runs exactly once, when the frame is dropped, no matter which path the
/// frame took through the engine.
pub struct FrameRelease(Option<Box<dyn FnOnce() + Send + Sync>>);

impl FrameRelease {
    pub fn new(f: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self(Some(Box::new(f)))
    }
}

impl Drop for FrameRelease {
    fn drop(&mut self) {
        if let Some(release) = self.0.take() {
            release();
        }
    }
}

impl fmt::Debug for FrameRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FrameRelease")
    }
}

/// One encoded access unit handed to the engine by the encoder.
///
/// `data` is the exact encoded payload. For video that is an Annex-B or
/// length-prefixed access unit, for AAC an ADTS or raw frame, for G.711 raw
/// PCM16LE samples. Dropping the frame runs its release hook.
#[derive(Debug)]
pub struct MediaFrame {
    pub kind: MediaKind,
    pub data: Bytes,
    pub timestamp_us: u64,
    pub key_frame: bool,
    release: Option<FrameRelease>,
}

impl MediaFrame {
    pub fn video(data: impl Into<Bytes>, timestamp_us: u64, key_frame: bool) -> Self {
        Self {
            kind: MediaKind::Video,
            data: data.into(),
            timestamp_us,
            key_frame,
            release: None,
        }
    }

    pub fn audio(data: impl Into<Bytes>, timestamp_us: u64) -> Self {
        Self {
            kind: MediaKind::Audio,
            data: data.into(),
            timestamp_us,
            key_frame: false,
            release: None,
        }
    }

    /// Attach the callback that returns the encoder buffer.
    pub fn with_release(mut self, f: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.release = Some(FrameRelease::new(f));
        self
    }

    /// Release the frame now. Equivalent to dropping it.
    pub fn release(self) {}

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// One complete RTP packet (12-byte header plus payload).
#[derive(Debug, Clone)]
pub struct RtpFrame {
    pub kind: MediaKind,
    pub data: Vec<u8>,
    /// RTP timestamp written in the header.
    pub timestamp: u32,
}

impl RtpFrame {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes after the fixed header, as counted by RTCP sender reports.
    pub fn payload_len(&self) -> usize {
        self.data.len().saturating_sub(rtp::RTP_HEADER_LENGTH)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
    H265,
    Av1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Aac,
    Opus,
    G711,
}

/// Out-of-band video codec configuration.
///
/// Parameter sets are stored without start codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoParams {
    pub codec: VideoCodec,
    pub sps: Vec<u8>,
    pub pps: Option<Vec<u8>>,
    pub vps: Option<Vec<u8>>,
    /// AV1 sequence header OBU, including its OBU header.
    pub sequence_header: Option<Vec<u8>>,
}

impl VideoParams {
    pub fn h264(sps: impl Into<Vec<u8>>, pps: impl Into<Vec<u8>>) -> Self {
        Self {
            codec: VideoCodec::H264,
            sps: sps.into(),
            pps: Some(pps.into()),
            vps: None,
            sequence_header: None,
        }
    }

    pub fn h265(
        vps: impl Into<Vec<u8>>,
        sps: impl Into<Vec<u8>>,
        pps: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            codec: VideoCodec::H265,
            sps: sps.into(),
            pps: Some(pps.into()),
            vps: Some(vps.into()),
            sequence_header: None,
        }
    }

    pub fn av1(sequence_header: Option<Vec<u8>>) -> Self {
        Self {
            codec: VideoCodec::Av1,
            sps: Vec::new(),
            pps: None,
            vps: None,
            sequence_header,
        }
    }

    /// H.264 needs a PPS, H.265 a PPS and a VPS, AV1 nothing.
    pub fn is_valid(&self) -> bool {
        match self.codec {
            VideoCodec::H264 => self.pps.is_some(),
            VideoCodec::H265 => self.pps.is_some() && self.vps.is_some(),
            VideoCodec::Av1 => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioParams {
    pub codec: AudioCodec,
    pub sample_rate: u32,
    pub stereo: bool,
}

impl AudioParams {
    pub fn new(codec: AudioCodec, sample_rate: u32, stereo: bool) -> Self {
        Self {
            codec,
            sample_rate,
            stereo,
        }
    }

    pub fn channels(&self) -> u8 {
        if self.stereo { 2 } else { 1 }
    }
}

/// Codec-specific RTP packetizer.
///
/// The set of codecs is closed, so dispatch is a plain `match`. Each variant
/// composes an [`rtp::RtpHeader`] rather than reimplementing header
/// serialization.
#[derive(Debug)]
pub enum Packetizer {
    H264(h264::H264Packetizer),
    H265(h265::H265Packetizer),
    Av1(av1::Av1Packetizer),
    Aac(aac::AacPacketizer),
    Opus(opus::OpusPacketizer),
    G711(g711::G711Packetizer),
}

impl Packetizer {
    pub fn video(params: &VideoParams) -> Self {
        match params.codec {
            VideoCodec::H264 => Self::H264(h264::H264Packetizer::new(params)),
            VideoCodec::H265 => Self::H265(h265::H265Packetizer::new(params)),
            VideoCodec::Av1 => Self::Av1(av1::Av1Packetizer::new(params)),
        }
    }

    pub fn audio(params: &AudioParams) -> Self {
        match params.codec {
            AudioCodec::Aac => Self::Aac(aac::AacPacketizer::new(params.sample_rate)),
            AudioCodec::Opus => Self::Opus(opus::OpusPacketizer::new(params.sample_rate)),
            AudioCodec::G711 => Self::G711(g711::G711Packetizer::new()),
        }
    }

    /// Packetize one frame. An empty result is valid (e.g. waiting for a key frame).
    pub fn create_packets(&mut self, frame: &MediaFrame) -> Vec<RtpFrame> {
        match self {
            Self::H264(p) => p.create_packets(frame),
            Self::H265(p) => p.create_packets(frame),
            Self::Av1(p) => p.create_packets(frame),
            Self::Aac(p) => p.create_packets(frame),
            Self::Opus(p) => p.create_packets(frame),
            Self::G711(p) => p.create_packets(frame),
        }
    }

    /// Re-randomize the sequence number and drop per-stream state.
    pub fn reset(&mut self) {
        match self {
            Self::H264(p) => p.reset(),
            Self::H265(p) => p.reset(),
            Self::Av1(p) => p.reset(),
            Self::Aac(p) => p.header_mut().reset(),
            Self::Opus(p) => p.reset(),
            Self::G711(p) => p.header_mut().reset(),
        }
    }

    /// Drop frames until the next key frame. Only video codecs with a
    /// decoder-refresh dependency (H.264, H.265) are gated.
    pub fn wait_for_key_frame(&mut self) {
        match self {
            Self::H264(p) => p.wait_for_key_frame(),
            Self::H265(p) => p.wait_for_key_frame(),
            _ => {}
        }
    }

    /// Emit parameter sets ahead of the next frame even if it is not a key frame.
    pub fn force_parameter_sets(&mut self) {
        match self {
            Self::H264(p) => p.force_parameter_sets(),
            Self::H265(p) => p.force_parameter_sets(),
            _ => {}
        }
    }

    pub fn set_ssrc(&mut self, ssrc: u32) {
        self.header_mut().set_ssrc(ssrc);
    }

    pub fn set_initial_sequence(&mut self, sequence: u16) {
        self.header_mut().set_initial_sequence(sequence);
    }

    pub fn ssrc(&self) -> u32 {
        self.header().ssrc
    }

    /// Sequence number of the next packet (for `RTP-Info`).
    pub fn next_sequence(&self) -> u16 {
        self.header().sequence()
    }

    pub fn clock_rate(&self) -> u32 {
        self.header().clock_rate()
    }

    pub fn payload_type(&self) -> u8 {
        self.header().pt
    }

    pub fn rtp_timestamp(&self, timestamp_us: u64) -> u32 {
        self.header().rtp_timestamp(timestamp_us)
    }

    fn header(&self) -> &rtp::RtpHeader {
        match self {
            Self::H264(p) => p.header(),
            Self::H265(p) => p.header(),
            Self::Av1(p) => p.header(),
            Self::Aac(p) => p.header(),
            Self::Opus(p) => p.header(),
            Self::G711(p) => p.header(),
        }
    }

    fn header_mut(&mut self) -> &mut rtp::RtpHeader {
        match self {
            Self::H264(p) => p.header_mut(),
            Self::H265(p) => p.header_mut(),
            Self::Av1(p) => p.header_mut(),
            Self::Aac(p) => p.header_mut(),
            Self::Opus(p) => p.header_mut(),
            Self::G711(p) => p.header_mut(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn release_runs_once_on_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let frame = MediaFrame::video(vec![0u8; 4], 0, true).with_release(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        frame.release();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn video_params_validity() {
        assert!(VideoParams::h264(vec![0x67], vec![0x68]).is_valid());
        let mut h264 = VideoParams::h264(vec![0x67], vec![0x68]);
        h264.pps = None;
        assert!(!h264.is_valid());

        let mut h265 = VideoParams::h265(vec![0x40], vec![0x42], vec![0x44]);
        assert!(h265.is_valid());
        h265.vps = None;
        assert!(!h265.is_valid());

        assert!(VideoParams::av1(None).is_valid());
    }

    #[test]
    fn track_ids() {
        assert_eq!(MediaKind::Video.track_id(), 0);
        assert_eq!(MediaKind::from_track_id(1), Some(MediaKind::Audio));
        assert_eq!(MediaKind::from_track_id(2), None);
    }

    #[test]
    fn packetizer_metadata() {
        let video = Packetizer::video(&VideoParams::h264(vec![0x67, 0x42, 0, 0x1f], vec![0x68]));
        assert_eq!(video.payload_type(), 96);
        assert_eq!(video.clock_rate(), 90_000);

        let aac = Packetizer::audio(&AudioParams::new(AudioCodec::Aac, 44_100, true));
        assert_eq!(aac.payload_type(), 97);
        assert_eq!(aac.clock_rate(), 44_100);

        let g711 = Packetizer::audio(&AudioParams::new(AudioCodec::G711, 8_000, false));
        assert_eq!(g711.payload_type(), 8);
        assert_eq!(g711.clock_rate(), 8_000);
    }

    #[test]
    fn set_ssrc_reaches_header() {
        let mut p = Packetizer::audio(&AudioParams::new(AudioCodec::Opus, 48_000, true));
        p.set_ssrc(0x1234_5678);
        assert_eq!(p.ssrc(), 0x1234_5678);
        p.reset();
        assert_eq!(p.ssrc(), 0x1234_5678);
    }
}
