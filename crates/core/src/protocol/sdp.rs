//! SDP (Session Description Protocol) generation (RFC 4566 / RFC 8866).
//!
//! Produces the body of ANNOUNCE requests (client push) and DESCRIBE
//! responses (server). The layout:
//!
//! ```text
//! v=0                                    ← protocol version
//! o=- <id> <id> IN IP4 127.0.0.1         ← origin
//! s=<name>                               ← session name
//! i=<name>                               ← session information
//! c=IN IP4 0.0.0.0                       ← connection address
//! t=0 0                                  ← timing (live stream)
//! a=type:broadcast
//! a=control:*
//! m=video 0 RTP/AVP 96                   ← video media description
//! a=rtpmap:96 H264/90000
//! a=fmtp:96 packetization-mode=1; ...
//! a=control:trackID=0
//! m=audio 0 RTP/AVP 97                   ← optional audio track
//! ...
//! a=control:trackID=1
//! ```
//!
//! Output is a pure function of its inputs, so the body hashed for Digest
//! `auth-int` is byte-identical to the one sent.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::media::annexb::strip_start_code;
use crate::media::rtp::VIDEO_CLOCK_RATE;
use crate::media::{AudioCodec, AudioParams, MediaKind, VideoCodec, VideoParams, aac, g711, opus};

const DEFAULT_PROFILE_LEVEL_ID: &str = "42e01f";

/// Render the session description for a video track and an optional audio track.
pub fn generate_sdp(
    video: &VideoParams,
    audio: Option<&AudioParams>,
    session_id: u32,
    session_name: &str,
) -> String {
    let mut sdp: Vec<String> = vec![
        "v=0".to_string(),
        format!("o=- {session_id} {session_id} IN IP4 127.0.0.1"),
        format!("s={session_name}"),
        format!("i={session_name}"),
        "c=IN IP4 0.0.0.0".to_string(),
        "t=0 0".to_string(),
        "a=type:broadcast".to_string(),
        "a=control:*".to_string(),
    ];

    sdp.extend(video_section(video));
    if let Some(audio) = audio {
        sdp.extend(audio_section(audio));
    }

    tracing::trace!(sdp = %sdp.join("\\r\\n"), "generated SDP");
    format!("{}\r\n", sdp.join("\r\n"))
}

fn video_section(params: &VideoParams) -> Vec<String> {
    let track = MediaKind::Video.track_id();
    let pt = crate::media::h264::PAYLOAD_TYPE;
    let sps = encode(&params.sps);
    let pps = params.pps.as_deref().map(encode).unwrap_or_default();

    let mut lines = vec![format!("m=video 0 RTP/AVP {pt}")];
    match params.codec {
        VideoCodec::H264 => {
            lines.push(format!("a=rtpmap:{pt} H264/{VIDEO_CLOCK_RATE}"));
            lines.push(format!(
                "a=fmtp:{pt} packetization-mode=1; level-asymmetry-allowed=1; profile-level-id={}; sprop-parameter-sets={sps},{pps}",
                profile_level_id(&params.sps)
            ));
        }
        VideoCodec::H265 => {
            lines.push(format!("a=rtpmap:{pt} H265/{VIDEO_CLOCK_RATE}"));
            let vps = params.vps.as_deref().map(encode).unwrap_or_default();
            let parts: Vec<String> = [("sprop-vps", vps), ("sprop-sps", sps), ("sprop-pps", pps)]
                .into_iter()
                .filter(|(_, value)| !value.is_empty())
                .map(|(name, value)| format!("{name}={value}"))
                .collect();
            if !parts.is_empty() {
                lines.push(format!("a=fmtp:{pt} {}", parts.join("; ")));
            }
        }
        VideoCodec::Av1 => {
            lines.push(format!("a=rtpmap:{pt} AV1/{VIDEO_CLOCK_RATE}"));
        }
    }
    lines.push(format!("a=control:trackID={track}"));
    lines
}

fn audio_section(params: &AudioParams) -> Vec<String> {
    let track = MediaKind::Audio.track_id();
    match params.codec {
        AudioCodec::Opus => {
            let pt = opus::PAYLOAD_TYPE;
            vec![
                format!("m=audio 0 RTP/AVP {pt}"),
                format!("a=rtpmap:{pt} OPUS/{}/2", opus::CLOCK_RATE),
                format!("a=fmtp:{pt} sprop-stereo=1; maxplaybackrate=48000; sprop-maxcapturerate=48000"),
                "a=ptime:20".to_string(),
                format!("a=control:trackID={track}"),
            ]
        }
        AudioCodec::Aac => {
            let pt = aac::PAYLOAD_TYPE;
            let channels = params.channels();
            vec![
                format!("m=audio 0 RTP/AVP {pt}"),
                format!("a=rtpmap:{pt} mpeg4-generic/{}/{channels}", params.sample_rate),
                format!(
                    "a=fmtp:{pt} streamtype=5; profile-level-id=16; mode=AAC-hbr; config={}; sizeLength=13; indexLength=3; indexDeltaLength=3; constantDuration=1024",
                    aac::audio_specific_config(params.sample_rate, channels)
                ),
                format!("a=control:trackID={track}"),
            ]
        }
        AudioCodec::G711 => {
            let pt = g711::PAYLOAD_TYPE;
            vec![
                format!("m=audio 0 RTP/AVP {pt}"),
                format!("a=rtpmap:{pt} PCMA/{}/1", g711::CLOCK_RATE),
                format!("a=control:trackID={track}"),
            ]
        }
    }
}

fn encode(nal: &[u8]) -> String {
    BASE64.encode(strip_start_code(nal))
}

/// `profile_idc`, constraint flags and `level_idc` from an H.264 SPS.
fn profile_level_id(sps: &[u8]) -> String {
    match strip_start_code(sps) {
        [_, profile, constraints, level, ..] => format!("{profile:02x}{constraints:02x}{level:02x}"),
        _ => DEFAULT_PROFILE_LEVEL_ID.to_string(),
    }
}
