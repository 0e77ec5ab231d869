//! H.264 Annex-B elementary stream files as a frame source.

use std::path::Path;

use anyhow::{Context, bail};
use bytes::Bytes;
use rtsp::VideoParams;
use rtsp::media::annexb;

const NAL_SLICE: u8 = 1;
const NAL_IDR: u8 = 5;
const NAL_SPS: u8 = 7;
const NAL_PPS: u8 = 8;

pub struct AccessUnit {
    pub data: Bytes,
    pub key_frame: bool,
}

pub struct AnnexBFile {
    pub params: VideoParams,
    pub units: Vec<AccessUnit>,
}

/// Load a raw `.h264` file and cut it into access units.
///
/// Every coded slice closes an access unit, so multi-slice pictures are
/// sent as one frame per slice.
pub fn load(path: &Path) -> anyhow::Result<AnnexBFile> {
    let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    if !annexb::has_start_code(&data) {
        bail!("{} is not an Annex-B stream", path.display());
    }

    let mut sps = None;
    let mut pps = None;
    let mut units = Vec::new();
    let mut current = Vec::new();
    let mut key_frame = false;

    for nal in annexb::split_annexb(&data) {
        let Some(&first) = nal.first() else { continue };
        let nal_type = first & 0x1f;
        match nal_type {
            NAL_SPS => sps = Some(nal.to_vec()),
            NAL_PPS => pps = Some(nal.to_vec()),
            _ => {}
        }
        current.extend_from_slice(&[0, 0, 0, 1]);
        current.extend_from_slice(nal);
        key_frame |= nal_type == NAL_IDR;

        if (NAL_SLICE..=NAL_IDR).contains(&nal_type) {
            units.push(AccessUnit {
                data: Bytes::from(std::mem::take(&mut current)),
                key_frame,
            });
            key_frame = false;
        }
    }

    let (Some(sps), Some(pps)) = (sps, pps) else {
        bail!("{} has no SPS/PPS", path.display());
    };
    if units.is_empty() {
        bail!("{} contains no coded slices", path.display());
    }
    tracing::info!(path = %path.display(), frames = units.len(), "loaded H.264 stream");
    Ok(AnnexBFile {
        params: VideoParams::h264(sps, pps),
        units,
    })
}
