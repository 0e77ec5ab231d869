//! Annex-B and length-prefixed NAL unit framing shared by H.264 and H.265.
//!
//! Encoders hand out access units either as Annex-B byte streams
//! (`00 00 01` / `00 00 00 01` start codes) or in the AVCC/HVCC layout
//! where every NAL unit is preceded by a big-endian length. Both are
//! reduced to a list of borrowed NAL unit slices without start codes.

/// Whether the buffer begins with a 3- or 4-byte start code.
pub fn has_start_code(data: &[u8]) -> bool {
    start_code_len(data).is_some()
}

fn start_code_len(data: &[u8]) -> Option<usize> {
    if data.starts_with(&[0, 0, 0, 1]) {
        Some(4)
    } else if data.starts_with(&[0, 0, 1]) {
        Some(3)
    } else {
        None
    }
}

/// Split an Annex-B byte stream into NAL units.
///
/// Scans for start codes (both 4-byte `00 00 00 01` and 3-byte `00 00 01`)
/// and returns the data between them. The start code length is tracked per
/// NAL so boundaries stay correct when both forms are mixed.
pub fn split_annexb(data: &[u8]) -> Vec<&[u8]> {
    // (nal_data_start_index, start_code_length)
    let mut starts: Vec<(usize, usize)> = Vec::new();
    let mut i = 0usize;

    while i + 2 < data.len() {
        if i + 3 < data.len() && data[i..i + 4] == [0, 0, 0, 1] {
            starts.push((i + 4, 4));
            i += 4;
        } else if data[i..i + 3] == [0, 0, 1] {
            starts.push((i + 3, 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut nal_units = Vec::with_capacity(starts.len());
    for (idx, &(start, _)) in starts.iter().enumerate() {
        let end = match starts.get(idx + 1) {
            Some(&(next_start, next_sc_len)) => next_start - next_sc_len,
            None => data.len(),
        };
        if start < end {
            nal_units.push(&data[start..end]);
        }
    }
    nal_units
}

/// Split a length-prefixed (AVCC/HVCC) buffer using `prefix`-byte lengths.
///
/// Returns `None` unless the whole buffer parses into non-empty NAL units.
pub fn split_length_prefixed(data: &[u8], prefix: usize) -> Option<Vec<&[u8]>> {
    let mut nal_units = Vec::new();
    let mut offset = 0usize;

    while offset < data.len() {
        let len_bytes = data.get(offset..offset + prefix)?;
        let len = len_bytes
            .iter()
            .fold(0usize, |acc, &b| (acc << 8) | b as usize);
        offset += prefix;
        if len == 0 || offset + len > data.len() {
            return None;
        }
        nal_units.push(&data[offset..offset + len]);
        offset += len;
    }

    (!nal_units.is_empty()).then_some(nal_units)
}

/// NAL units of one access unit, whatever framing the encoder used.
///
/// Annex-B input is split on start codes. Otherwise 4-byte and then 2-byte
/// length prefixes are tried. A buffer matching neither layout is taken as a
/// single bare NAL unit.
pub fn nal_units(data: &[u8]) -> Vec<&[u8]> {
    if data.is_empty() {
        return Vec::new();
    }
    if has_start_code(data) {
        return split_annexb(data);
    }
    if let Some(nals) = split_length_prefixed(data, 4) {
        return nals;
    }
    if let Some(nals) = split_length_prefixed(data, 2) {
        return nals;
    }
    tracing::trace!(len = data.len(), "no NAL framing detected, treating as bare NAL");
    vec![data]
}

/// Strip a leading start code from a parameter set, if present.
pub fn strip_start_code(data: &[u8]) -> &[u8] {
    match start_code_len(data) {
        Some(len) => &data[len..],
        None => data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_nal_4byte_sc() {
        let data = [0, 0, 0, 1, 0x65, 0xAA, 0xBB];
        assert_eq!(split_annexb(&data), vec![&[0x65, 0xAA, 0xBB][..]]);
    }

    #[test]
    fn single_nal_3byte_sc() {
        let data = [0, 0, 1, 0x67, 0x42, 0x00];
        assert_eq!(split_annexb(&data), vec![&[0x67, 0x42, 0x00][..]]);
    }

    #[test]
    fn mixed_start_codes() {
        let mut data = vec![0, 0, 0, 1, 0x67, 0x42];
        data.extend_from_slice(&[0, 0, 1, 0x68, 0xCE]);
        let nals = split_annexb(&data);
        assert_eq!(nals, vec![&[0x67, 0x42][..], &[0x68, 0xCE][..]]);
    }

    #[test]
    fn empty_and_unframed() {
        assert!(split_annexb(&[]).is_empty());
        assert!(split_annexb(&[0xFF, 0xFE]).is_empty());
        assert!(nal_units(&[]).is_empty());
    }

    #[test]
    fn avcc_four_byte_lengths() {
        let data = [0, 0, 0, 2, 0x65, 0x01, 0, 0, 0, 1, 0x41];
        let nals = nal_units(&data);
        assert_eq!(nals, vec![&[0x65, 0x01][..], &[0x41][..]]);
    }

    #[test]
    fn avcc_two_byte_lengths() {
        let data = [0, 3, 0x65, 0x01, 0x02, 0, 1, 0x41];
        let nals = nal_units(&data);
        assert_eq!(nals, vec![&[0x65, 0x01, 0x02][..], &[0x41][..]]);
    }

    #[test]
    fn length_prefix_must_cover_buffer() {
        assert!(split_length_prefixed(&[0, 0, 0, 9, 0x65], 4).is_none());
        assert!(split_length_prefixed(&[0, 0, 0, 0], 4).is_none());
    }

    #[test]
    fn bare_nal_fallback() {
        let data = [0x65, 0xFF, 0xFF, 0xFF, 0xFF];
        assert_eq!(nal_units(&data), vec![&data[..]]);
    }

    #[test]
    fn strip_leading_start_code() {
        assert_eq!(strip_start_code(&[0, 0, 0, 1, 0x67]), &[0x67]);
        assert_eq!(strip_start_code(&[0x67, 0x42]), &[0x67, 0x42]);
    }
}
