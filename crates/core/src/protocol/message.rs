//! Reading whole RTSP messages off a control connection.
//!
//! On a TCP-interleaved session the control stream mixes text messages with
//! binary frames (RFC 2326 §10.12):
//!
//! ```text
//! +------+---------+----------------+-----------------+
//! | 0x24 | channel | length (16 BE) | payload ...     |
//! +------+---------+----------------+-----------------+
//! ```
//!
//! [`read_message`] discards those frames and returns the next text message.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::{ParseErrorKind, Result, RtspError};

/// Upper bound on the status/request line plus headers.
pub const MAX_HEADER_SIZE: usize = 16 * 1024;
/// Upper bound on a `Content-Length` body.
pub const MAX_BODY_SIZE: usize = 256 * 1024;

const INTERLEAVED_MAGIC: u8 = b'$';

/// Read the next RTSP message (start line, headers, blank line and body).
///
/// `allowed_channels` restricts which interleaved channels may appear before
/// the message: `None` skips frames on any channel, `Some(&[..])` fails with
/// [`ParseErrorKind::UnexpectedChannel`] on a channel outside the set.
///
/// Returns `Ok(None)` when the peer closed the connection cleanly between
/// messages.
pub async fn read_message<R>(reader: &mut R, allowed_channels: Option<&[u8]>) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let first = {
            let buf = reader.fill_buf().await?;
            match buf.first() {
                Some(&b) => b,
                None => return Ok(None),
            }
        };

        match first {
            INTERLEAVED_MAGIC => skip_interleaved(reader, allowed_channels).await?,
            b'\r' | b'\n' => reader.consume(1),
            _ => break,
        }
    }

    let mut head = String::new();
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        let n = read_limited_line(reader, &mut line, MAX_HEADER_SIZE - head.len()).await?;
        if n == 0 {
            return Err(RtspError::ConnectionClosed);
        }
        head.push_str(&line);

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        if let Some((name, value)) = trimmed.split_once(':')
            && name.trim().eq_ignore_ascii_case("Content-Length")
        {
            content_length = value
                .trim()
                .parse()
                .map_err(|_| RtspError::parse(ParseErrorKind::InvalidHeader))?;
        }
    }

    if content_length > MAX_BODY_SIZE {
        return Err(RtspError::parse(ParseErrorKind::TooLarge));
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await.map_err(eof_as_closed)?;
    let body = String::from_utf8(body).map_err(|_| RtspError::parse(ParseErrorKind::InvalidEncoding))?;

    let mut message = normalize_head(&head);
    message.push_str(&body);
    tracing::trace!(len = message.len(), "read RTSP message");
    Ok(Some(message))
}

async fn skip_interleaved<R>(reader: &mut R, allowed_channels: Option<&[u8]>) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await.map_err(eof_as_closed)?;
    let channel = header[1];
    let len = u16::from_be_bytes([header[2], header[3]]) as u64;

    if let Some(allowed) = allowed_channels
        && !allowed.contains(&channel)
    {
        tracing::warn!(channel, len, "interleaved frame on unexpected channel");
        return Err(RtspError::parse(ParseErrorKind::UnexpectedChannel));
    }

    let skipped = tokio::io::copy(&mut (&mut *reader).take(len), &mut tokio::io::sink()).await?;
    if skipped < len {
        return Err(RtspError::ConnectionClosed);
    }
    tracing::trace!(channel, len, "skipped interleaved frame");
    Ok(())
}

/// `read_line` that fails once `limit` bytes have been consumed without a newline.
async fn read_limited_line<R>(reader: &mut R, line: &mut String, limit: usize) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut raw = Vec::new();
    let n = (&mut *reader)
        .take(limit as u64 + 1)
        .read_until(b'\n', &mut raw)
        .await?;
    if n > limit {
        return Err(RtspError::parse(ParseErrorKind::TooLarge));
    }
    if n > 0 && raw.last() != Some(&b'\n') {
        return Err(RtspError::ConnectionClosed);
    }
    let text = std::str::from_utf8(&raw).map_err(|_| RtspError::parse(ParseErrorKind::InvalidEncoding))?;
    line.push_str(text);
    Ok(n)
}

/// Rewrite bare `\n` line endings as `\r\n` so downstream parsers see one form.
fn normalize_head(head: &str) -> String {
    let mut out = String::with_capacity(head.len() + 8);
    for line in head.split_inclusive('\n') {
        out.push_str(line.trim_end_matches(['\r', '\n']));
        out.push_str("\r\n");
    }
    out
}

fn eof_as_closed(e: std::io::Error) -> RtspError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        RtspError::ConnectionClosed
    } else {
        RtspError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn read_all(input: &[u8], allowed: Option<&[u8]>) -> Vec<Result<Option<String>>> {
        let mut reader = BufReader::new(input);
        let mut out = Vec::new();
        loop {
            let r = read_message(&mut reader, allowed).await;
            let stop = !matches!(r, Ok(Some(_)));
            out.push(r);
            if stop {
                break;
            }
        }
        out
    }

    #[tokio::test]
    async fn reads_message_with_body() {
        let input = b"ANNOUNCE rtsp://h/s RTSP/1.0\r\nCSeq: 2\r\nContent-Length: 5\r\n\r\nv=0\r\nOPTIONS * RTSP/1.0\r\nCSeq: 3\r\n\r\n";
        let msgs = read_all(input, None).await;
        assert_eq!(msgs.len(), 3);
        assert_eq!(
            msgs[0].as_ref().unwrap().as_deref(),
            Some("ANNOUNCE rtsp://h/s RTSP/1.0\r\nCSeq: 2\r\nContent-Length: 5\r\n\r\nv=0\r\n")
        );
        assert!(msgs[1].as_ref().unwrap().as_ref().unwrap().starts_with("OPTIONS"));
        assert!(matches!(msgs[2], Ok(None)));
    }

    #[tokio::test]
    async fn skips_interleaved_frames() {
        let mut input = vec![0x24, 1, 0, 3, 0xAA, 0xBB, 0xCC];
        input.extend_from_slice(b"RTSP/1.0 200 OK\r\nCSeq: 5\r\n\r\n");
        let mut reader = BufReader::new(&input[..]);
        let msg = read_message(&mut reader, Some(&[0, 1])).await.unwrap().unwrap();
        assert!(msg.starts_with("RTSP/1.0 200 OK"));
    }

    #[tokio::test]
    async fn rejects_disallowed_channel() {
        let input = [0x24u8, 5, 0, 1, 0x00];
        let mut reader = BufReader::new(&input[..]);
        let err = read_message(&mut reader, Some(&[])).await.unwrap_err();
        assert!(matches!(
            err,
            RtspError::Parse {
                kind: ParseErrorKind::UnexpectedChannel
            }
        ));
    }

    #[tokio::test]
    async fn skips_stray_line_endings() {
        let input = b"\r\n\r\nOPTIONS * RTSP/1.0\nCSeq: 1\n\n";
        let mut reader = BufReader::new(&input[..]);
        let msg = read_message(&mut reader, None).await.unwrap().unwrap();
        assert_eq!(msg, "OPTIONS * RTSP/1.0\r\nCSeq: 1\r\n\r\n");
    }

    #[tokio::test]
    async fn truncated_message_is_closed() {
        let input = b"OPTIONS * RTSP/1.0\r\nCSeq: 1\r\n";
        let mut reader = BufReader::new(&input[..]);
        let err = read_message(&mut reader, None).await.unwrap_err();
        assert!(matches!(err, RtspError::ConnectionClosed));

        let input = b"ANNOUNCE * RTSP/1.0\r\nContent-Length: 10\r\n\r\nv=0";
        let mut reader = BufReader::new(&input[..]);
        let err = read_message(&mut reader, None).await.unwrap_err();
        assert!(matches!(err, RtspError::ConnectionClosed));
    }

    #[tokio::test]
    async fn oversized_header_rejected() {
        let mut input = b"OPTIONS * RTSP/1.0\r\nX-Pad: ".to_vec();
        input.extend(std::iter::repeat_n(b'a', MAX_HEADER_SIZE));
        input.extend_from_slice(b"\r\n\r\n");
        let mut reader = BufReader::new(&input[..]);
        let err = read_message(&mut reader, None).await.unwrap_err();
        assert!(matches!(err, RtspError::Parse { kind: ParseErrorKind::TooLarge }));
    }

    #[tokio::test]
    async fn oversized_body_rejected() {
        let input = format!("ANNOUNCE * RTSP/1.0\r\nContent-Length: {}\r\n\r\n", MAX_BODY_SIZE + 1);
        let mut reader = BufReader::new(input.as_bytes());
        let err = read_message(&mut reader, None).await.unwrap_err();
        assert!(matches!(err, RtspError::Parse { kind: ParseErrorKind::TooLarge }));
    }
}
