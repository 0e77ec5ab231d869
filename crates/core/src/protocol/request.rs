use crate::error::{ParseErrorKind, RtspError};

use super::Method;

/// A parsed RTSP request (RFC 2326 §6).
///
/// RTSP requests follow HTTP/1.1 syntax:
///
/// ```text
/// Method SP Request-URI SP RTSP-Version CRLF
/// *(Header: Value CRLF)
/// CRLF
/// [body]
/// ```
///
/// Header lookup is case-insensitive per RFC 2326 §4.2.
#[derive(Debug)]
pub struct RtspRequest {
    pub method: Method,
    /// Method token as received, kept for logging unknown methods.
    pub method_name: String,
    /// Request-URI (e.g. `rtsp://host:port/stream/trackID=0`).
    pub uri: String,
    /// Protocol version (expected: `RTSP/1.0`).
    pub version: String,
    /// Headers as ordered (name, value) pairs. Names are stored as-received.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RtspRequest {
    /// Parse an RTSP request from its text representation.
    ///
    /// Everything after the blank line is taken as the body. Returns
    /// [`RtspError::Parse`] on malformed input.
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let (head, body) = match raw.find("\r\n\r\n") {
            Some(pos) => (&raw[..pos], &raw[pos + 4..]),
            None => match raw.find("\n\n") {
                Some(pos) => (&raw[..pos], &raw[pos + 2..]),
                None => (raw, ""),
            },
        };
        let mut lines = head.lines();

        let request_line = lines
            .next()
            .filter(|line| !line.trim().is_empty())
            .ok_or(RtspError::parse(ParseErrorKind::EmptyMessage))?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        let [method_name, uri, version] = parts[..] else {
            return Err(RtspError::parse(ParseErrorKind::InvalidRequestLine));
        };

        if version != super::RTSP_VERSION {
            tracing::warn!(version, "peer sent non-RTSP/1.0 version");
        }

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or(RtspError::parse(ParseErrorKind::InvalidHeader))?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        Ok(RtspRequest {
            method: Method::parse(method_name),
            method_name: method_name.to_string(),
            uri: uri.to_string(),
            version: version.to_string(),
            headers,
            body: body.to_string(),
        })
    }

    /// Look up a header value by name (case-insensitive, per RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The CSeq header (RFC 2326 §12.17), or `None` when absent or not a number.
    pub fn cseq(&self) -> Option<u32> {
        self.get_header("CSeq")?.parse().ok()
    }

    /// Session id from the Session header, without `;timeout=` parameters.
    pub fn session_id(&self) -> Option<&str> {
        self.get_header("Session")
            .map(|s| s.split(';').next().unwrap_or(s).trim())
            .filter(|s| !s.is_empty())
    }

    /// Track number from a `.../trackID=n` request URI.
    pub fn track_id(&self) -> Option<u8> {
        let (_, tail) = self.uri.rsplit_once("trackID=")?;
        let digits: String = tail.chars().take_while(char::is_ascii_digit).collect();
        digits.parse().ok()
    }
}
