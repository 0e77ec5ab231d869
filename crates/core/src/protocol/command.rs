use crate::error::{ParseErrorKind, Result, RtspError};

use super::transport::TransportHeader;
use super::{Method, find_header};

/// A parsed RTSP response, tagged with the request method it answers.
///
/// `text` holds the complete raw response (status line, headers, blank
/// line and body) so callers can pull further headers or report it in
/// [`RtspError::Failed`].
#[derive(Debug, Clone)]
pub struct Command {
    pub method: Method,
    pub cseq: Option<u32>,
    pub status: u16,
    pub text: String,
}

impl Command {
    /// Parse the status line (`RTSP/1.0 <code> <reason>`) and CSeq.
    pub fn parse(method: Method, text: String) -> Result<Self> {
        let status_line = text
            .lines()
            .next()
            .ok_or(RtspError::parse(ParseErrorKind::EmptyMessage))?;

        let mut parts = status_line.split_whitespace();
        let status = match (parts.next(), parts.next()) {
            (Some(version), Some(code)) if version.starts_with("RTSP/") => code
                .parse::<u16>()
                .map_err(|_| RtspError::parse(ParseErrorKind::InvalidStatusLine))?,
            _ => return Err(RtspError::parse(ParseErrorKind::InvalidStatusLine)),
        };

        let cseq = find_header(&text, "CSeq").and_then(|v| v.parse().ok());
        Ok(Self {
            method,
            cseq,
            status,
            text,
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.text, name)
    }

    /// Session id without parameters.
    pub fn session_id(&self) -> Option<&str> {
        self.header("Session")
            .and_then(|v| v.split(';').next())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// `timeout=` parameter of the Session header, when positive.
    pub fn session_timeout(&self) -> Option<u32> {
        self.header("Session")?
            .split(';')
            .skip(1)
            .filter_map(|p| p.trim().split_once('='))
            .find(|(k, _)| k.trim().eq_ignore_ascii_case("timeout"))
            .and_then(|(_, v)| v.trim().parse::<u32>().ok())
            .filter(|&t| t > 0)
    }

    pub fn transport(&self) -> Option<TransportHeader> {
        TransportHeader::parse(self.header("Transport")?)
    }

    /// The Digest `WWW-Authenticate` challenge if the server offered one,
    /// otherwise the first challenge of any scheme.
    pub fn www_authenticate(&self) -> Option<&str> {
        let challenges: Vec<&str> = self
            .text
            .lines()
            .skip(1)
            .take_while(|line| !line.is_empty())
            .filter_map(|line| {
                let (key, value) = line.split_once(':')?;
                key.trim()
                    .eq_ignore_ascii_case("WWW-Authenticate")
                    .then(|| value.trim())
            })
            .collect();

        challenges
            .iter()
            .find(|c| c.get(..6).is_some_and(|scheme| scheme.eq_ignore_ascii_case("digest")))
            .or_else(|| challenges.first())
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Command {
        Command::parse(Method::Setup, text.to_string()).unwrap()
    }

    #[test]
    fn status_and_cseq() {
        let cmd = parse("RTSP/1.0 454 Session Not Found\r\nCSeq: 7\r\n\r\n");
        assert_eq!(cmd.status, 454);
        assert_eq!(cmd.cseq, Some(7));
    }

    #[test]
    fn session_and_timeout() {
        let cmd = parse("RTSP/1.0 200 OK\r\nCSeq: 3\r\nSession: 12345678;timeout=30\r\n\r\n");
        assert_eq!(cmd.session_id(), Some("12345678"));
        assert_eq!(cmd.session_timeout(), Some(30));

        let zero = parse("RTSP/1.0 200 OK\r\nSession: abc;timeout=0\r\n\r\n");
        assert_eq!(zero.session_timeout(), None);
    }

    #[test]
    fn transport_header() {
        let cmd = parse(
            "RTSP/1.0 200 OK\r\nCSeq: 4\r\nTransport: RTP/AVP;unicast;client_port=5000-5001;server_port=6000-6001\r\n\r\n",
        );
        let th = cmd.transport().unwrap();
        assert_eq!(th.server_port, Some((6000, 6001)));
    }

    #[test]
    fn prefers_digest_challenge() {
        let cmd = parse(
            "RTSP/1.0 401 Unauthorized\r\nCSeq: 2\r\n\
             WWW-Authenticate: Basic realm=\"x\"\r\n\
             WWW-Authenticate: Digest realm=\"x\", nonce=\"n\"\r\n\r\n",
        );
        assert_eq!(cmd.www_authenticate(), Some("Digest realm=\"x\", nonce=\"n\""));
    }

    #[test]
    fn non_ascii_challenge_does_not_panic() {
        let cmd = parse("RTSP/1.0 401 X\r\nCSeq: 1\r\nWWW-Authenticate: Basicé realm\r\n\r\n");
        assert_eq!(cmd.www_authenticate(), Some("Basicé realm"));
    }

    #[test]
    fn bad_status_line() {
        assert!(Command::parse(Method::Options, "HTTP/1.1 200 OK\r\n\r\n".into()).is_err());
        assert!(Command::parse(Method::Options, "RTSP/1.0 abc\r\n\r\n".into()).is_err());
        assert!(Command::parse(Method::Options, String::new()).is_err());
    }
}
