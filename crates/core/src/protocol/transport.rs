use std::fmt;

/// The RTSP `Transport` header (RFC 2326 §12.39).
///
/// Only the first comma-separated alternative is considered. Recognised
/// parameters are parsed into fields; anything else is kept verbatim in
/// [`extensions`](Self::extensions) so the header can be echoed back.
///
/// ## Wire format example
///
/// ```text
/// Client → Server:
///   Transport: RTP/AVP;unicast;client_port=8000-8001
///
/// Server → Client:
///   Transport: RTP/AVP;unicast;client_port=8000-8001;server_port=5000-5001
/// ```
///
/// ## Examples
///
/// ```
/// use rtsp::protocol::TransportHeader;
///
/// let th = TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001").unwrap();
/// assert_eq!(th.client_port, Some((8000, 8001)));
///
/// let tcp = TransportHeader::parse("RTP/AVP/TCP;unicast;interleaved=0-1").unwrap();
/// assert!(tcp.is_tcp());
/// assert_eq!(tcp.interleaved, Some((0, 1)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportHeader {
    /// Transport protocol and profile, e.g. `RTP/AVP` or `RTP/AVP/TCP`.
    pub profile: String,
    pub unicast: bool,
    /// Interleaved channel pair (RTP, RTCP) on the control connection.
    pub interleaved: Option<(u8, u8)>,
    pub client_port: Option<(u16, u16)>,
    pub server_port: Option<(u16, u16)>,
    pub mode: Option<String>,
    pub mode_quoted: bool,
    pub extensions: Vec<String>,
}

impl TransportHeader {
    pub fn parse(header: &str) -> Option<Self> {
        let first = header.split(',').next()?.trim();
        let mut tokens = first.split(';').map(str::trim).filter(|t| !t.is_empty());
        let profile = tokens.next()?.to_string();

        let mut th = TransportHeader {
            profile,
            unicast: true,
            interleaved: None,
            client_port: None,
            server_port: None,
            mode: None,
            mode_quoted: false,
            extensions: Vec::new(),
        };

        for token in tokens {
            let (key, value) = token.split_once('=').unwrap_or((token, ""));
            match key.to_ascii_lowercase().as_str() {
                "unicast" => th.unicast = true,
                "multicast" => th.unicast = false,
                "interleaved" => th.interleaved = parse_pair(value),
                "client_port" => th.client_port = parse_pair(value),
                "server_port" => th.server_port = parse_pair(value),
                "mode" => {
                    let raw = value.trim();
                    th.mode_quoted = raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"');
                    th.mode = Some(raw.trim_matches('"').to_string());
                }
                _ => th.extensions.push(token.to_string()),
            }
        }

        Some(th)
    }

    /// TCP-interleaved delivery was requested or granted.
    pub fn is_tcp(&self) -> bool {
        self.profile.to_ascii_uppercase().contains("TCP") || self.interleaved.is_some()
    }

    pub fn with_server_port(mut self, rtp: u16, rtcp: u16) -> Self {
        self.server_port = Some((rtp, rtcp));
        self
    }

    pub fn with_interleaved(mut self, rtp: u8, rtcp: u8) -> Self {
        self.interleaved = Some((rtp, rtcp));
        self
    }
}

/// `a-b`, or a single `a` meaning `a-(a+1)`.
fn parse_pair<T>(value: &str) -> Option<(T, T)>
where
    T: std::str::FromStr + Copy + TryFrom<u32>,
    u32: From<T>,
{
    match value.split_once('-') {
        Some((a, b)) => Some((a.trim().parse().ok()?, b.trim().parse().ok()?)),
        None => {
            let a: T = value.trim().parse().ok()?;
            let next = T::try_from(u32::from(a) + 1).ok()?;
            Some((a, next))
        }
    }
}

impl fmt::Display for TransportHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.profile)?;
        f.write_str(if self.unicast { ";unicast" } else { ";multicast" })?;
        if let Some((a, b)) = self.interleaved {
            write!(f, ";interleaved={a}-{b}")?;
        }
        if let Some((a, b)) = self.client_port {
            write!(f, ";client_port={a}-{b}")?;
        }
        if let Some((a, b)) = self.server_port {
            write!(f, ";server_port={a}-{b}")?;
        }
        if let Some(mode) = &self.mode {
            if self.mode_quoted {
                write!(f, ";mode=\"{mode}\"")?;
            } else {
                write!(f, ";mode={mode}")?;
            }
        }
        for ext in &self.extensions {
            write!(f, ";{ext}")?;
        }
        Ok(())
    }
}
