use std::fmt;
use std::net::SocketAddr;

use crate::error::{Result, RtspError};
use crate::protocol::auth::Credentials;

pub const DEFAULT_PORT: u16 = 554;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Rtsp,
    /// RTSP over TLS. Parsed, but not supported when connecting.
    Rtsps,
}

/// A parsed `rtsp://[user[:password]@]host[:port][/path][?query]` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspUrl {
    pub scheme: Scheme,
    /// Host name or IP address, without IPv6 brackets.
    pub host: String,
    pub port: u16,
    /// Always starts with `/`; the query string is kept.
    pub path: String,
    pub credentials: Option<Credentials>,
}

impl RtspUrl {
    pub fn parse(url: &str) -> Result<Self> {
        let invalid = |reason: &str| RtspError::InvalidUrl(format!("{reason}: {url}"));

        let (scheme, rest) = url.trim().split_once("://").ok_or_else(|| invalid("missing scheme"))?;
        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "rtsp" => Scheme::Rtsp,
            "rtsps" => Scheme::Rtsps,
            _ => return Err(invalid("unsupported scheme")),
        };

        let authority_end = rest.find(['/', '?']).unwrap_or(rest.len());
        let (authority, tail) = rest.split_at(authority_end);
        let path = match tail.strip_prefix('/') {
            Some(path) => format!("/{path}"),
            None => format!("/{tail}"),
        };

        let (userinfo, host_port) = match authority.rsplit_once('@') {
            Some((userinfo, host_port)) => (Some(userinfo), host_port),
            None => (None, authority),
        };
        let credentials = match userinfo {
            Some(info) => {
                let (user, password) = info.split_once(':').unwrap_or((info, ""));
                let user = percent_decode(user).ok_or_else(|| invalid("bad escape in user name"))?;
                let password = percent_decode(password).ok_or_else(|| invalid("bad escape in password"))?;
                Some(Credentials::new(user, password)).filter(|c| !c.username.is_empty())
            }
            None => None,
        };

        let (host, port) = if let Some(bracketed) = host_port.strip_prefix('[') {
            let (host, after) = bracketed.split_once(']').ok_or_else(|| invalid("unterminated IPv6 host"))?;
            let port = match after.strip_prefix(':') {
                Some(port) => Some(port),
                None if after.is_empty() => None,
                None => return Err(invalid("garbage after IPv6 host")),
            };
            (host, port)
        } else {
            match host_port.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (host_port, None),
            }
        };
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port = match port {
            Some(port) => port.parse().map_err(|_| invalid("invalid port"))?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
            path,
            credentials,
        })
    }

    /// Host as it appears in a URI: IPv6 literals are bracketed.
    pub fn uri_host(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }

    /// `rtsp://host:port/path` without credentials, used as the request URI.
    pub fn base_uri(&self) -> String {
        format!("rtsp://{}:{}{}", self.uri_host(), self.port, self.path.trim_end_matches('/'))
    }

    /// Resolve the host to the first socket address.
    pub async fn resolve(&self) -> Result<SocketAddr> {
        tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| RtspError::InvalidUrl(format!("cannot resolve {}: {e}", self.host)))?
            .next()
            .ok_or_else(|| RtspError::InvalidUrl(format!("no address for {}", self.host)))
    }
}

/// Undo `%HH` escapes in URL userinfo.
fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hi = hex_val(*bytes.get(i + 1)?)?;
            let lo = hex_val(*bytes.get(i + 2)?)?;
            decoded.push((hi << 4) | lo);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(decoded).ok()
}

fn hex_val(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

impl fmt::Display for RtspUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match self.scheme {
            Scheme::Rtsp => "rtsp",
            Scheme::Rtsps => "rtsps",
        };
        write!(f, "{scheme}://{}:{}{}", self.uri_host(), self.port, self.path)
    }
}
