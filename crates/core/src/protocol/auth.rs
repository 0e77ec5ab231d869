//! HTTP Basic and Digest authentication for RTSP requests (RFC 2617).

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngExt;

/// Username and password supplied by the caller.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Parameters of a `WWW-Authenticate: Digest ...` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    /// Raw `qop` list, e.g. `auth,auth-int`. Empty when absent.
    pub qop: String,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
}

impl DigestChallenge {
    /// Parse a challenge value. Returns `None` for non-Digest schemes or
    /// when `realm` or `nonce` is missing.
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let scheme_end = header.find(char::is_whitespace).unwrap_or(header.len());
        if !header[..scheme_end].eq_ignore_ascii_case("digest") {
            return None;
        }

        let params = parse_params(&header[scheme_end..]);
        let get = |name: &str| {
            params
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
        };

        Some(Self {
            realm: get("realm")?,
            nonce: get("nonce")?,
            qop: get("qop").unwrap_or_default(),
            opaque: get("opaque").filter(|s| !s.is_empty()),
            algorithm: get("algorithm").filter(|s| !s.is_empty()),
        })
    }

    /// `auth` when offered, otherwise the first listed option.
    fn selected_qop(&self) -> Option<String> {
        let options: Vec<&str> = self
            .qop
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        options
            .iter()
            .find(|q| q.eq_ignore_ascii_case("auth"))
            .or(options.first())
            .map(|q| q.to_ascii_lowercase())
    }

    fn is_md5_sess(&self) -> bool {
        self.algorithm
            .as_deref()
            .is_some_and(|a| a.eq_ignore_ascii_case("MD5-sess"))
    }
}

/// `key=value` and `key="quoted value"` pairs separated by commas.
fn parse_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace() || *c == ',').is_some() {}

        let key: String = std::iter::from_fn(|| chars.next_if(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')).collect();
        if key.is_empty() {
            break;
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.next_if_eq(&'=').is_none() {
            // Bare token without a value.
            params.push((key, String::new()));
            continue;
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let mut value = String::new();
        if chars.next_if_eq(&'"').is_some() {
            while let Some(c) = chars.next() {
                match c {
                    '\\' => value.extend(chars.next()),
                    '"' => break,
                    _ => value.push(c),
                }
            }
        } else {
            value.extend(std::iter::from_fn(|| chars.next_if(|c| *c != ',' && !c.is_whitespace())));
        }
        params.push((key, value));
    }
    params
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

fn quote(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Builds `Authorization` header values, tracking the Digest nonce count.
#[derive(Debug)]
pub struct Authenticator {
    credentials: Credentials,
    last_nonce: Option<String>,
    nonce_count: u32,
}

impl Authenticator {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            last_nonce: None,
            nonce_count: 0,
        }
    }

    pub fn reset(&mut self) {
        self.last_nonce = None;
        self.nonce_count = 0;
    }

    /// Answer a `WWW-Authenticate` challenge for `method uri`.
    ///
    /// Falls back to Basic when the challenge is absent or not a usable
    /// Digest challenge. `body` is only hashed for `qop=auth-int`.
    pub fn authorize(&mut self, challenge: Option<&str>, method: &str, uri: &str, body: &str) -> String {
        let cnonce = format!("{:016x}", rand::rng().random::<u64>());
        self.authorize_with_cnonce(challenge, method, uri, body, &cnonce)
    }

    fn authorize_with_cnonce(
        &mut self,
        challenge: Option<&str>,
        method: &str,
        uri: &str,
        body: &str,
        cnonce: &str,
    ) -> String {
        let Some(challenge) = challenge.and_then(DigestChallenge::parse) else {
            tracing::debug!("answering with Basic authentication");
            return self.basic();
        };

        if self.last_nonce.as_deref() != Some(challenge.nonce.as_str()) {
            self.last_nonce = Some(challenge.nonce.clone());
            self.nonce_count = 0;
        }

        let Credentials { username, password } = &self.credentials;
        let realm = &challenge.realm;
        let nonce = &challenge.nonce;

        let mut ha1 = md5_hex(&format!("{username}:{realm}:{password}"));
        if challenge.is_md5_sess() {
            ha1 = md5_hex(&format!("{ha1}:{nonce}:{cnonce}"));
        }

        let qop = challenge.selected_qop();
        let ha2 = match qop.as_deref() {
            Some("auth-int") => md5_hex(&format!("{method}:{uri}:{}", md5_hex(body))),
            _ => md5_hex(&format!("{method}:{uri}")),
        };

        let nc = qop.as_ref().map(|_| {
            self.nonce_count = self.nonce_count.wrapping_add(1);
            format!("{:08x}", self.nonce_count)
        });

        let response = match (&qop, &nc) {
            (Some(qop), Some(nc)) => md5_hex(&format!("{ha1}:{nonce}:{nc}:{cnonce}:{qop}:{ha2}")),
            _ => md5_hex(&format!("{ha1}:{nonce}:{ha2}")),
        };

        let mut header = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{response}\"",
            quote(username),
            quote(realm),
            quote(nonce),
            quote(uri),
        );
        if let Some(qop) = &qop {
            header.push_str(&format!(", qop={qop}"));
        }
        if let Some(opaque) = &challenge.opaque {
            header.push_str(&format!(", opaque=\"{}\"", quote(opaque)));
        }
        if let Some(algorithm) = &challenge.algorithm {
            header.push_str(&format!(", algorithm=\"{algorithm}\""));
        }
        if let Some(nc) = &nc {
            header.push_str(&format!(", nc={nc}, cnonce=\"{cnonce}\""));
        }
        header
    }

    fn basic(&self) -> String {
        let Credentials { username, password } = &self.credentials;
        format!("Basic {}", BASE64.encode(format!("{username}:{password}")))
    }
}
