//! Requests sent by the push client (RFC 2326 §10, record mode).
//!
//! ```text
//! OPTIONS  rtsp://host:port/path
//! ANNOUNCE rtsp://host:port/path            (SDP body)
//! SETUP    rtsp://host:port/path/trackID=0  (Transport: ...;mode=record)
//! SETUP    rtsp://host:port/path/trackID=1  (when audio is sent)
//! RECORD   rtsp://host:port/path            (Range: npt=0.000-)
//! GET_PARAMETER / OPTIONS                   (keep-alive)
//! TEARDOWN rtsp://host:port/path
//! ```

use std::time::Duration;

use super::config::ProtocolPolicy;
use crate::media::MediaKind;
use crate::protocol::Method;
use crate::protocol::auth::{Authenticator, Credentials};

const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);
const MIN_KEEP_ALIVE_SECS: u32 = 5;
const KEEP_ALIVE_MARGIN_SECS: u32 = 5;

/// A serialized request and what is needed to match its response.
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub method: Method,
    pub cseq: u32,
    pub text: String,
}

/// Request builder holding the client side of the RTSP dialogue state:
/// CSeq counter, session id, negotiated timeout and authentication.
#[derive(Debug)]
pub struct ClientMessages {
    base_uri: String,
    user_agent: String,
    cseq: u32,
    session: Option<String>,
    timeout: Option<u32>,
    authenticator: Option<Authenticator>,
    auth_required: bool,
    challenge: Option<String>,
}

impl ClientMessages {
    pub fn new(base_uri: String, user_agent: String, credentials: Option<Credentials>) -> Self {
        Self {
            base_uri,
            user_agent,
            cseq: 0,
            session: None,
            timeout: None,
            authenticator: credentials.map(Authenticator::new),
            auth_required: false,
            challenge: None,
        }
    }

    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    pub fn track_uri(&self, kind: MediaKind) -> String {
        format!("{}/trackID={}", self.base_uri, kind.track_id())
    }

    pub fn has_credentials(&self) -> bool {
        self.authenticator.is_some()
    }

    /// Remember the server's `WWW-Authenticate` value. Every later request
    /// carries an `Authorization` header.
    pub fn set_challenge(&mut self, challenge: Option<&str>) {
        self.auth_required = true;
        self.challenge = challenge.map(str::to_string);
    }

    pub fn set_session(&mut self, session: &str, timeout: Option<u32>) {
        self.session = Some(session.to_string());
        if timeout.is_some() {
            self.timeout = timeout;
        }
    }

    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    /// Interval between keep-alive requests for the announced session timeout.
    pub fn keep_alive_delay(&self) -> Duration {
        keep_alive_delay(self.timeout)
    }

    pub fn options(&mut self) -> Outgoing {
        let uri = self.base_uri.clone();
        self.build(Method::Options, &uri, &[], None)
    }

    pub fn announce(&mut self, sdp: &str) -> Outgoing {
        let uri = self.base_uri.clone();
        self.build(Method::Announce, &uri, &[], Some(("application/sdp", sdp)))
    }

    pub fn setup(&mut self, kind: MediaKind, transport: &str) -> Outgoing {
        let uri = self.track_uri(kind);
        self.build(Method::Setup, &uri, &[("Transport", transport)], None)
    }

    pub fn record(&mut self) -> Outgoing {
        let uri = self.base_uri.clone();
        self.build(Method::Record, &uri, &[("Range", "npt=0.000-")], None)
    }

    /// GET_PARAMETER inside a session, OPTIONS before one exists.
    pub fn keep_alive(&mut self) -> Outgoing {
        let uri = self.base_uri.clone();
        let method = if self.session.is_some() {
            Method::GetParameter
        } else {
            Method::Options
        };
        self.build(method, &uri, &[], None)
    }

    pub fn teardown(&mut self) -> Outgoing {
        let uri = self.base_uri.clone();
        self.build(Method::Teardown, &uri, &[], None)
    }

    fn build(&mut self, method: Method, uri: &str, headers: &[(&str, &str)], body: Option<(&str, &str)>) -> Outgoing {
        self.cseq += 1;
        let mut text = format!("{method} {uri} RTSP/1.0\r\n");
        text.push_str(&format!("CSeq: {}\r\n", self.cseq));
        text.push_str(&format!("User-Agent: {}\r\n", self.user_agent));

        if self.auth_required
            && let Some(authenticator) = self.authenticator.as_mut()
        {
            let content = body.map_or("", |(_, content)| content);
            let authorization = authenticator.authorize(self.challenge.as_deref(), method.as_str(), uri, content);
            text.push_str(&format!("Authorization: {authorization}\r\n"));
        }
        if let Some(session) = &self.session {
            text.push_str(&format!("Session: {session}\r\n"));
        }
        for (name, value) in headers {
            text.push_str(&format!("{name}: {value}\r\n"));
        }
        match body {
            Some((content_type, content)) => {
                text.push_str(&format!("Content-Type: {content_type}\r\n"));
                text.push_str(&format!("Content-Length: {}\r\n\r\n", content.len()));
                text.push_str(content);
            }
            None => text.push_str("\r\n"),
        }

        tracing::trace!(%method, cseq = self.cseq, "built request");
        Outgoing {
            method,
            cseq: self.cseq,
            text,
        }
    }
}

/// `Transport` value offered in SETUP for a record-mode track.
///
/// `client_ports` is the local RTP/RTCP pair, required unless the policy is TCP.
pub fn setup_transport(kind: MediaKind, policy: ProtocolPolicy, client_ports: Option<(u16, u16)>) -> String {
    let channel = kind.track_id() * 2;
    let tcp = format!("RTP/AVP/TCP;unicast;interleaved={}-{};mode=record", channel, channel + 1);
    let udp = client_ports.map(|(rtp, rtcp)| format!("RTP/AVP;unicast;client_port={rtp}-{rtcp};mode=record"));
    match (policy, udp) {
        (ProtocolPolicy::Tcp, _) | (_, None) => tcp,
        (ProtocolPolicy::Udp, Some(udp)) => udp,
        (ProtocolPolicy::Auto, Some(udp)) => format!("{udp}, {tcp}"),
    }
}

/// `min(max(timeout - 5, 5), 60)` seconds; 60 s when no timeout was announced.
pub fn keep_alive_delay(timeout: Option<u32>) -> Duration {
    match timeout {
        Some(secs) => {
            let secs = secs.saturating_sub(KEEP_ALIVE_MARGIN_SECS).max(MIN_KEEP_ALIVE_SECS);
            Duration::from_secs(secs as u64).min(DEFAULT_KEEP_ALIVE)
        }
        None => DEFAULT_KEEP_ALIVE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(credentials: Option<Credentials>) -> ClientMessages {
        ClientMessages::new("rtsp://10.0.0.1:554/live".into(), "test-agent".into(), credentials)
    }

    #[test]
    fn options_request() {
        let out = messages(None).options();
        assert_eq!(out.method, Method::Options);
        assert_eq!(out.cseq, 1);
        assert_eq!(
            out.text,
            "OPTIONS rtsp://10.0.0.1:554/live RTSP/1.0\r\nCSeq: 1\r\nUser-Agent: test-agent\r\n\r\n"
        );
    }

    #[test]
    fn cseq_increments_per_request() {
        let mut m = messages(None);
        assert_eq!(m.options().cseq, 1);
        assert_eq!(m.options().cseq, 2);
        assert_eq!(m.teardown().cseq, 3);
    }

    #[test]
    fn announce_carries_sdp_body() {
        let out = messages(None).announce("v=0\r\n");
        assert!(out.text.starts_with("ANNOUNCE rtsp://10.0.0.1:554/live RTSP/1.0\r\n"));
        assert!(out.text.ends_with("Content-Type: application/sdp\r\nContent-Length: 5\r\n\r\nv=0\r\n"));
    }

    #[test]
    fn setup_uses_track_uri_and_session() {
        let mut m = messages(None);
        m.set_session("ABCD", Some(30));
        let out = m.setup(MediaKind::Audio, "RTP/AVP/TCP;unicast;interleaved=2-3;mode=record");
        assert!(out.text.starts_with("SETUP rtsp://10.0.0.1:554/live/trackID=1 RTSP/1.0\r\n"));
        assert!(out.text.contains("Session: ABCD\r\nTransport: RTP/AVP/TCP;unicast;interleaved=2-3;mode=record\r\n"));
    }

    #[test]
    fn record_has_range() {
        let out = messages(None).record();
        assert!(out.text.contains("Range: npt=0.000-\r\n"));
    }

    #[test]
    fn keep_alive_method_depends_on_session() {
        let mut m = messages(None);
        assert_eq!(m.keep_alive().method, Method::Options);
        m.set_session("S1", None);
        assert_eq!(m.keep_alive().method, Method::GetParameter);
    }

    #[test]
    fn authorization_only_after_challenge() {
        let mut m = messages(Some(Credentials::new("user", "pass")));
        assert!(!m.options().text.contains("Authorization"));

        m.set_challenge(Some(r#"Digest realm="cam", nonce="abc""#));
        let out = m.options();
        assert!(out.text.contains("Authorization: Digest username=\"user\", realm=\"cam\", nonce=\"abc\", uri=\"rtsp://10.0.0.1:554/live\""));
        let auth_pos = out.text.find("Authorization").unwrap();
        let agent_pos = out.text.find("User-Agent").unwrap();
        assert!(agent_pos < auth_pos);
    }

    #[test]
    fn digest_uri_is_track_uri_for_setup() {
        let mut m = messages(Some(Credentials::new("user", "pass")));
        m.set_challenge(Some(r#"Digest realm="cam", nonce="abc""#));
        let out = m.setup(MediaKind::Video, "RTP/AVP/TCP;unicast;interleaved=0-1;mode=record");
        assert!(out.text.contains("uri=\"rtsp://10.0.0.1:554/live/trackID=0\""));
    }

    #[test]
    fn basic_without_digest_challenge() {
        let mut m = messages(Some(Credentials::new("user", "pass")));
        m.set_challenge(None);
        assert!(m.options().text.contains("Authorization: Basic dXNlcjpwYXNz\r\n"));
    }

    #[test]
    fn transport_offers() {
        assert_eq!(
            setup_transport(MediaKind::Video, ProtocolPolicy::Tcp, None),
            "RTP/AVP/TCP;unicast;interleaved=0-1;mode=record"
        );
        assert_eq!(
            setup_transport(MediaKind::Audio, ProtocolPolicy::Udp, Some((5000, 5001))),
            "RTP/AVP;unicast;client_port=5000-5001;mode=record"
        );
        assert_eq!(
            setup_transport(MediaKind::Audio, ProtocolPolicy::Auto, Some((5000, 5001))),
            "RTP/AVP;unicast;client_port=5000-5001;mode=record, RTP/AVP/TCP;unicast;interleaved=2-3;mode=record"
        );
    }

    #[test]
    fn keep_alive_delays() {
        assert_eq!(keep_alive_delay(None), Duration::from_secs(60));
        assert_eq!(keep_alive_delay(Some(60)), Duration::from_secs(55));
        assert_eq!(keep_alive_delay(Some(8)), Duration::from_secs(5));
        assert_eq!(keep_alive_delay(Some(0)), Duration::from_secs(5));
        assert_eq!(keep_alive_delay(Some(600)), Duration::from_secs(60));
    }
}
