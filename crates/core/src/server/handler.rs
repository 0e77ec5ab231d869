use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::RngExt;
use tokio_util::sync::CancellationToken;

use super::connection::{StreamState, Track};
use super::{ClientHandle, Shared};
use crate::media::rtp::random_ssrc;
use crate::media::{MediaKind, Packetizer};
use crate::protocol::response::PUBLIC_METHODS;
use crate::protocol::{Method, RtspRequest, RtspResponse, TransportHeader, sdp};
use crate::rtcp::RtcpReporter;
use crate::transport::{ControlWriter, RtpTransport, udp};

/// Work the connection performs once the response has been written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AfterReply {
    StartStreaming,
    Close,
}

/// Handles RTSP method requests for a single player connection.
///
/// One connection carries at most one session; its id is chosen when the
/// connection is accepted and handed out by the first SETUP.
pub(crate) struct MethodHandler {
    shared: Arc<Shared>,
    client: Arc<ClientHandle>,
    state: Arc<StreamState>,
    writer: ControlWriter,
    peer: SocketAddr,
    local_ip: IpAddr,
    session_id: String,
    has_session: bool,
    cancel: CancellationToken,
}

impl MethodHandler {
    pub fn new(
        shared: Arc<Shared>,
        client: Arc<ClientHandle>,
        state: Arc<StreamState>,
        writer: ControlWriter,
        peer: SocketAddr,
        local_ip: IpAddr,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            shared,
            client,
            state,
            writer,
            peer,
            local_ip,
            session_id: format!("{:016X}", rand::rng().random::<u64>()),
            has_session: false,
            cancel,
        }
    }

    pub async fn handle(&mut self, request: &RtspRequest) -> (RtspResponse, Option<AfterReply>) {
        let (response, after) = match request.method {
            Method::Options => (self.handle_options(), None),
            Method::Describe => (self.handle_describe(request), None),
            Method::Setup => (self.handle_setup(request).await, None),
            Method::Play => self.handle_play(request),
            Method::Pause => (self.handle_pause(request).await, None),
            Method::Teardown => self.handle_teardown(request).await,
            Method::GetParameter => (self.handle_get_parameter(request), None),
            _ => {
                tracing::warn!(method = %request.method_name, peer = %self.peer, "unsupported RTSP method");
                let response = RtspResponse::new(405)
                    .add_header("Allow", PUBLIC_METHODS)
                    .add_header("Public", PUBLIC_METHODS);
                (response, None)
            }
        };
        (response.with_cseq(request.cseq()), after)
    }

    /// Enable delivery and RTCP. Called after the PLAY response is on the wire.
    pub fn start_streaming(&self) {
        if self.state.reporter().is_none() {
            let reporter = RtcpReporter::new(&self.cancel);
            for (kind, track) in &self.state.tracks() {
                let ssrc = track.packetizer.lock().ssrc();
                reporter.add_track(*kind, track.transport.clone(), ssrc);
            }
            reporter.start();
            self.state.set_reporter(reporter);
        }
        self.state.set_playing(true);
        self.client.stats.set_playing(true);
        tracing::info!(session_id = %self.session_id, peer = %self.peer, "session started playing");
    }

    /// Stop delivery and say BYE on every track.
    pub async fn close(&mut self) {
        self.state.set_playing(false);
        if let Some(reporter) = self.state.take_reporter() {
            reporter.close().await;
        }
    }

    fn session_header(&self) -> String {
        format!("{};timeout={}", self.session_id, self.shared.config.session_timeout)
    }

    /// 454 when the request names a session other than ours.
    fn check_session(&self, request: &RtspRequest) -> Option<RtspResponse> {
        match request.session_id() {
            Some(id) if !self.has_session || id != self.session_id => {
                tracing::warn!(session_id = id, "request for unknown session");
                Some(RtspResponse::session_not_found())
            }
            _ => None,
        }
    }

    fn handle_options(&self) -> RtspResponse {
        RtspResponse::ok().add_header("Public", PUBLIC_METHODS)
    }

    fn handle_describe(&self, request: &RtspRequest) -> RtspResponse {
        let config = &self.shared.config;
        if !config.matches_path(&request.uri) {
            tracing::warn!(uri = %request.uri, "DESCRIBE for unknown path");
            return RtspResponse::not_found();
        }
        let Some(video) = self.shared.video_params.borrow().clone() else {
            tracing::debug!("DESCRIBE before video parameters are known");
            return RtspResponse::new(503);
        };
        let audio = *self.shared.audio_params.borrow();

        let body = sdp::generate_sdp(&video, audio.as_ref(), self.shared.sdp_session_id, &config.session_name);
        RtspResponse::ok()
            .add_header("Content-Base", &format!("{}/", request.uri.trim_end_matches('/')))
            .add_header("Content-Type", "application/sdp")
            .with_body(body)
    }

    async fn handle_setup(&mut self, request: &RtspRequest) -> RtspResponse {
        if !self.shared.config.matches_path(&request.uri) {
            return RtspResponse::not_found();
        }
        if let Some(response) = self.check_session(request) {
            return response;
        }
        let Some(kind) = request.track_id().and_then(MediaKind::from_track_id) else {
            tracing::warn!(uri = %request.uri, "SETUP without a valid trackID");
            return RtspResponse::bad_request();
        };
        let Some(raw_transport) = request.get_header("Transport") else {
            tracing::warn!("SETUP missing Transport header");
            return RtspResponse::bad_request();
        };
        let Some(requested) = TransportHeader::parse(raw_transport) else {
            return RtspResponse::new(461);
        };

        let packetizer = match kind {
            MediaKind::Video => self.shared.video_params.borrow().as_ref().map(Packetizer::video),
            MediaKind::Audio => self.shared.audio_params.borrow().as_ref().map(Packetizer::audio),
        };
        let Some(mut packetizer) = packetizer else {
            tracing::warn!(%kind, "SETUP for a track without parameters");
            return RtspResponse::not_found();
        };

        let (transport, reply) = if requested.is_tcp() {
            let track = kind.track_id();
            let (rtp, rtcp) = requested.interleaved.unwrap_or((track * 2, track * 2 + 1));
            let transport = RtpTransport::interleaved(self.writer.clone(), rtp, rtcp);
            (transport, requested.with_interleaved(rtp, rtcp))
        } else {
            let Some((client_rtp, client_rtcp)) = requested.client_port else {
                tracing::warn!("UDP SETUP without client_port");
                return RtspResponse::bad_request();
            };
            match self.bind_udp(client_rtp, client_rtcp).await {
                Ok((transport, server_rtp)) => (transport, requested.with_server_port(server_rtp, server_rtp + 1)),
                Err(e) => {
                    tracing::error!(error = %e, "failed to set up UDP transport");
                    return RtspResponse::new(500);
                }
            }
        };

        packetizer.set_ssrc(random_ssrc());
        let protocol = transport.protocol();
        tracing::info!(
            session_id = %self.session_id,
            peer = %self.peer,
            %kind,
            %protocol,
            ssrc = format_args!("{:#010X}", packetizer.ssrc()),
            "track set up"
        );
        self.state.set_track(
            kind,
            Track {
                transport,
                packetizer: Arc::new(Mutex::new(packetizer)),
                uri: request.uri.clone(),
            },
        );
        self.has_session = true;
        self.client.stats.set_session(&self.session_id, protocol);

        RtspResponse::ok()
            .add_header("Transport", &reply.to_string())
            .add_header("Session", &self.session_header())
    }

    async fn bind_udp(&self, client_rtp: u16, client_rtcp: u16) -> crate::Result<(RtpTransport, u16)> {
        let (rtp, rtcp) = udp::bind_pair(self.local_ip).await?;
        let server_rtp = rtp.local_addr()?.port();
        let peer_ip = self.peer.ip();
        let transport = RtpTransport::udp(
            rtp,
            rtcp,
            SocketAddr::new(peer_ip, client_rtp),
            SocketAddr::new(peer_ip, client_rtcp),
        )
        .await?;
        Ok((transport, server_rtp))
    }

    fn handle_play(&mut self, request: &RtspRequest) -> (RtspResponse, Option<AfterReply>) {
        if let Some(response) = self.check_session(request) {
            return (response, None);
        }
        let tracks = self.state.tracks();
        if !self.has_session || tracks.is_empty() {
            return (RtspResponse::new(455), None);
        }

        let mut rtp_info = Vec::with_capacity(tracks.len());
        for (kind, track) in &tracks {
            let mut packetizer = track.packetizer.lock();
            if *kind == MediaKind::Video {
                packetizer.wait_for_key_frame();
            }
            rtp_info.push(format!(
                "url={};seq={};rtptime={}",
                track.uri,
                packetizer.next_sequence(),
                packetizer.rtp_timestamp(self.shared.last_timestamp_us(*kind))
            ));
        }

        let response = RtspResponse::ok()
            .add_header("Session", &self.session_header())
            .add_header("Range", "npt=0.000-")
            .add_header("RTP-Info", &rtp_info.join(","));
        (response, Some(AfterReply::StartStreaming))
    }

    async fn handle_pause(&mut self, request: &RtspRequest) -> RtspResponse {
        if let Some(response) = self.check_session(request) {
            return response;
        }
        if !self.has_session {
            return RtspResponse::session_not_found();
        }
        self.state.set_playing(false);
        self.client.stats.set_playing(false);
        if let Some(reporter) = self.state.take_reporter() {
            reporter.close().await;
        }
        tracing::info!(session_id = %self.session_id, "session paused");
        RtspResponse::ok().add_header("Session", &self.session_header())
    }

    async fn handle_teardown(&mut self, request: &RtspRequest) -> (RtspResponse, Option<AfterReply>) {
        if let Some(response) = self.check_session(request) {
            return (response, None);
        }
        self.close().await;
        tracing::info!(session_id = %self.session_id, "session terminated via TEARDOWN");
        (RtspResponse::ok(), Some(AfterReply::Close))
    }

    /// GET_PARAMETER is the usual keep-alive (RFC 2326 §10.8).
    fn handle_get_parameter(&self, request: &RtspRequest) -> RtspResponse {
        if let Some(response) = self.check_session(request) {
            return response;
        }
        let response = RtspResponse::ok();
        if self.has_session {
            response.add_header("Session", &self.session_header())
        } else {
            response
        }
    }
}
