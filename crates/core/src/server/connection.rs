//! One RTSP player connection: the command loop plus a writer task per track.
//!
//! ```text
//!              ┌──────────────┐  RTSP  ┌───────────────┐
//!  TCP read ──▶│ command loop │───────▶│ MethodHandler │
//!              └──────────────┘        └───────┬───────┘
//!                                              │ SETUP / PLAY / PAUSE
//!                                              ▼
//!  on_video_frame ─▶ video queue ─▶ writer ─▶ StreamState ─▶ RtpTransport
//!  on_audio_frame ─▶ audio queue ─▶ writer ─┘
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::handler::{AfterReply, MethodHandler};
use super::injector::ParamInjector;
use super::queue::QueuedFrame;
use super::{ClientHandle, Shared};
use crate::media::{MediaFrame, MediaKind, Packetizer};
use crate::protocol::message::read_message;
use crate::protocol::{RtspRequest, RtspResponse};
use crate::rtcp::RtcpReporter;
use crate::transport::{ControlWriter, RtpTransport};

/// A negotiated track.
#[derive(Debug, Clone)]
pub(crate) struct Track {
    pub transport: RtpTransport,
    pub packetizer: Arc<Mutex<Packetizer>>,
    /// Request URI of the SETUP, echoed in `RTP-Info`.
    pub uri: String,
}

/// Playback state shared by the command loop and the writer tasks.
#[derive(Debug)]
pub(crate) struct StreamState {
    playing: watch::Sender<bool>,
    tracks: Mutex<[Option<Track>; 2]>,
    reporter: Mutex<Option<RtcpReporter>>,
}

impl StreamState {
    pub fn new() -> Self {
        Self {
            playing: watch::Sender::new(false),
            tracks: Mutex::new([None, None]),
            reporter: Mutex::new(None),
        }
    }

    pub fn is_playing(&self) -> bool {
        *self.playing.borrow()
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.send_replace(playing);
    }

    pub fn subscribe_playing(&self) -> watch::Receiver<bool> {
        self.playing.subscribe()
    }

    pub fn track(&self, kind: MediaKind) -> Option<Track> {
        self.tracks.lock()[kind.track_id() as usize].clone()
    }

    pub fn set_track(&self, kind: MediaKind, track: Track) {
        self.tracks.lock()[kind.track_id() as usize] = Some(track);
    }

    /// Set-up tracks in track id order.
    pub fn tracks(&self) -> Vec<(MediaKind, Track)> {
        [MediaKind::Video, MediaKind::Audio]
            .into_iter()
            .filter_map(|kind| self.track(kind).map(|track| (kind, track)))
            .collect()
    }

    pub fn reporter(&self) -> Option<RtcpReporter> {
        self.reporter.lock().clone()
    }

    pub fn set_reporter(&self, reporter: RtcpReporter) {
        *self.reporter.lock() = Some(reporter);
    }

    pub fn take_reporter(&self) -> Option<RtcpReporter> {
        self.reporter.lock().take()
    }
}

/// Run one accepted connection until TEARDOWN, disconnect, failure or cancellation.
pub(crate) async fn serve(stream: TcpStream, peer: SocketAddr, shared: Arc<Shared>, cancel: CancellationToken) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(%peer, error = %e, "failed to set TCP_NODELAY");
    }
    let local_ip = stream
        .local_addr()
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    let (read_half, write_half) = stream.into_split();
    let writer = ControlWriter::new(write_half);
    let mut reader = BufReader::new(read_half);

    let (client_id, client) = shared.register(peer);
    let state = Arc::new(StreamState::new());
    tracing::info!(%peer, client_id, "client connected");

    let config = &shared.config;
    let video_writer = tokio::spawn(write_loop(
        MediaKind::Video,
        shared.clone(),
        client.clone(),
        state.clone(),
        Some(ParamInjector::new(config.param_reinjection, config.reinject_interval)),
        cancel.clone(),
    ));
    let audio_writer = tokio::spawn(write_loop(
        MediaKind::Audio,
        shared.clone(),
        client.clone(),
        state.clone(),
        None,
        cancel.clone(),
    ));

    let mut handler = MethodHandler::new(
        shared.clone(),
        client.clone(),
        state.clone(),
        writer.clone(),
        peer,
        local_ip,
        cancel.clone(),
    );
    let reason = command_loop(&mut reader, &mut handler, &writer, &cancel, peer).await;

    cancel.cancel();
    client.close();
    let _ = tokio::join!(video_writer, audio_writer);
    handler.close().await;
    if let Err(e) = writer.shutdown().await {
        tracing::trace!(%peer, error = %e, "control connection shutdown failed");
    }
    shared.unregister(client_id);

    tracing::info!(%peer, client_id, reason, "client disconnected");
}

/// RTSP request/response loop. Returns the reason for exiting.
async fn command_loop<R>(
    reader: &mut R,
    handler: &mut MethodHandler,
    writer: &ControlWriter,
    cancel: &CancellationToken,
    peer: SocketAddr,
) -> &'static str
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => return "connection cancelled",
            message = read_message(reader, None) => message,
        };
        let text = match message {
            Ok(Some(text)) => text,
            Ok(None) => return "connection closed by client",
            Err(e) => {
                tracing::warn!(%peer, error = %e, "failed to read request");
                return "read error";
            }
        };

        let request = match RtspRequest::parse(&text) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(%peer, error = %e, "parse error");
                let response = RtspResponse::bad_request().serialize();
                if writer.send_message(&response).await.is_err() {
                    return "write error";
                }
                continue;
            }
        };

        tracing::debug!(%peer, method = %request.method_name, uri = %request.uri, cseq = ?request.cseq(), "request");
        let (response, after) = handler.handle(&request).await;
        tracing::debug!(%peer, status = response.status_code, "response");

        if let Err(e) = writer.send_message(&response.serialize()).await {
            tracing::warn!(%peer, error = %e, "failed to write response");
            return "write error";
        }

        match after {
            Some(AfterReply::StartStreaming) => handler.start_streaming(),
            Some(AfterReply::Close) => return "teardown",
            None => {}
        }
    }
}

/// Drain one track's queue into its transport while the session is playing.
async fn write_loop(
    kind: MediaKind,
    shared: Arc<Shared>,
    client: Arc<ClientHandle>,
    state: Arc<StreamState>,
    mut injector: Option<ParamInjector>,
    cancel: CancellationToken,
) {
    let queue = client.queue(kind);
    let mut playing = state.subscribe_playing();
    let mut video_params = shared.video_params.subscribe();

    loop {
        if !*playing.borrow_and_update() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = playing.changed() => if changed.is_err() { break },
            }
            continue;
        }

        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = queue.pop() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        if !state.is_playing() {
            client.stats.record_dropped(kind, 1);
            continue;
        }
        let Some(track) = state.track(kind) else {
            continue;
        };

        if kind == MediaKind::Video && video_params.has_changed().unwrap_or(false) {
            let params = video_params.borrow_and_update().clone();
            if let Some(params) = params {
                rebuild_packetizer(&mut track.packetizer.lock(), &params);
            }
        }

        let media = into_media(kind, frame);
        let packets = {
            let mut packetizer = track.packetizer.lock();
            if let Some(injector) = injector.as_mut()
                && injector.should_inject(media.key_frame)
            {
                packetizer.force_parameter_sets();
            }
            packetizer.create_packets(&media)
        };
        drop(media);
        if packets.is_empty() {
            continue;
        }

        match track.transport.send_rtp(&packets).await {
            Ok(bytes) => {
                client.stats.record_sent(kind, packets.len(), bytes);
                if let Some(reporter) = state.reporter() {
                    for packet in &packets {
                        reporter.update(packet);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(%kind, error = %e, "RTP send failed, closing connection");
                cancel.cancel();
                break;
            }
        }
    }
    tracing::trace!(%kind, "writer task exited");
}

/// Swap in new parameter sets, keeping the stream's SSRC and sequence.
fn rebuild_packetizer(packetizer: &mut Packetizer, params: &crate::media::VideoParams) {
    let mut fresh = Packetizer::video(params);
    fresh.set_ssrc(packetizer.ssrc());
    fresh.set_initial_sequence(packetizer.next_sequence());
    tracing::debug!(ssrc = packetizer.ssrc(), "video parameters changed, packetizer rebuilt");
    *packetizer = fresh;
}

fn into_media(kind: MediaKind, frame: QueuedFrame) -> MediaFrame {
    let data = Bytes::from_owner(frame.buffer);
    match kind {
        MediaKind::Video => MediaFrame::video(data, frame.timestamp_us, frame.key_frame),
        MediaKind::Audio => MediaFrame::audio(data, frame.timestamp_us),
    }
}
