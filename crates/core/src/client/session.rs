//! The push session: handshake, media sending, keep-alive and teardown.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::config::{ClientConfig, ProtocolPolicy};
use super::messages::{ClientMessages, Outgoing, setup_transport};
use super::url::RtspUrl;
use super::{ClientEvent, QueueItem};
use crate::error::{ParseErrorKind, Result, RtspError};
use crate::media::rtp::random_ssrc;
use crate::media::{AudioParams, MediaFrame, MediaKind, Packetizer, VideoParams};
use crate::protocol::message::read_message;
use crate::protocol::{Command, sdp};
use crate::rtcp::RtcpReporter;
use crate::transport::{ControlWriter, RtpTransport, TransportProtocol, udp};

/// How long the sending loop waits for a frame before checking in.
const RECEIVE_TIMEOUT: Duration = Duration::from_millis(100);
const BITRATE_PERIOD: Duration = Duration::from_secs(1);
/// Queue fill (percent) above which non-key video frames are dropped.
const CONGESTION_PERCENT: usize = 75;

/// Request/response half of the RTSP control connection.
///
/// A reader task owns the read half and forwards every text message, so
/// interleaved RTCP from the server is drained even while no request is
/// outstanding.
pub(crate) struct Control {
    writer: ControlWriter,
    responses: mpsc::Receiver<Result<String>>,
    reader: JoinHandle<()>,
    messages: ClientMessages,
    response_timeout: Duration,
    local_ip: IpAddr,
    peer_ip: IpAddr,
}

impl Control {
    pub async fn connect(url: &RtspUrl, config: &ClientConfig) -> Result<Self> {
        let addr = url.resolve().await?;
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| RtspError::Timeout("connect"))??;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "failed to set TCP_NODELAY");
        }
        let local_ip = stream.local_addr()?.ip();
        tracing::debug!(%addr, "control connection established");

        let (read_half, write_half) = stream.into_split();
        let (tx, responses) = mpsc::channel(8);
        let reader = tokio::spawn(read_loop(BufReader::new(read_half), tx));

        Ok(Self {
            writer: ControlWriter::new(write_half),
            responses,
            reader,
            messages: ClientMessages::new(url.base_uri(), config.user_agent.clone(), url.credentials.clone()),
            response_timeout: config.response_timeout,
            local_ip,
            peer_ip: addr.ip(),
        })
    }

    pub fn writer(&self) -> &ControlWriter {
        &self.writer
    }

    pub fn messages(&self) -> &ClientMessages {
        &self.messages
    }

    /// Send a request, answering one 401 challenge with credentials.
    pub async fn request<F>(&mut self, build: F) -> Result<Command>
    where
        F: Fn(&mut ClientMessages) -> Outgoing,
    {
        let mut retried = false;
        loop {
            let outgoing = build(&mut self.messages);
            self.writer.send_message(&outgoing.text).await?;
            let response = self.response(&outgoing).await?;
            tracing::debug!(method = %outgoing.method, status = response.status, "response");

            match response.status {
                200..=299 => return Ok(response),
                401 if !retried => {
                    if !self.messages.has_credentials() {
                        return Err(RtspError::NoCredentials);
                    }
                    self.messages.set_challenge(response.www_authenticate());
                    retried = true;
                }
                401 => return Err(RtspError::AuthFailed),
                403 => return Err(RtspError::AccessDenied),
                status => {
                    return Err(RtspError::Failed {
                        status,
                        text: response.text,
                    });
                }
            }
        }
    }

    /// Wait for the response to `outgoing`, skipping late answers to older requests.
    async fn response(&mut self, outgoing: &Outgoing) -> Result<Command> {
        let deadline = Instant::now() + self.response_timeout;
        loop {
            let text = tokio::time::timeout_at(deadline, self.responses.recv())
                .await
                .map_err(|_| RtspError::Timeout("response"))?
                .ok_or(RtspError::ConnectionClosed)??;
            let command = Command::parse(outgoing.method, text)?;
            match command.cseq {
                Some(cseq) if cseq < outgoing.cseq => {
                    tracing::debug!(cseq, expected = outgoing.cseq, "discarding stale response");
                }
                _ => return Ok(command),
            }
        }
    }

    /// Next unsolicited message; an error once the connection is gone.
    async fn unsolicited(&mut self) -> Result<String> {
        self.responses.recv().await.ok_or(RtspError::ConnectionClosed)?
    }

    async fn close(self) {
        if let Err(e) = self.writer.shutdown().await {
            tracing::trace!(error = %e, "control connection shutdown failed");
        }
    }
}

impl Drop for Control {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(mut reader: BufReader<OwnedReadHalf>, tx: mpsc::Sender<Result<String>>) {
    loop {
        match read_message(&mut reader, None).await {
            Ok(Some(text)) => {
                if tx.send(Ok(text)).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                let _ = tx.send(Err(RtspError::ConnectionClosed)).await;
                break;
            }
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                break;
            }
        }
    }
    tracing::trace!("control reader exited");
}

/// One negotiated outgoing track.
struct TrackSender {
    packetizer: Packetizer,
    transport: RtpTransport,
}

/// Everything the sending loop needs once RECORD succeeded.
pub(crate) struct MediaSender {
    video: TrackSender,
    audio: Option<TrackSender>,
    reporter: RtcpReporter,
    congestion_limit: usize,
}

impl MediaSender {
    async fn send(&mut self, frame: MediaFrame) -> Result<usize> {
        let track = match frame.kind {
            MediaKind::Video => &mut self.video,
            MediaKind::Audio => match self.audio.as_mut() {
                Some(track) => track,
                None => return Ok(0),
            },
        };
        let packets = track.packetizer.create_packets(&frame);
        drop(frame);
        if packets.is_empty() {
            return Ok(0);
        }
        let sent = track.transport.send_rtp(&packets).await?;
        for packet in &packets {
            self.reporter.update(packet);
        }
        Ok(sent)
    }

    /// New parameter sets start a new RTP stream: fresh SSRC and packetizer.
    fn new_video_params(&mut self, params: &VideoParams) {
        let ssrc = random_ssrc();
        let mut packetizer = Packetizer::video(params);
        packetizer.set_ssrc(ssrc);
        self.video.packetizer = packetizer;
        self.reporter.set_ssrc(MediaKind::Video, ssrc);
        tracing::info!(ssrc = format_args!("{:#010X}", ssrc), "video parameters changed, new RTP stream");
    }
}

/// A session that completed RECORD.
pub(crate) struct Established {
    pub control: Control,
    pub media: MediaSender,
}

/// OPTIONS → ANNOUNCE → SETUP (video, then audio) → RECORD.
pub(crate) async fn establish(
    url: &RtspUrl,
    config: &ClientConfig,
    video: VideoParams,
    audio: Option<AudioParams>,
    cancel: &CancellationToken,
) -> Result<Established> {
    let mut control = Control::connect(url, config).await?;

    control.request(ClientMessages::options).await?;

    let sdp_session_id = random_ssrc();
    let body = sdp::generate_sdp(&video, audio.as_ref(), sdp_session_id, &config.session_name);
    control.request(|m| m.announce(&body)).await?;

    let (video_transport, protocol) = setup_track(&mut control, MediaKind::Video, config.protocol).await?;
    let audio_transport = match audio {
        Some(_) => Some(setup_track(&mut control, MediaKind::Audio, ProtocolPolicy::fixed(protocol)).await?.0),
        None => None,
    };

    control.request(ClientMessages::record).await?;

    let reporter = RtcpReporter::new(cancel);
    let video = new_track(Packetizer::video(&video), video_transport, MediaKind::Video, &reporter);
    let audio = match (audio, audio_transport) {
        (Some(params), Some(transport)) => Some(new_track(Packetizer::audio(&params), transport, MediaKind::Audio, &reporter)),
        _ => None,
    };
    reporter.start();

    tracing::info!(url = %url, %protocol, session = ?control.messages().session(), "recording");
    Ok(Established {
        control,
        media: MediaSender {
            video,
            audio,
            reporter,
            congestion_limit: (config.queue_capacity * CONGESTION_PERCENT / 100).max(1),
        },
    })
}

fn new_track(mut packetizer: Packetizer, transport: RtpTransport, kind: MediaKind, reporter: &RtcpReporter) -> TrackSender {
    let ssrc = random_ssrc();
    packetizer.set_ssrc(ssrc);
    reporter.add_track(kind, transport.clone(), ssrc);
    TrackSender { packetizer, transport }
}

/// SETUP one track and build its transport from the server's answer.
async fn setup_track(
    control: &mut Control,
    kind: MediaKind,
    policy: ProtocolPolicy,
) -> Result<(RtpTransport, TransportProtocol)> {
    let sockets = match policy {
        ProtocolPolicy::Tcp => None,
        ProtocolPolicy::Udp | ProtocolPolicy::Auto => Some(udp::bind_pair(control.local_ip).await?),
    };
    let client_ports = match &sockets {
        Some((rtp, rtcp)) => Some((rtp.local_addr()?.port(), rtcp.local_addr()?.port())),
        None => None,
    };
    let offer = setup_transport(kind, policy, client_ports);
    let response = control.request(|m| m.setup(kind, &offer)).await?;

    if let Some(session) = response.session_id() {
        let timeout = response.session_timeout();
        control.messages.set_session(session, timeout);
    }
    let granted = response
        .transport()
        .ok_or(RtspError::parse(ParseErrorKind::InvalidHeader))?;
    tracing::debug!(%kind, transport = %granted, "track set up");

    if granted.is_tcp() {
        let (rtp, rtcp) = granted
            .interleaved
            .ok_or_else(|| RtspError::Unsupported(format!("TCP transport without interleaved channels: {granted}")))?;
        let transport = RtpTransport::interleaved(control.writer.clone(), rtp, rtcp);
        return Ok((transport, TransportProtocol::Tcp));
    }

    if granted.interleaved.is_some() {
        return Err(RtspError::Unsupported(format!("UDP transport with interleaved channels: {granted}")));
    }
    let Some((rtp, rtcp)) = sockets else {
        return Err(RtspError::Unsupported(format!("server chose UDP, TCP was requested: {granted}")));
    };
    let (server_rtp, server_rtcp) = granted
        .server_port
        .ok_or_else(|| RtspError::Unsupported(format!("UDP transport without server_port: {granted}")))?;
    let transport = RtpTransport::udp(
        rtp,
        rtcp,
        SocketAddr::new(control.peer_ip, server_rtp),
        SocketAddr::new(control.peer_ip, server_rtcp),
    )
    .await?;
    Ok((transport, TransportProtocol::Udp))
}

/// Reports the send rate once per period.
struct BitrateMeter {
    bytes: u64,
    since: Instant,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl BitrateMeter {
    fn new(events: mpsc::UnboundedSender<ClientEvent>) -> Self {
        Self {
            bytes: 0,
            since: Instant::now(),
            events,
        }
    }

    fn add(&mut self, bytes: usize) {
        self.bytes += bytes as u64;
    }

    fn poll(&mut self) {
        let elapsed = self.since.elapsed();
        if elapsed < BITRATE_PERIOD {
            return;
        }
        let bits_per_second = self.bytes * 8 * 1000 / (elapsed.as_millis() as u64).max(1);
        let _ = self.events.send(ClientEvent::Bitrate(bits_per_second));
        self.bytes = 0;
        self.since = Instant::now();
    }
}

/// Drain the frame queue into the transports until cancelled or a send fails.
///
/// A failed send cancels `cancel` so the rest of the session winds down.
/// Returns the queue so the caller can release whatever is left.
pub(crate) async fn send_loop(
    mut queue: mpsc::Receiver<QueueItem>,
    mut media: MediaSender,
    events: mpsc::UnboundedSender<ClientEvent>,
    dropped: Arc<AtomicU64>,
    cancel: CancellationToken,
) -> (mpsc::Receiver<QueueItem>, MediaSender, Result<()>) {
    let mut bitrate = BitrateMeter::new(events);
    let result = loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            item = tokio::time::timeout(RECEIVE_TIMEOUT, queue.recv()) => item,
        };
        bitrate.poll();
        let item = match item {
            Err(_) => continue,
            Ok(None) => break Ok(()),
            Ok(Some(item)) => item,
        };

        match item {
            QueueItem::NewVideoParams(params) => media.new_video_params(&params),
            QueueItem::Frame(frame) => {
                if frame.kind == MediaKind::Video && !frame.key_frame && queue.len() >= media.congestion_limit {
                    dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(queued = queue.len(), "congested, dropping non-key video frame");
                    continue;
                }
                match media.send(frame).await {
                    Ok(bytes) => bitrate.add(bytes),
                    Err(e) => {
                        tracing::error!(error = %e, "RTP send failed");
                        cancel.cancel();
                        break Err(e);
                    }
                }
            }
        }
    };
    (queue, media, result)
}

/// Keep the session alive until cancelled or the connection fails.
pub(crate) async fn keep_alive_loop(control: &mut Control, cancel: &CancellationToken) -> Result<()> {
    loop {
        let delay = control.messages.keep_alive_delay();
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(delay) => {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    result = control.request(ClientMessages::keep_alive) => {
                        result?;
                        tracing::trace!("keep-alive acknowledged");
                    }
                }
            }
            message = control.unsolicited() => {
                let text = message?;
                tracing::debug!(first_line = text.lines().next().unwrap_or_default(), "unsolicited message from server");
            }
        }
    }
}

/// BYE, TEARDOWN with a bounded wait, then close the connection.
pub(crate) async fn finish(mut control: Control, media: Option<MediaSender>, teardown_timeout: Duration) {
    if let Some(media) = &media {
        media.reporter.close().await;
    }
    match tokio::time::timeout(teardown_timeout, control.request(ClientMessages::teardown)).await {
        Ok(Ok(_)) => tracing::debug!("TEARDOWN acknowledged"),
        Ok(Err(e)) => tracing::debug!(error = %e, "TEARDOWN failed"),
        Err(_) => tracing::debug!("TEARDOWN timed out"),
    }
    control.close().await;
}
