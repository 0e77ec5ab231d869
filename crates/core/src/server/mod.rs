//! Multi-client RTSP server (RFC 2326 §10).
//!
//! Players connect over TCP and negotiate the stream with
//! DESCRIBE → SETUP → PLAY. Every connection gets its own bounded frame
//! queues; [`RtspServer::on_video_frame`] and [`RtspServer::on_audio_frame`]
//! copy an encoded frame once into a pooled [`SharedBuffer`] and hand a
//! clone to each queue, so a slow player never stalls the encoder or the
//! other players.
//!
//! ## Session state (RFC 2326 §A.2)
//!
//! ```text
//! Init ──SETUP──▶ Ready ──PLAY──▶ Playing
//!                   ▲               │
//!                   └────PAUSE──────┘
//! any ──TEARDOWN / disconnect──▶ Closed
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rand::RngExt;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, RtspError};
use crate::media::{AudioParams, MediaFrame, MediaKind, VideoParams};

pub mod config;
mod connection;
mod handler;
pub mod injector;
pub mod pool;
pub mod queue;
pub mod stats;

pub use config::ServerConfig;
pub use pool::{ByteArrayPool, SharedBuffer};
pub use stats::{ClientStats, MediaStats};

use queue::{FrameQueue, OverflowPolicy, Push, QueuedFrame};
use stats::StatsRecorder;

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Per-connection state visible to the frame producers.
#[derive(Debug)]
pub(crate) struct ClientHandle {
    pub video: FrameQueue,
    pub audio: FrameQueue,
    pub stats: StatsRecorder,
}

impl ClientHandle {
    fn new(config: &ServerConfig, peer: SocketAddr) -> Self {
        Self {
            video: FrameQueue::new(config.video_queue_capacity, OverflowPolicy::KeyFrameFlush),
            audio: FrameQueue::new(config.audio_queue_capacity, OverflowPolicy::DropOldest),
            stats: StatsRecorder::new(peer),
        }
    }

    pub fn queue(&self, kind: MediaKind) -> &FrameQueue {
        match kind {
            MediaKind::Video => &self.video,
            MediaKind::Audio => &self.audio,
        }
    }

    /// Enqueue without waiting. A rejected frame is dropped and counted.
    fn offer(&self, kind: MediaKind, frame: QueuedFrame) {
        match self.queue(kind).push(frame) {
            Push::Queued { evicted } => self.stats.record_enqueued(kind, evicted),
            Push::Rejected => self.stats.record_dropped(kind, 1),
        }
    }

    /// Close both queues and drop whatever is still queued.
    pub fn close(&self) {
        for kind in [MediaKind::Video, MediaKind::Audio] {
            let queue = self.queue(kind);
            queue.close();
            queue.clear();
        }
    }

    fn snapshot(&self) -> ClientStats {
        self.stats.snapshot(
            (self.video.len(), self.video.capacity()),
            (self.audio.len(), self.audio.capacity()),
        )
    }
}

/// State shared by the server handle, the accept loop and every connection.
#[derive(Debug)]
pub(crate) struct Shared {
    pub config: ServerConfig,
    pub video_params: watch::Sender<Option<VideoParams>>,
    pub audio_params: watch::Sender<Option<AudioParams>>,
    pub pool: Arc<ByteArrayPool>,
    /// SDP `o=` session id, fixed for the server's lifetime.
    pub sdp_session_id: u32,
    /// Capture time of the newest frame per track, for `RTP-Info: rtptime`.
    last_timestamp_us: [AtomicU64; 2],
    clients: Mutex<HashMap<u64, Arc<ClientHandle>>>,
    next_client_id: AtomicU64,
}

impl Shared {
    fn new(config: ServerConfig) -> Self {
        Self {
            config,
            video_params: watch::Sender::new(None),
            audio_params: watch::Sender::new(None),
            pool: ByteArrayPool::new(),
            sdp_session_id: rand::rng().random::<u32>(),
            last_timestamp_us: [AtomicU64::new(0), AtomicU64::new(0)],
            clients: Mutex::new(HashMap::new()),
            next_client_id: AtomicU64::new(1),
        }
    }

    pub fn register(&self, peer: SocketAddr) -> (u64, Arc<ClientHandle>) {
        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let client = Arc::new(ClientHandle::new(&self.config, peer));
        self.clients.lock().insert(id, client.clone());
        (id, client)
    }

    pub fn last_timestamp_us(&self, kind: MediaKind) -> u64 {
        self.last_timestamp_us[kind.track_id() as usize].load(Ordering::Relaxed)
    }

    pub fn unregister(&self, id: u64) {
        if let Some(client) = self.clients.lock().remove(&id) {
            client.close();
        }
    }

    fn client_handles(&self) -> Vec<Arc<ClientHandle>> {
        self.clients.lock().values().cloned().collect()
    }
}

#[derive(Debug)]
struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    local_addr: SocketAddr,
}

/// RTSP server that fans one live stream out to many players.
///
/// ```no_run
/// # async fn run() -> rtsp::Result<()> {
/// use rtsp::{MediaFrame, RtspServer, ServerConfig, VideoParams};
///
/// let server = RtspServer::new(ServerConfig::default());
/// server.set_video_params(VideoParams::h264(vec![0x67, 0x42, 0x00, 0x1f], vec![0x68, 0xce]))?;
/// let addr = server.start().await?;
/// println!("serving rtsp://{addr}/stream");
///
/// server.on_video_frame(MediaFrame::video(vec![0, 0, 0, 1, 0x65, 0x88], 0, true));
/// server.stop().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct RtspServer {
    shared: Arc<Shared>,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl RtspServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            shared: Arc::new(Shared::new(config)),
            running: tokio::sync::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Bind the listener and start accepting players. Returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(RtspError::AlreadyRunning);
        }

        let listener = TcpListener::bind(self.shared.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(accept_loop(listener, self.shared.clone(), cancel.clone()));

        tracing::info!(addr = %local_addr, path = %self.shared.config.path, "RTSP server listening");
        *running = Some(Running {
            cancel,
            task,
            local_addr,
        });
        Ok(local_addr)
    }

    /// Close every connection and the listener. Calling it again does nothing.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        running.cancel.cancel();
        if let Err(e) = running.task.await {
            tracing::error!(error = %e, "accept loop panicked");
        }
        tracing::info!(addr = %running.local_addr, "server stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub async fn local_addr(&self) -> Result<SocketAddr> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|r| r.local_addr)
            .ok_or(RtspError::NotStarted)
    }

    /// Publish video codec parameters for DESCRIBE and packetizer construction.
    pub fn set_video_params(&self, params: VideoParams) -> Result<()> {
        if !params.is_valid() {
            return Err(RtspError::InvalidParams(format!(
                "{:?} parameters are incomplete",
                params.codec
            )));
        }
        tracing::debug!(codec = ?params.codec, "video parameters updated");
        self.shared.video_params.send_replace(Some(params));
        Ok(())
    }

    pub fn set_audio_params(&self, params: AudioParams) {
        tracing::debug!(codec = ?params.codec, sample_rate = params.sample_rate, "audio parameters updated");
        self.shared.audio_params.send_replace(Some(params));
    }

    pub fn video_params(&self) -> Option<VideoParams> {
        self.shared.video_params.borrow().clone()
    }

    pub fn on_video_frame(&self, frame: MediaFrame) {
        self.distribute(MediaKind::Video, frame);
    }

    pub fn on_audio_frame(&self, frame: MediaFrame) {
        self.distribute(MediaKind::Audio, frame);
    }

    /// Copy the frame once, release it, and hand a clone to every connection.
    fn distribute(&self, kind: MediaKind, frame: MediaFrame) {
        self.shared.last_timestamp_us[kind.track_id() as usize].store(frame.timestamp_us, Ordering::Relaxed);
        let clients = self.shared.client_handles();
        if clients.is_empty() {
            return;
        }
        let buffer = SharedBuffer::copy_from(&self.shared.pool, &frame.data);
        let (timestamp_us, key_frame) = (frame.timestamp_us, frame.key_frame);
        frame.release();

        for client in &clients {
            client.offer(
                kind,
                QueuedFrame {
                    buffer: buffer.clone(),
                    timestamp_us,
                    key_frame,
                },
            );
        }
        tracing::trace!(%kind, clients = clients.len(), refs = buffer.ref_count(), "frame distributed");
    }

    /// Snapshot of every connected player.
    pub fn clients(&self) -> Vec<ClientStats> {
        self.shared
            .client_handles()
            .iter()
            .map(|client| client.snapshot())
            .collect()
    }
}

impl Drop for RtspServer {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut() {
            running.cancel.cancel();
        }
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>, cancel: CancellationToken) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    connections.spawn(connection::serve(stream, peer, shared.clone(), cancel.child_token()));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "TCP accept error");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            },
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "connection task failed");
                }
            }
        }
    }
    while connections.join_next().await.is_some() {}
    tracing::debug!("accept loop exited");
}
