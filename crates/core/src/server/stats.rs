use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::media::MediaKind;
use crate::transport::TransportProtocol;

/// Counters for one track of one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    /// Frames dropped or evicted by queue overflow.
    pub packets_dropped: u64,
    pub enqueued: u64,
    pub queue_size: usize,
    pub queue_capacity: usize,
}

/// Snapshot of one connected player.
#[derive(Debug, Clone)]
pub struct ClientStats {
    /// Empty until the first SETUP.
    pub session_id: String,
    pub remote_addr: SocketAddr,
    pub protocol: Option<TransportProtocol>,
    pub playing: bool,
    pub started_at: DateTime<Utc>,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub video: MediaStats,
    pub audio: MediaStats,
}

/// Live counters behind a [`ClientStats`] snapshot.
#[derive(Debug)]
pub(crate) struct StatsRecorder {
    inner: Mutex<ClientStats>,
}

impl StatsRecorder {
    pub fn new(remote_addr: SocketAddr) -> Self {
        Self {
            inner: Mutex::new(ClientStats {
                session_id: String::new(),
                remote_addr,
                protocol: None,
                playing: false,
                started_at: Utc::now(),
                last_sent_at: None,
                video: MediaStats::default(),
                audio: MediaStats::default(),
            }),
        }
    }

    pub fn set_session(&self, session_id: &str, protocol: TransportProtocol) {
        let mut stats = self.inner.lock();
        stats.session_id = session_id.to_string();
        stats.protocol = Some(protocol);
    }

    pub fn set_playing(&self, playing: bool) {
        self.inner.lock().playing = playing;
    }

    pub fn record_enqueued(&self, kind: MediaKind, evicted: usize) {
        let mut stats = self.inner.lock();
        let media = stats.media_mut(kind);
        media.enqueued += 1;
        media.packets_dropped += evicted as u64;
    }

    pub fn record_dropped(&self, kind: MediaKind, frames: usize) {
        self.inner.lock().media_mut(kind).packets_dropped += frames as u64;
    }

    pub fn record_sent(&self, kind: MediaKind, packets: usize, bytes: usize) {
        let mut stats = self.inner.lock();
        stats.last_sent_at = Some(Utc::now());
        let media = stats.media_mut(kind);
        media.packets_sent += packets as u64;
        media.bytes_sent += bytes as u64;
    }

    /// Copy of the counters with the current queue fill levels filled in.
    pub fn snapshot(&self, video_queue: (usize, usize), audio_queue: (usize, usize)) -> ClientStats {
        let mut stats = self.inner.lock().clone();
        (stats.video.queue_size, stats.video.queue_capacity) = video_queue;
        (stats.audio.queue_size, stats.audio.queue_capacity) = audio_queue;
        stats
    }
}

impl ClientStats {
    fn media_mut(&mut self, kind: MediaKind) -> &mut MediaStats {
        match kind {
            MediaKind::Video => &mut self.video,
            MediaKind::Audio => &mut self.audio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_per_track() {
        let recorder = StatsRecorder::new("127.0.0.1:5000".parse().unwrap());
        recorder.record_enqueued(MediaKind::Video, 0);
        recorder.record_enqueued(MediaKind::Video, 3);
        recorder.record_dropped(MediaKind::Audio, 1);
        recorder.record_sent(MediaKind::Video, 4, 4000);
        recorder.set_session("ABC", TransportProtocol::Tcp);

        let stats = recorder.snapshot((1, 32), (0, 64));
        assert_eq!(stats.session_id, "ABC");
        assert_eq!(stats.protocol, Some(TransportProtocol::Tcp));
        assert_eq!(stats.video.enqueued, 2);
        assert_eq!(stats.video.packets_dropped, 3);
        assert_eq!(stats.video.packets_sent, 4);
        assert_eq!(stats.video.bytes_sent, 4000);
        assert_eq!(stats.video.queue_capacity, 32);
        assert_eq!(stats.audio.packets_dropped, 1);
        assert_eq!(stats.audio.queue_capacity, 64);
        assert!(stats.last_sent_at.is_some());
    }
}
