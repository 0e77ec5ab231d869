use std::net::SocketAddr;
use std::time::Duration;

/// Server-mode configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the RTSP listener binds to. Port 0 picks a free port.
    pub bind_addr: SocketAddr,
    /// Stream path served by DESCRIBE/SETUP, e.g. `/stream`.
    pub path: String,
    /// SDP session name (`s=` and `i=`).
    pub session_name: String,
    /// Re-send parameter sets ahead of non-key frames every `reinject_interval`.
    pub param_reinjection: bool,
    pub reinject_interval: Duration,
    pub video_queue_capacity: usize,
    pub audio_queue_capacity: usize,
    /// Seconds advertised in `Session: <id>;timeout=`.
    pub session_timeout: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8554)),
            path: "/stream".to_string(),
            session_name: "Stream".to_string(),
            param_reinjection: true,
            reinject_interval: Duration::from_secs(2),
            video_queue_capacity: 32,
            audio_queue_capacity: 64,
            session_timeout: 60,
        }
    }
}

impl ServerConfig {
    /// Whether a request URI addresses the configured stream (or one of its tracks).
    pub fn matches_path(&self, uri: &str) -> bool {
        let path = uri_path(uri);
        let mount = self.path.trim_end_matches('/');
        match path.strip_prefix(mount) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

/// Path component of an absolute `rtsp://host:port/path?query` URI.
pub(crate) fn uri_path(uri: &str) -> &str {
    let after_scheme = uri.split_once("://").map_or(uri, |(_, rest)| rest);
    let path = after_scheme.find('/').map_or("/", |i| &after_scheme[i..]);
    path.split('?').next().unwrap_or(path)
}
