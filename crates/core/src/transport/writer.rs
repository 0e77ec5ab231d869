use std::fmt;
use std::io;
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;

/// Marker byte that opens an interleaved binary frame (RFC 2326 §10.12).
pub const INTERLEAVED_MAGIC: u8 = 0x24;

/// `$`, channel, 16-bit big-endian length.
pub fn interleaved_header(channel: u8, len: u16) -> [u8; 4] {
    let [hi, lo] = len.to_be_bytes();
    [INTERLEAVED_MAGIC, channel, hi, lo]
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Write half of an RTSP control connection.
///
/// RTSP responses, interleaved RTP and interleaved RTCP all go through this
/// one handle; the mutex keeps each message or frame contiguous on the wire.
#[derive(Clone)]
pub struct ControlWriter {
    inner: Arc<Mutex<BufWriter<BoxedWriter>>>,
}

impl ControlWriter {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(BufWriter::new(Box::new(writer)))),
        }
    }

    /// Write a complete RTSP text message and flush.
    pub async fn send_message(&self, text: &str) -> io::Result<()> {
        let mut w = self.inner.lock().await;
        w.write_all(text.as_bytes()).await?;
        w.flush().await
    }

    /// Write each payload as an interleaved frame on `channel`.
    ///
    /// With `flush_each` the buffer is flushed after every frame, otherwise
    /// once after the batch. Returns the bytes put on the wire.
    pub async fn send_interleaved(&self, channel: u8, payloads: &[&[u8]], flush_each: bool) -> io::Result<usize> {
        let mut w = self.inner.lock().await;
        let mut written = 0;
        for payload in payloads {
            let len = u16::try_from(payload.len()).map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidInput, "interleaved frame exceeds 65535 bytes")
            })?;
            w.write_all(&interleaved_header(channel, len)).await?;
            w.write_all(payload).await?;
            written += payload.len() + 4;
            if flush_each {
                w.flush().await?;
            }
        }
        if !flush_each {
            w.flush().await?;
        }
        Ok(written)
    }

    pub async fn shutdown(&self) -> io::Result<()> {
        self.inner.lock().await.shutdown().await
    }
}

impl fmt::Debug for ControlWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ControlWriter")
    }
}
