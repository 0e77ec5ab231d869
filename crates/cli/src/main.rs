use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use rtsp::{ClientConfig, ClientEvent, ClientState, MediaFrame, ProtocolPolicy, RtspClient, RtspServer, ServerConfig};
use tracing_subscriber::EnvFilter;

mod source;

use source::AnnexBFile;

const STATS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "rtsp-stream", version, about = "Stream an H.264 file over RTSP")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the stream to RTSP players (DESCRIBE/SETUP/PLAY)
    Serve {
        /// Bind address (host:port)
        #[arg(long, short, default_value = "0.0.0.0:8554")]
        bind: SocketAddr,
        /// Stream path players request
        #[arg(long, default_value = "/stream")]
        path: String,
        #[command(flatten)]
        input: Input,
    },
    /// Publish the stream to a remote server (ANNOUNCE/RECORD)
    Push {
        /// rtsp://[user:pass@]host[:port]/path
        url: String,
        /// Lower transport offered in SETUP: tcp, udp or auto
        #[arg(long, default_value_t = ProtocolPolicy::Auto)]
        protocol: ProtocolPolicy,
        #[command(flatten)]
        input: Input,
    },
}

#[derive(Args)]
struct Input {
    /// Raw H.264 Annex-B file
    #[arg(long, short)]
    input: PathBuf,
    /// Frames per second
    #[arg(long, default_value_t = 30)]
    fps: u32,
    /// Restart from the beginning at end of file
    #[arg(long = "loop")]
    repeat: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse().command {
        Command::Serve { bind, path, input } => serve(bind, path, input).await,
        Command::Push { url, protocol, input } => push(url, protocol, input).await,
    }
}

async fn serve(bind: SocketAddr, path: String, input: Input) -> anyhow::Result<()> {
    let file = source::load(&input.input)?;
    let server = RtspServer::new(ServerConfig {
        bind_addr: bind,
        path,
        ..Default::default()
    });
    server.set_video_params(file.params.clone())?;
    let addr = server.start().await.context("starting server")?;
    println!("RTSP server on rtsp://{addr}{} (Ctrl+C to stop)", server.config().path);

    let mut last_stats = Instant::now();
    let result = pace(&file, &input, |frame| server.on_video_frame(frame), || {
        if last_stats.elapsed() >= STATS_INTERVAL {
            last_stats = Instant::now();
            for client in server.clients() {
                tracing::info!(
                    peer = %client.remote_addr,
                    playing = client.playing,
                    sent = client.video.packets_sent,
                    dropped = client.video.packets_dropped,
                    "client"
                );
            }
        }
        Ok(())
    })
    .await;

    server.stop().await;
    result
}

async fn push(url: String, protocol: ProtocolPolicy, input: Input) -> anyhow::Result<()> {
    let file = source::load(&input.input)?;
    let mut config = ClientConfig::new(url);
    config.protocol = protocol;
    config.video_only = true;
    let client = RtspClient::new(config)?;
    client.set_video_params(file.params.clone())?;

    if let Some(mut events) = client.take_events() {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    ClientEvent::Bitrate(bps) => tracing::debug!(kbps = bps / 1000, "bitrate"),
                    ClientEvent::Error(e) => tracing::error!(error = %e, "session error"),
                    event => tracing::info!(?event, "client event"),
                }
            }
        });
    }

    client.connect().await.context("connecting")?;
    println!("Publishing to {} (Ctrl+C to stop)", client.config().url);

    let result = pace(&file, &input, |frame| client.enqueue_frame(frame), || {
        if client.state() == ClientState::Idle {
            bail!("session ended");
        }
        Ok(())
    })
    .await;

    client.disconnect().await;
    tracing::info!(dropped = client.dropped_frames(), "publisher stopped");
    result
}

/// Feed access units at `fps` until Ctrl+C, end of input, or `check` fails.
async fn pace(
    file: &AnnexBFile,
    input: &Input,
    mut deliver: impl FnMut(MediaFrame),
    mut check: impl FnMut() -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    if input.fps == 0 {
        bail!("fps must be positive");
    }
    let frame_us = (1_000_000 / u64::from(input.fps)).max(1);
    let mut ticker = tokio::time::interval(Duration::from_micros(frame_us));
    let mut index = 0u64;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        for unit in &file.units {
            tokio::select! {
                _ = &mut shutdown => return Ok(()),
                _ = ticker.tick() => {}
            }
            check()?;
            deliver(MediaFrame::video(unit.data.clone(), index * frame_us, unit.key_frame));
            index += 1;
        }
        if !input.repeat {
            tracing::info!(frames = index, "end of input");
            return Ok(());
        }
    }
}
