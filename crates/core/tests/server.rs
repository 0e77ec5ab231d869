//! Player-side handshakes against a running server:
//! OPTIONS → DESCRIBE → SETUP → PLAY, then media over the negotiated transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rtsp::{MediaFrame, RtspServer, ServerConfig, VideoParams};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UdpSocket};

const TIMEOUT: Duration = Duration::from_secs(5);
const IDR: [u8; 8] = [0, 0, 0, 1, 0x65, 0x88, 0x84, 0x21];

async fn started_server() -> (RtspServer, String) {
    let config = ServerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        ..Default::default()
    };
    let server = RtspServer::new(config);
    server
        .set_video_params(VideoParams::h264(vec![0x67, 0x42, 0x00, 0x1f], vec![0x68, 0xce, 0x3c, 0x80]))
        .unwrap();
    let addr = server.start().await.unwrap();
    (server, format!("rtsp://{addr}/stream"))
}

async fn request(stream: &mut BufReader<TcpStream>, text: &str) -> String {
    stream.get_mut().write_all(text.as_bytes()).await.unwrap();

    let mut response = String::new();
    loop {
        let mut line = String::new();
        if stream.read_line(&mut line).await.unwrap() == 0 {
            break;
        }
        response.push_str(&line);
        if line == "\r\n" {
            break;
        }
    }
    if let Some(len) = header(&response, "Content-Length").and_then(|v| v.parse::<usize>().ok()) {
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await.unwrap();
        response.push_str(&String::from_utf8_lossy(&body));
    }
    response
}

fn header<'a>(response: &'a str, name: &str) -> Option<&'a str> {
    response.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
    })
}

fn status(response: &str) -> u16 {
    response.split_whitespace().nth(1).and_then(|c| c.parse().ok()).unwrap_or(0)
}

/// `seq=` of the first RTP-Info entry.
fn rtp_info_seq(response: &str) -> u16 {
    rtp_info_field(response, "seq=").expect("RTP-Info with seq")
}

fn rtp_info_field<T: std::str::FromStr>(response: &str, name: &str) -> Option<T> {
    header(response, "RTP-Info")
        .and_then(|info| info.split([';', ',']).find_map(|p| p.strip_prefix(name)))
        .and_then(|value| value.parse().ok())
}

async fn read_interleaved(stream: &mut BufReader<TcpStream>) -> (u8, Vec<u8>) {
    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await.unwrap();
    assert_eq!(head[0], b'$', "expected interleaved frame");
    let len = u16::from_be_bytes([head[2], head[3]]) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.unwrap();
    (head[1], payload)
}

fn key_frame(released: &Arc<AtomicUsize>) -> MediaFrame {
    let counter = released.clone();
    MediaFrame::video(IDR.to_vec(), 0, true).with_release(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

#[tokio::test]
async fn tcp_interleaved_handshake_and_media() {
    let (server, base) = started_server().await;
    let stream = TcpStream::connect(server.local_addr().await.unwrap()).await.unwrap();
    let mut stream = BufReader::new(stream);

    tokio::time::timeout(TIMEOUT, async {
        let options = request(&mut stream, &format!("OPTIONS {base} RTSP/1.0\r\nCSeq: 1\r\n\r\n")).await;
        assert_eq!(status(&options), 200, "{options}");
        assert_eq!(header(&options, "CSeq"), Some("1"));
        assert!(header(&options, "Public").unwrap().contains("DESCRIBE"));

        let describe = request(
            &mut stream,
            &format!("DESCRIBE {base} RTSP/1.0\r\nCSeq: 2\r\nAccept: application/sdp\r\n\r\n"),
        )
        .await;
        assert_eq!(status(&describe), 200, "{describe}");
        assert_eq!(header(&describe, "Content-Type"), Some("application/sdp"));
        assert!(describe.contains("m=video 0 RTP/AVP 96"));
        assert!(describe.contains("a=rtpmap:96 H264/90000"));
        assert!(describe.contains("a=control:trackID=0"));

        let setup = request(
            &mut stream,
            &format!("SETUP {base}/trackID=0 RTSP/1.0\r\nCSeq: 3\r\nTransport: RTP/AVP/TCP;unicast;interleaved=0-1\r\n\r\n"),
        )
        .await;
        assert_eq!(status(&setup), 200, "{setup}");
        assert!(header(&setup, "Transport").unwrap().contains("interleaved=0-1"));
        let session = header(&setup, "Session").unwrap().split(';').next().unwrap().to_string();

        let play = request(
            &mut stream,
            &format!("PLAY {base} RTSP/1.0\r\nCSeq: 4\r\nSession: {session}\r\n\r\n"),
        )
        .await;
        assert_eq!(status(&play), 200, "{play}");
        let first_seq = rtp_info_seq(&play);

        let released = Arc::new(AtomicUsize::new(0));
        server.on_video_frame(key_frame(&released));
        assert_eq!(released.load(Ordering::SeqCst), 1);

        let rtp = loop {
            let (channel, payload) = read_interleaved(&mut stream).await;
            if channel == 0 {
                break payload;
            }
            assert_eq!(channel, 1, "unexpected channel");
        };
        assert_eq!(rtp[0] >> 6, 2);
        assert_eq!(rtp[1] & 0x7f, 96);
        assert_eq!(u16::from_be_bytes([rtp[2], rtp[3]]), first_seq);

        let clients = server.clients();
        assert_eq!(clients.len(), 1);
        assert!(clients[0].playing);
        assert_eq!(clients[0].session_id, session);
    })
    .await
    .expect("handshake timed out");

    server.stop().await;
}

#[tokio::test]
async fn rtp_info_follows_frame_clock() {
    const CAPTURE_US: u64 = 5_000_000;
    let (server, base) = started_server().await;
    let released = Arc::new(AtomicUsize::new(0));
    let frame = |released: &Arc<AtomicUsize>| {
        let counter = released.clone();
        MediaFrame::video(IDR.to_vec(), CAPTURE_US, true).with_release(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    };
    server.on_video_frame(frame(&released));
    assert_eq!(released.load(Ordering::SeqCst), 1);

    let stream = TcpStream::connect(server.local_addr().await.unwrap()).await.unwrap();
    let mut stream = BufReader::new(stream);

    tokio::time::timeout(TIMEOUT, async {
        let setup = request(
            &mut stream,
            &format!("SETUP {base}/trackID=0 RTSP/1.0\r\nCSeq: 1\r\nTransport: RTP/AVP/TCP;unicast;interleaved=0-1\r\n\r\n"),
        )
        .await;
        let session = header(&setup, "Session").unwrap().split(';').next().unwrap().to_string();
        let play = request(
            &mut stream,
            &format!("PLAY {base} RTSP/1.0\r\nCSeq: 2\r\nSession: {session}\r\n\r\n"),
        )
        .await;
        assert_eq!(status(&play), 200, "{play}");
        let rtptime: u32 = rtp_info_field(&play, "rtptime=").expect("RTP-Info with rtptime");
        assert_eq!(rtptime, 450_000);

        server.on_video_frame(frame(&released));
        let rtp = loop {
            let (channel, payload) = read_interleaved(&mut stream).await;
            if channel == 0 {
                break payload;
            }
        };
        assert_eq!(u32::from_be_bytes([rtp[4], rtp[5], rtp[6], rtp[7]]), rtptime);
    })
    .await
    .expect("handshake timed out");

    server.stop().await;
}

#[tokio::test]
async fn udp_handshake_and_media() {
    let (server, base) = started_server().await;
    let stream = TcpStream::connect(server.local_addr().await.unwrap()).await.unwrap();
    let mut stream = BufReader::new(stream);
    let rtp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let rtcp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let rtp_port = rtp.local_addr().unwrap().port();
    let rtcp_port = rtcp.local_addr().unwrap().port();

    tokio::time::timeout(TIMEOUT, async {
        let setup = request(
            &mut stream,
            &format!(
                "SETUP {base}/trackID=0 RTSP/1.0\r\nCSeq: 1\r\nTransport: RTP/AVP;unicast;client_port={rtp_port}-{rtcp_port}\r\n\r\n"
            ),
        )
        .await;
        assert_eq!(status(&setup), 200, "{setup}");
        let transport = header(&setup, "Transport").unwrap();
        assert!(transport.contains(&format!("client_port={rtp_port}-{rtcp_port}")));
        assert!(transport.contains("server_port="));
        let session = header(&setup, "Session").unwrap().split(';').next().unwrap().to_string();

        let play = request(
            &mut stream,
            &format!("PLAY {base} RTSP/1.0\r\nCSeq: 2\r\nSession: {session}\r\n\r\n"),
        )
        .await;
        assert_eq!(status(&play), 200, "{play}");
        let first_seq = rtp_info_seq(&play);

        let released = Arc::new(AtomicUsize::new(0));
        server.on_video_frame(key_frame(&released));

        let mut packet = vec![0u8; 2048];
        let len = rtp.recv(&mut packet).await.unwrap();
        assert!(len > 12);
        assert_eq!(packet[1] & 0x7f, 96);
        assert_eq!(u16::from_be_bytes([packet[2], packet[3]]), first_seq);

        let teardown = request(
            &mut stream,
            &format!("TEARDOWN {base} RTSP/1.0\r\nCSeq: 3\r\nSession: {session}\r\n\r\n"),
        )
        .await;
        assert_eq!(status(&teardown), 200, "{teardown}");
    })
    .await
    .expect("handshake timed out");

    server.stop().await;
}

#[tokio::test]
async fn error_responses() {
    let config = ServerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        ..Default::default()
    };
    let server = RtspServer::new(config);
    let addr = server.start().await.unwrap();
    let base = format!("rtsp://{addr}/stream");
    let mut stream = BufReader::new(TcpStream::connect(addr).await.unwrap());

    tokio::time::timeout(TIMEOUT, async {
        let describe = request(&mut stream, &format!("DESCRIBE {base} RTSP/1.0\r\nCSeq: 1\r\n\r\n")).await;
        assert_eq!(status(&describe), 503, "no parameters yet");

        let wrong_path = request(&mut stream, &format!("DESCRIBE rtsp://{addr}/other RTSP/1.0\r\nCSeq: 2\r\n\r\n")).await;
        assert_eq!(status(&wrong_path), 404);

        let keep_alive = request(
            &mut stream,
            &format!("GET_PARAMETER {base} RTSP/1.0\r\nCSeq: 3\r\nSession: DEADBEEF\r\n\r\n"),
        )
        .await;
        assert_eq!(status(&keep_alive), 454);

        let play = request(&mut stream, &format!("PLAY {base} RTSP/1.0\r\nCSeq: 4\r\n\r\n")).await;
        assert_eq!(status(&play), 455);

        let record = request(&mut stream, &format!("RECORD {base} RTSP/1.0\r\nCSeq: 5\r\n\r\n")).await;
        assert_eq!(status(&record), 405);
        assert_eq!(header(&record, "CSeq"), Some("5"));
    })
    .await
    .expect("requests timed out");

    server.stop().await;
}
