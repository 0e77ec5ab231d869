/// An RTSP response (RFC 2326 §7).
///
/// Serializes to the standard text format:
///
/// ```text
/// RTSP/1.0 200 OK\r\n
/// CSeq: 1\r\n
/// Content-Type: application/sdp\r\n
/// Server: rtsp-stream/0.1\r\n
/// Date: Thu, 01 Jan 2026 00:00:00 GMT\r\n
/// Cache-Control: no-cache\r\n
/// Content-Length: 142\r\n
/// \r\n
/// v=0\r\n...
/// ```
///
/// Chain [`add_header`](Self::add_header) and [`with_body`](Self::with_body),
/// then call [`serialize`](Self::serialize). `Server`, `Date`,
/// `Cache-Control` and `Content-Length` are added during serialization.
#[must_use]
#[derive(Debug, Clone)]
pub struct RtspResponse {
    pub status_code: u16,
    pub status_text: String,
    pub cseq: Option<u32>,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// Server identification string (RFC 2326 §12.36).
pub const SERVER_AGENT: &str = concat!("rtsp-stream/", env!("CARGO_PKG_VERSION"));

/// Methods answered by the server, used for `Public` and `Allow`.
pub const PUBLIC_METHODS: &str = "OPTIONS, DESCRIBE, SETUP, PLAY, PAUSE, TEARDOWN, GET_PARAMETER";

/// Reason phrase for the status codes this crate emits.
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        415 => "Unsupported Media Type",
        454 => "Session Not Found",
        455 => "Method Not Valid in This State",
        461 => "Unsupported Transport",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

impl RtspResponse {
    pub fn new(status_code: u16) -> Self {
        RtspResponse {
            status_code,
            status_text: reason_phrase(status_code).to_string(),
            cseq: None,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn bad_request() -> Self {
        Self::new(400)
    }

    pub fn not_found() -> Self {
        Self::new(404)
    }

    pub fn session_not_found() -> Self {
        Self::new(454)
    }

    pub fn with_cseq(mut self, cseq: Option<u32>) -> Self {
        self.cseq = cseq;
        self
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    /// Serialize to the RTSP text wire format.
    pub fn serialize(&self) -> String {
        let mut response = format!("RTSP/1.0 {} {}\r\n", self.status_code, self.status_text);

        if let Some(cseq) = self.cseq {
            response.push_str(&format!("CSeq: {cseq}\r\n"));
        }
        for (name, value) in &self.headers {
            response.push_str(&format!("{name}: {value}\r\n"));
        }
        response.push_str(&format!("Server: {SERVER_AGENT}\r\n"));
        response.push_str(&format!(
            "Date: {}\r\n",
            chrono::Utc::now().format("%a, %d %b %Y %H:%M:%S GMT")
        ));
        response.push_str("Cache-Control: no-cache\r\n");

        let body = self.body.as_deref().unwrap_or("");
        response.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
        response.push_str(body);
        response
    }
}
