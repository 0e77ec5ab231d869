//! Error types for the RTSP streaming engine.

use std::fmt;

/// Errors that can occur anywhere in the streaming engine.
///
/// Variants map to specific failure classes across the stack:
///
/// - **Connection**: [`Io`](Self::Io), [`Timeout`](Self::Timeout),
///   [`InvalidUrl`](Self::InvalidUrl), [`ConnectionClosed`](Self::ConnectionClosed).
/// - **Protocol**: [`NoCredentials`](Self::NoCredentials),
///   [`AuthFailed`](Self::AuthFailed), [`AccessDenied`](Self::AccessDenied),
///   [`Failed`](Self::Failed), [`Parse`](Self::Parse).
/// - **Configuration**: [`InvalidParams`](Self::InvalidParams),
///   [`Unsupported`](Self::Unsupported).
/// - **Lifecycle**: [`InvalidState`](Self::InvalidState),
///   [`NotStarted`](Self::NotStarted), [`AlreadyRunning`](Self::AlreadyRunning),
///   [`Cancelled`](Self::Cancelled).
///
/// Queue overflow is never reported through this type; it only shows up in
/// drop counters.
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A bounded wait elapsed. The payload names the operation.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// The URL could not be parsed or its host could not be resolved.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// The peer closed the control connection.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The server asked for authentication and no credentials were configured.
    #[error("server requires credentials")]
    NoCredentials,

    /// The server rejected the supplied credentials.
    #[error("authentication failed")]
    AuthFailed,

    /// The server answered 403 Forbidden.
    #[error("access denied")]
    AccessDenied,

    /// Any other non-success response. `text` is the raw response.
    #[error("request failed with status {status}")]
    Failed { status: u16, text: String },

    /// Failed to parse an RTSP message (RFC 2326 §6, §7).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// Codec parameters are missing or inconsistent.
    #[error("invalid media parameters: {0}")]
    InvalidParams(String),

    /// The requested feature is recognised but not implemented (e.g. `rtsps`).
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The operation is not allowed in the current session state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// [`RtspServer::start`](crate::RtspServer::start) has not been called yet.
    #[error("server not started")]
    NotStarted,

    /// [`RtspServer::start`](crate::RtspServer::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,

    /// [`RtspClient::disconnect`](crate::RtspClient::disconnect) interrupted a connect.
    #[error("cancelled")]
    Cancelled,
}

impl RtspError {
    /// Whether a reconnect attempt could succeed without user intervention.
    ///
    /// Authentication and configuration failures are terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Timeout(_) | Self::ConnectionClosed | Self::Failed { .. }
        )
    }

    pub(crate) fn parse(kind: ParseErrorKind) -> Self {
        Self::Parse { kind }
    }
}

/// Specific kind of RTSP parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no start line).
    EmptyMessage,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// Status line did not have the expected `RTSP/1.0 Code Text` format.
    InvalidStatusLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// Header block or body exceeded the configured limit.
    TooLarge,
    /// Bytes were not valid UTF-8 where text was expected.
    InvalidEncoding,
    /// An interleaved frame arrived on a channel no track was set up for.
    UnexpectedChannel,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidStatusLine => write!(f, "invalid status line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::TooLarge => write!(f, "message too large"),
            Self::InvalidEncoding => write!(f, "invalid encoding"),
            Self::UnexpectedChannel => write!(f, "unexpected interleaved channel"),
        }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
