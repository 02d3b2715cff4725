use std::fmt;

/// In-band control signals that are not failures: they unwind a session's
/// driver loop to a specific next action instead of tearing the connection
/// down with a logged error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCode {
    /// Origin-cluster lookup found a better host; client should be redirected.
    Redirect,
    /// Publisher sent FMLE/Flash unpublish; re-enter identify.
    Republish,
    /// Peer asked to close the RTMP connection cleanly.
    RtmpClose,
    /// Idle publisher was kicked off for exceeding its timeout.
    KickoffForIdle,
}

impl fmt::Display for ControlCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Redirect => "ERROR_CONTROL_REDIRECT",
            Self::Republish => "ERROR_CONTROL_REPUBLISH",
            Self::RtmpClose => "ERROR_CONTROL_RTMP_CLOSE",
            Self::KickoffForIdle => "ERROR_KICKOFF_FOR_IDLE",
        };
        write!(f, "{s}")
    }
}

/// Top-level classification every per-session driver loop applies before
/// deciding whether to log, retry, or exit cleanly.
#[derive(Debug)]
pub enum SessionError {
    /// Peer or local side closed the transport without protocol violation.
    Graceful(String),
    /// In-band flow control; caught one level up and turned into a state
    /// transition, never logged as an error.
    Control(ControlCode),
    /// Anything else: logged once and the session is torn down.
    Fatal(String),
}

impl SessionError {
    #[must_use]
    pub fn is_graceful(&self) -> bool {
        matches!(self, Self::Graceful(_))
    }

    #[must_use]
    pub fn control(&self) -> Option<ControlCode> {
        match self {
            Self::Control(c) => Some(*c),
            _ => None,
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Graceful(msg) => write!(f, "graceful close: {msg}"),
            Self::Control(c) => write!(f, "{c}"),
            Self::Fatal(msg) => write!(f, "fatal: {msg}"),
        }
    }
}

impl std::error::Error for SessionError {}

/// GB28181 / MPEG-PS demuxer failures (spec §6 "Error codes exposed at
/// protocol boundaries").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GbError {
    /// RFC 4571 frame had a zero-length prefix.
    EmptyFrame,
    /// RTP header could not be parsed.
    PsHeader(String),
    /// PS/PES payload parse failure (recoverable unless retries are exhausted).
    PsMedia(String),
    /// A single oversized payload could not be recovered from.
    LargePacketUnrecoverable { len: usize },
    /// Recovery attempts exceeded the configured bound.
    RecoveryExhausted { attempts: u32 },
}

impl fmt::Display for GbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyFrame => write!(f, "ERROR_GB_PS_HEADER: zero-length RFC4571 frame"),
            Self::PsHeader(msg) => write!(f, "ERROR_GB_PS_HEADER: {msg}"),
            Self::PsMedia(msg) => write!(f, "ERROR_GB_PS_MEDIA: {msg}"),
            Self::LargePacketUnrecoverable { len } => {
                write!(f, "ERROR_GB_PS_MEDIA: unrecoverable packet of {len} bytes")
            }
            Self::RecoveryExhausted { attempts } => {
                write!(f, "ERROR_GB_PS_MEDIA: {attempts} consecutive recovery attempts")
            }
        }
    }
}

impl std::error::Error for GbError {}

/// RTMP protocol/session failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtmpError {
    Handshake(String),
    Chunk(String),
    Amf(String),
    VhostNotFound(String),
    VhostDisabled(String),
    StreamNotFound(String),
    StreamBusy(String),
    TokenUnavailable(String),
}

impl fmt::Display for RtmpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handshake(m) => write!(f, "handshake failed: {m}"),
            Self::Chunk(m) => write!(f, "chunk stream error: {m}"),
            Self::Amf(m) => write!(f, "AMF decode error: {m}"),
            Self::VhostNotFound(v) => write!(f, "ERROR_RTMP_VHOST_NOT_FOUND: {v}"),
            Self::VhostDisabled(v) => write!(f, "vhost disabled: {v}"),
            Self::StreamNotFound(s) => write!(f, "ERROR_RTMP_STREAM_NOT_FOUND: {s}"),
            Self::StreamBusy(s) => write!(f, "ERROR_SYSTEM_STREAM_BUSY: {s}"),
            Self::TokenUnavailable(s) => write!(f, "ERROR_SYSTEM_STREAM_BUSY: token held for {s}"),
        }
    }
}

impl std::error::Error for RtmpError {}

/// Edge ingester/forwarder failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeError {
    Connect(String),
    Upstream(String),
    TooManyRedirects,
    Send(String),
}

impl fmt::Display for EdgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(m) => write!(f, "edge connect failed: {m}"),
            Self::Upstream(m) => write!(f, "edge upstream error: {m}"),
            Self::TooManyRedirects => write!(f, "edge: exceeded redirect depth of 3"),
            Self::Send(m) => write!(f, "edge send failed: {m}"),
        }
    }
}

impl std::error::Error for EdgeError {}

/// HTTP live stream failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpStreamError {
    /// Source unpublished or reloaded while a client was attached.
    Eof,
    NoSuchSource(String),
}

impl fmt::Display for HttpStreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eof => write!(f, "ERROR_HTTP_STREAM_EOF"),
            Self::NoSuchSource(s) => write!(f, "no such live source: {s}"),
        }
    }
}

impl std::error::Error for HttpStreamError {}

impl From<GbError> for SessionError {
    fn from(e: GbError) -> Self {
        match e {
            GbError::LargePacketUnrecoverable { .. } | GbError::RecoveryExhausted { .. } => {
                Self::Fatal(e.to_string())
            }
            other => Self::Fatal(other.to_string()),
        }
    }
}

impl From<RtmpError> for SessionError {
    fn from(e: RtmpError) -> Self {
        Self::Fatal(e.to_string())
    }
}

impl From<EdgeError> for SessionError {
    fn from(e: EdgeError) -> Self {
        Self::Fatal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_codes_render_protocol_names() {
        assert_eq!(ControlCode::Redirect.to_string(), "ERROR_CONTROL_REDIRECT");
        assert_eq!(
            ControlCode::KickoffForIdle.to_string(),
            "ERROR_KICKOFF_FOR_IDLE"
        );
    }

    #[test]
    fn session_error_distinguishes_control_from_fatal() {
        let graceful = SessionError::Graceful("client closed".into());
        assert!(graceful.is_graceful());
        assert!(graceful.control().is_none());

        let ctl = SessionError::Control(ControlCode::Republish);
        assert!(!ctl.is_graceful());
        assert_eq!(ctl.control(), Some(ControlCode::Republish));

        let fatal: SessionError = RtmpError::StreamBusy("live/s".into()).into();
        assert!(matches!(fatal, SessionError::Fatal(_)));
    }
}
